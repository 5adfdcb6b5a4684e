// Timeout sweeper worker
//
// This crate hosts:
// - Sweeper: periodic pass that expires or escalates overdue approvals
// - collaborators: default EntityResolver/ApproverResolver/ActionExecutor
//   implementations for standalone deployments (also used by the API)

pub mod collaborators;
pub mod sweeper;

pub use sweeper::{Sweeper, SweeperConfig};
