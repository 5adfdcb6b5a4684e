// Approval Workflow Engine
//
// This crate provides a DB-agnostic implementation of a graph-based approval
// workflow engine (start → approval/condition/action nodes → end).
//
// Key design decisions:
// - Uses traits (DefinitionStore, InstanceStore, HistoryStore) for pluggable backends
// - Collaborator seams (EntityResolver, ApproverResolver, ActionExecutor) are traits
//   so the surrounding system supplies entity summaries, membership checks and side effects
// - Node kind is a closed tagged enum with per-variant config, never string dispatch
// - Instance state is a projection of the append-only history ledger; replay
//   reproduces (state, current_node_id) for crash reconciliation
// - Every mutation is guarded by a compare-and-set on (state, current_node_id)
// - The engine itself is pure: it computes a Transition, the gateway persists it
// - organization_id is an explicit parameter on every call, never ambient context

pub mod condition;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod instance;
pub mod replay;
pub mod traits;
pub mod validator;

// In-memory implementations for examples and testing
pub mod memory;

pub use condition::evaluate;
pub use engine::{Engine, Transition, WorkflowEvent};
pub use error::{Result, VistoError};
pub use gateway::{
    ApprovalGateway, Actor, HistoryFilter, InstanceDetail, PendingInstance, StartRequest,
};
pub use graph::{
    ApproverSpec, Cardinality, ConditionClause, ConditionOperator, DefinitionStatus, Edge,
    EdgeLabel, Node, NodeKind, TerminalOutcome, WorkflowDefinition,
};
pub use instance::{
    HistoryAction, HistoryEntry, HistoryEvent, InstanceState, Priority, WorkflowInstance,
};
pub use memory::{
    DirectoryApproverResolver, FailingActionExecutor, InMemoryDefinitionStore,
    InMemoryHistoryStore, InMemoryInstanceStore, NoopActionExecutor, RecordingActionExecutor,
    StaticEntityResolver,
};
pub use replay::replay;
pub use traits::{
    ActionExecutor, ApproverResolver, DefinitionStore, EntityResolver, EntitySummary,
    HistoryStore, InstanceFilter, InstancePatch, InstanceStore,
};
pub use validator::{validate, Violation};
