// Public DTOs for the Visto approval API
//
// These types are the HTTP surface; they are deliberately separate from the
// core domain and storage rows. Workflow graphs travel as the editor's
// serialized JSON (nodes/edges as raw values) and are parsed into the typed
// core model at the gateway boundary.

pub mod common;
pub mod definition;
pub mod instance;

pub use common::*;
pub use definition::*;
pub use instance::*;
