// Core traits for pluggable backends and external collaborators
//
// Store traits allow the gateway to run against different backends:
// - In-memory implementations for examples and testing
// - Postgres implementations for production (visto-storage)
//
// Collaborator traits are the seams to the surrounding system: it supplies
// entity summaries, approver membership checks and accion side effects. All of
// them take organization_id explicitly; the engine never uses ambient tenant
// context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::graph::{ApproverSpec, DefinitionStatus, WorkflowDefinition};
use crate::instance::{HistoryEntry, HistoryEvent, InstanceState, WorkflowInstance};

// ============================================================================
// DefinitionStore - versioned, immutable-once-published graph definitions
// ============================================================================

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Persist a new draft definition
    async fn insert(&self, def: WorkflowDefinition) -> Result<WorkflowDefinition>;

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<WorkflowDefinition>>;

    /// The single published definition for an entity type, if any
    async fn published_for(
        &self,
        organization_id: Uuid,
        entity_type: &str,
    ) -> Result<Option<WorkflowDefinition>>;

    async fn list(
        &self,
        organization_id: Uuid,
        entity_type: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>>;

    /// Highest version ever created for (organization, entity_type); 0 if none
    async fn latest_version(&self, organization_id: Uuid, entity_type: &str) -> Result<i32>;

    /// Flip definition status (publish sets published_at). Returns the updated
    /// definition, or None if it does not exist.
    async fn set_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: DefinitionStatus,
    ) -> Result<Option<WorkflowDefinition>>;
}

// ============================================================================
// InstanceStore - one non-terminal instance per entity, CAS on mutation
// ============================================================================

/// Fields a transition is allowed to change on an instance.
#[derive(Debug, Clone)]
pub struct InstancePatch {
    pub state: InstanceState,
    pub current_node_id: String,
    pub node_entered_at: DateTime<Utc>,
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filters for the historical instance listing.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub entity_type: Option<String>,
    pub state: Option<InstanceState>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a fresh instance. Must fail with Conflict if a non-terminal
    /// instance already exists for (organization, entity_type, entity_id).
    async fn insert(&self, instance: WorkflowInstance) -> Result<WorkflowInstance>;

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<WorkflowInstance>>;

    async fn active_for_entity(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Option<WorkflowInstance>>;

    /// Compare-and-set update: writes the patch only if (state, current_node_id)
    /// still match what the caller read. Returns false on CAS miss.
    async fn update_guarded(
        &self,
        organization_id: Uuid,
        id: Uuid,
        expected_state: InstanceState,
        expected_node: &str,
        patch: InstancePatch,
    ) -> Result<bool>;

    /// All en_progreso instances for one organization (pending queue source)
    async fn list_in_progress(&self, organization_id: Uuid) -> Result<Vec<WorkflowInstance>>;

    /// All en_progreso instances across organizations (sweeper source)
    async fn list_in_progress_all(&self) -> Result<Vec<WorkflowInstance>>;

    async fn list_filtered(
        &self,
        organization_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>>;
}

// ============================================================================
// HistoryStore - append-only audit ledger
// ============================================================================

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append entries in order; the store assigns per-instance sequence numbers
    /// and timestamps. Never updates or deletes.
    async fn append(
        &self,
        instance_id: Uuid,
        entries: Vec<HistoryEntry>,
    ) -> Result<Vec<HistoryEvent>>;

    /// Full ledger for an instance, in sequence order
    async fn list(&self, instance_id: Uuid) -> Result<Vec<HistoryEvent>>;
}

// ============================================================================
// Collaborator contract consumed by the engine
// ============================================================================

/// Human-readable summary of the entity under approval, for list/detail display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EntitySummary {
    pub folio: String,
    pub total: Option<f64>,
    pub counterparty_name: Option<String>,
    pub item_count: Option<i64>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Resolves live entity summaries. Must be side-effect-free and fast.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve_summary(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<EntitySummary>;
}

/// Resolves a configured approver spec into a membership check for an actor.
#[async_trait]
pub trait ApproverResolver: Send + Sync {
    async fn matches(
        &self,
        organization_id: Uuid,
        spec: &ApproverSpec,
        actor_id: Uuid,
    ) -> Result<bool>;
}

/// Executes the side effect bound to an accion node (e.g. "notificar",
/// "cambiar_estado", "webhook"). Treated as a fallible synchronous call with a
/// bounded timeout on the implementor's side.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        organization_id: Uuid,
        tipo_accion: &str,
        params: &serde_json::Value,
        entity_snapshot: &serde_json::Value,
    ) -> Result<()>;
}
