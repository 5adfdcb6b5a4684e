// Instance and history DTOs for public API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use visto_core::{EntitySummary, HistoryAction, InstanceState, Priority};

/// A workflow instance as exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Instance {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub state: InstanceState,
    pub current_node_id: String,
    pub requester_id: Uuid,
    pub priority: Priority,
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<visto_core::WorkflowInstance> for Instance {
    fn from(i: visto_core::WorkflowInstance) -> Self {
        Instance {
            id: i.id,
            definition_id: i.definition_id,
            entity_type: i.entity_type,
            entity_id: i.entity_id,
            state: i.state,
            current_node_id: i.current_node_id,
            requester_id: i.requester_id,
            priority: i.priority,
            error_flag: i.error_flag,
            last_error: i.last_error,
            started_at: i.started_at,
            completed_at: i.completed_at,
        }
    }
}

/// One audit-trail event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEventDto {
    pub sequence: i32,
    pub action: HistoryAction,
    pub actor_id: Option<Uuid>,
    pub node_id: String,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl From<visto_core::HistoryEvent> for HistoryEventDto {
    fn from(e: visto_core::HistoryEvent) -> Self {
        HistoryEventDto {
            sequence: e.sequence,
            action: e.action,
            actor_id: e.actor_id,
            node_id: e.node_id,
            comment: e.comment,
            occurred_at: e.occurred_at,
        }
    }
}

/// Pending-queue item for an approver.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingItem {
    #[serde(flatten)]
    pub instance: Instance,
    pub summary: EntitySummary,
    pub node_name: Option<String>,
    /// When the current approval times out, if configured.
    pub deadline: Option<DateTime<Utc>>,
}

/// Detail view: instance, full history and both entity views (frozen snapshot
/// and fresh summary; the two may drift and are shown side by side).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceDetailDto {
    #[serde(flatten)]
    pub instance: Instance,
    pub history: Vec<HistoryEventDto>,
    pub summary: EntitySummary,
    #[schema(value_type = Object)]
    pub entity_snapshot: serde_json::Value,
}

/// Request to start an instance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartInstanceRequest {
    #[schema(example = "orden_compra")]
    pub entity_type: String,
    pub entity_id: Uuid,
    pub requester_id: Uuid,
    /// Entity fields pre-resolved by the owning collaborator; conditions
    /// evaluate against this snapshot.
    #[schema(value_type = Object)]
    pub entity_snapshot: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
}

/// Request to approve the current node.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApproveRequest {
    pub actor_id: Uuid,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Request to reject the current node. `motivo` must be at least 10 characters.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub actor_id: Uuid,
    #[schema(example = "presupuesto agotado este trimestre")]
    pub motivo: String,
}

/// Request to cancel an in-progress instance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub actor_id: Uuid,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub motivo: Option<String>,
}

/// Query parameters for the pending queue.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PendingParams {
    pub actor_id: Uuid,
    #[serde(default)]
    pub is_admin: bool,
}

/// Query parameters for listing/filtering instances.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ListInstancesParams {
    pub entity_type: Option<String>,
    pub state: Option<InstanceState>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}
