// Instance and history ledger types.
//
// A WorkflowInstance is one execution of a definition against one business
// entity. Its (state, current_node_id) pair is a materialized projection of the
// append-only history ledger; see replay.rs for the reconciliation path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Instance lifecycle state. Terminal states are never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum InstanceState {
    EnProgreso,
    Aprobado,
    Rechazado,
    Cancelado,
    Expirado,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceState::EnProgreso)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::EnProgreso => "en_progreso",
            InstanceState::Aprobado => "aprobado",
            InstanceState::Rechazado => "rechazado",
            InstanceState::Cancelado => "cancelado",
            InstanceState::Expirado => "expirado",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en_progreso" => Ok(InstanceState::EnProgreso),
            "aprobado" => Ok(InstanceState::Aprobado),
            "rechazado" => Ok(InstanceState::Rechazado),
            "cancelado" => Ok(InstanceState::Cancelado),
            "expirado" => Ok(InstanceState::Expirado),
            other => Err(format!("unknown instance state: {other}")),
        }
    }
}

/// Requester-assigned priority, for pending-queue ordering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum Priority {
    Baja,
    #[default]
    Normal,
    Alta,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Baja => "baja",
            Priority::Normal => "normal",
            Priority::Alta => "alta",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "baja" => Ok(Priority::Baja),
            "normal" => Ok(Priority::Normal),
            "alta" => Ok(Priority::Alta),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// One in-flight or completed execution of a definition against one entity.
///
/// References its definition by id (frozen at start time, so republishing never
/// alters in-flight instances). Mutated only by the engine through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub definition_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub state: InstanceState,
    pub current_node_id: String,
    pub requester_id: Uuid,
    pub priority: Priority,
    /// Entity fields captured at start time; conditions evaluate against this,
    /// never against live entity state.
    pub entity_snapshot: serde_json::Value,
    /// Set when a critical accion node failed; instance is parked for operator
    /// remediation and refuses decisions until cleared.
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    /// When the current node was entered; approval timeouts count from here.
    pub node_entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Ledger action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum HistoryAction {
    Iniciar,
    Avanzar,
    Aprobar,
    Rechazar,
    Expirar,
    Cancelar,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HistoryAction::Iniciar => "iniciar",
            HistoryAction::Avanzar => "avanzar",
            HistoryAction::Aprobar => "aprobar",
            HistoryAction::Rechazar => "rechazar",
            HistoryAction::Expirar => "expirar",
            HistoryAction::Cancelar => "cancelar",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "iniciar" => Ok(HistoryAction::Iniciar),
            "avanzar" => Ok(HistoryAction::Avanzar),
            "aprobar" => Ok(HistoryAction::Aprobar),
            "rechazar" => Ok(HistoryAction::Rechazar),
            "expirar" => Ok(HistoryAction::Expirar),
            "cancelar" => Ok(HistoryAction::Cancelar),
            other => Err(format!("unknown history action: {other}")),
        }
    }
}

/// Unsequenced history entry produced by the engine; the store assigns
/// sequence and timestamp on append.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    /// None = system (auto-advance, sweeper)
    pub actor_id: Option<Uuid>,
    pub node_id: String,
    pub comment: Option<String>,
}

/// Persisted, append-only audit event. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub sequence: i32,
    pub action: HistoryAction,
    pub actor_id: Option<Uuid>,
    pub node_id: String,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
