// Database rows (internal, may differ from public DTOs)
//
// Enum-ish columns (status, state, priority, action) are stored as text and
// parsed back through the core FromStr impls; the graph is stored as JSONB.

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use visto_core::{
    DefinitionStatus, Edge, HistoryAction, HistoryEvent, InstanceState, Node, Priority,
    WorkflowDefinition, WorkflowInstance,
};

// ============================================
// Definition rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct DefinitionRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entity_type: String,
    pub version: i32,
    pub name: String,
    pub status: String,
    pub nodes: sqlx::types::JsonValue,
    pub edges: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl DefinitionRow {
    pub fn into_domain(self) -> anyhow::Result<WorkflowDefinition> {
        let status: DefinitionStatus = self
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("bad definition status in database")?;
        let nodes: Vec<Node> =
            serde_json::from_value(self.nodes).context("bad node graph in database")?;
        let edges: Vec<Edge> =
            serde_json::from_value(self.edges).context("bad edge graph in database")?;
        Ok(WorkflowDefinition {
            id: self.id,
            organization_id: self.organization_id,
            entity_type: self.entity_type,
            version: self.version,
            name: self.name,
            status,
            nodes,
            edges,
            created_at: self.created_at,
            published_at: self.published_at,
        })
    }
}

// ============================================
// Instance rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct InstanceRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub definition_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub state: String,
    pub current_node_id: String,
    pub requester_id: Uuid,
    pub priority: String,
    pub entity_snapshot: sqlx::types::JsonValue,
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub node_entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstanceRow {
    pub fn into_domain(self) -> anyhow::Result<WorkflowInstance> {
        let state: InstanceState = self
            .state
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("bad instance state in database")?;
        let priority: Priority = self
            .priority
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("bad instance priority in database")?;
        Ok(WorkflowInstance {
            id: self.id,
            organization_id: self.organization_id,
            definition_id: self.definition_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            state,
            current_node_id: self.current_node_id,
            requester_id: self.requester_id,
            priority,
            entity_snapshot: self.entity_snapshot,
            error_flag: self.error_flag,
            last_error: self.last_error,
            started_at: self.started_at,
            node_entered_at: self.node_entered_at,
            completed_at: self.completed_at,
        })
    }
}

// ============================================
// History rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub sequence: i32,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub node_id: String,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl HistoryRow {
    pub fn into_domain(self) -> anyhow::Result<HistoryEvent> {
        let action: HistoryAction = self
            .action
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("bad history action in database")?;
        Ok(HistoryEvent {
            id: self.id,
            instance_id: self.instance_id,
            sequence: self.sequence,
            action,
            actor_id: self.actor_id,
            node_id: self.node_id,
            comment: self.comment,
            occurred_at: self.occurred_at,
        })
    }
}
