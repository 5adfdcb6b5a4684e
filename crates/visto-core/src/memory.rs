// In-memory implementations for examples and testing
//
// These implementations keep all data in memory, making them perfect for:
// - Unit tests of the engine and gateway
// - Standalone examples that don't need a database
//
// The instance store enforces the same invariants as the Postgres layer:
// one non-terminal instance per entity, compare-and-set on mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, VistoError};
use crate::graph::{ApproverSpec, DefinitionStatus, WorkflowDefinition};
use crate::instance::{HistoryEntry, HistoryEvent, InstanceState, WorkflowInstance};
use crate::traits::{
    ActionExecutor, ApproverResolver, DefinitionStore, EntityResolver, EntitySummary,
    HistoryStore, InstanceFilter, InstancePatch, InstanceStore,
};

// ============================================================================
// InMemoryDefinitionStore
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryDefinitionStore {
    defs: Arc<RwLock<HashMap<Uuid, WorkflowDefinition>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn insert(&self, def: WorkflowDefinition) -> Result<WorkflowDefinition> {
        self.defs.write().await.insert(def.id, def.clone());
        Ok(def)
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<WorkflowDefinition>> {
        Ok(self
            .defs
            .read()
            .await
            .get(&id)
            .filter(|d| d.organization_id == organization_id)
            .cloned())
    }

    async fn published_for(
        &self,
        organization_id: Uuid,
        entity_type: &str,
    ) -> Result<Option<WorkflowDefinition>> {
        Ok(self
            .defs
            .read()
            .await
            .values()
            .find(|d| {
                d.organization_id == organization_id
                    && d.entity_type == entity_type
                    && d.status == DefinitionStatus::Published
            })
            .cloned())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        entity_type: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>> {
        let mut defs: Vec<_> = self
            .defs
            .read()
            .await
            .values()
            .filter(|d| d.organization_id == organization_id)
            .filter(|d| entity_type.map(|t| d.entity_type == t).unwrap_or(true))
            .cloned()
            .collect();
        defs.sort_by(|a, b| (&a.entity_type, a.version).cmp(&(&b.entity_type, b.version)));
        Ok(defs)
    }

    async fn latest_version(&self, organization_id: Uuid, entity_type: &str) -> Result<i32> {
        Ok(self
            .defs
            .read()
            .await
            .values()
            .filter(|d| d.organization_id == organization_id && d.entity_type == entity_type)
            .map(|d| d.version)
            .max()
            .unwrap_or(0))
    }

    async fn set_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: DefinitionStatus,
    ) -> Result<Option<WorkflowDefinition>> {
        let mut defs = self.defs.write().await;
        match defs.get_mut(&id).filter(|d| d.organization_id == organization_id) {
            Some(def) => {
                def.status = status;
                if status == DefinitionStatus::Published {
                    def.published_at = Some(Utc::now());
                }
                Ok(Some(def.clone()))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// InMemoryInstanceStore
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryInstanceStore {
    instances: Arc<RwLock<HashMap<Uuid, WorkflowInstance>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn insert(&self, instance: WorkflowInstance) -> Result<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        let duplicate = instances.values().any(|i| {
            i.organization_id == instance.organization_id
                && i.entity_type == instance.entity_type
                && i.entity_id == instance.entity_id
                && !i.state.is_terminal()
        });
        if duplicate {
            return Err(VistoError::conflict(format!(
                "entity {}/{} already has an active instance",
                instance.entity_type, instance.entity_id
            )));
        }
        instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .get(&id)
            .filter(|i| i.organization_id == organization_id)
            .cloned())
    }

    async fn active_for_entity(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .find(|i| {
                i.organization_id == organization_id
                    && i.entity_type == entity_type
                    && i.entity_id == entity_id
                    && !i.state.is_terminal()
            })
            .cloned())
    }

    async fn update_guarded(
        &self,
        organization_id: Uuid,
        id: Uuid,
        expected_state: InstanceState,
        expected_node: &str,
        patch: InstancePatch,
    ) -> Result<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&id) {
            Some(i)
                if i.organization_id == organization_id
                    && i.state == expected_state
                    && i.current_node_id == expected_node =>
            {
                i.state = patch.state;
                i.current_node_id = patch.current_node_id;
                i.node_entered_at = patch.node_entered_at;
                i.error_flag = patch.error_flag;
                i.last_error = patch.last_error;
                i.completed_at = patch.completed_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_in_progress(&self, organization_id: Uuid) -> Result<Vec<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.organization_id == organization_id && !i.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_in_progress_all(&self) -> Result<Vec<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| !i.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_filtered(
        &self,
        organization_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>> {
        let mut items: Vec<_> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.organization_id == organization_id)
            .filter(|i| {
                filter
                    .entity_type
                    .as_deref()
                    .map(|t| i.entity_type == t)
                    .unwrap_or(true)
            })
            .filter(|i| filter.state.map(|s| i.state == s).unwrap_or(true))
            .filter(|i| filter.from.map(|f| i.started_at >= f).unwrap_or(true))
            .filter(|i| filter.to.map(|t| i.started_at <= t).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let limit = if filter.limit <= 0 { 20 } else { filter.limit } as usize;
        Ok(items
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(limit)
            .collect())
    }
}

// ============================================================================
// InMemoryHistoryStore
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryHistoryStore {
    events: Arc<RwLock<HashMap<Uuid, Vec<HistoryEvent>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(
        &self,
        instance_id: Uuid,
        entries: Vec<HistoryEntry>,
    ) -> Result<Vec<HistoryEvent>> {
        let mut events = self.events.write().await;
        let ledger = events.entry(instance_id).or_default();
        let mut appended = Vec::with_capacity(entries.len());
        for entry in entries {
            let sequence = ledger.last().map(|e| e.sequence + 1).unwrap_or(1);
            let event = HistoryEvent {
                id: Uuid::now_v7(),
                instance_id,
                sequence,
                action: entry.action,
                actor_id: entry.actor_id,
                node_id: entry.node_id,
                comment: entry.comment,
                occurred_at: Utc::now(),
            };
            ledger.push(event.clone());
            appended.push(event);
        }
        Ok(appended)
    }

    async fn list(&self, instance_id: Uuid) -> Result<Vec<HistoryEvent>> {
        Ok(self
            .events
            .read()
            .await
            .get(&instance_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Collaborator implementations for tests and examples
// ============================================================================

/// Entity resolver backed by a static map; unknown entities get a folio
/// derived from their id.
#[derive(Debug, Default, Clone)]
pub struct StaticEntityResolver {
    summaries: Arc<RwLock<HashMap<Uuid, EntitySummary>>>,
}

impl StaticEntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, entity_id: Uuid, summary: EntitySummary) {
        self.summaries.write().await.insert(entity_id, summary);
    }
}

#[async_trait]
impl EntityResolver for StaticEntityResolver {
    async fn resolve_summary(
        &self,
        _organization_id: Uuid,
        _entity_type: &str,
        entity_id: Uuid,
    ) -> Result<EntitySummary> {
        Ok(self
            .summaries
            .read()
            .await
            .get(&entity_id)
            .cloned()
            .unwrap_or(EntitySummary {
                folio: entity_id.to_string(),
                total: None,
                counterparty_name: None,
                item_count: None,
                extra: serde_json::Value::Null,
            }))
    }
}

/// Approver resolver over an in-memory membership directory.
#[derive(Debug, Default, Clone)]
pub struct DirectoryApproverResolver {
    roles: Arc<RwLock<HashMap<Uuid, HashSet<String>>>>,
    groups: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

impl DirectoryApproverResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant_role(&self, actor_id: Uuid, role: impl Into<String>) {
        self.roles
            .write()
            .await
            .entry(actor_id)
            .or_default()
            .insert(role.into());
    }

    pub async fn add_to_group(&self, actor_id: Uuid, group_id: Uuid) {
        self.groups
            .write()
            .await
            .entry(actor_id)
            .or_default()
            .insert(group_id);
    }
}

#[async_trait]
impl ApproverResolver for DirectoryApproverResolver {
    async fn matches(
        &self,
        _organization_id: Uuid,
        spec: &ApproverSpec,
        actor_id: Uuid,
    ) -> Result<bool> {
        match spec {
            ApproverSpec::Usuario(id) => Ok(*id == actor_id),
            ApproverSpec::Rol(role) => Ok(self
                .roles
                .read()
                .await
                .get(&actor_id)
                .map(|r| r.contains(role))
                .unwrap_or(false)),
            ApproverSpec::Grupo(group) => Ok(self
                .groups
                .read()
                .await
                .get(&actor_id)
                .map(|g| g.contains(group))
                .unwrap_or(false)),
        }
    }
}

/// Action executor that records every call and succeeds.
#[derive(Debug, Default, Clone)]
pub struct RecordingActionExecutor {
    calls: Arc<RwLock<Vec<String>>>,
}

impl RecordingActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn executed(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingActionExecutor {
    async fn execute(
        &self,
        _organization_id: Uuid,
        tipo_accion: &str,
        _params: &serde_json::Value,
        _entity_snapshot: &serde_json::Value,
    ) -> Result<()> {
        self.calls.write().await.push(tipo_accion.to_string());
        Ok(())
    }
}

/// Action executor that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingActionExecutor;

#[async_trait]
impl ActionExecutor for FailingActionExecutor {
    async fn execute(
        &self,
        _organization_id: Uuid,
        tipo_accion: &str,
        _params: &serde_json::Value,
        _entity_snapshot: &serde_json::Value,
    ) -> Result<()> {
        Err(VistoError::ActionExecution(format!(
            "action '{tipo_accion}' failed"
        )))
    }
}

/// Action executor that does nothing. For tests that exercise wiring rather
/// than action side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActionExecutor;

#[async_trait]
impl ActionExecutor for NoopActionExecutor {
    async fn execute(
        &self,
        _organization_id: Uuid,
        _tipo_accion: &str,
        _params: &serde_json::Value,
        _entity_snapshot: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }
}
