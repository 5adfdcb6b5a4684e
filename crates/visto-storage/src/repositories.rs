// Postgres repositories implementing the core store traits
//
// Uniqueness invariants (single published definition, single active instance)
// live in partial unique indexes; violations surface as Conflict so the
// gateway can map them like its own precondition checks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use visto_core::{
    DefinitionStatus, DefinitionStore, HistoryEntry, HistoryEvent, HistoryStore, InstanceFilter,
    InstancePatch, InstanceStore, VistoError, WorkflowDefinition, WorkflowInstance,
};

use crate::models::{DefinitionRow, HistoryRow, InstanceRow};

const DEFINITION_COLUMNS: &str = "id, organization_id, entity_type, version, name, status, nodes, edges, created_at, published_at";
const INSTANCE_COLUMNS: &str = "id, organization_id, definition_id, entity_type, entity_id, state, current_node_id, requester_id, priority, entity_snapshot, error_flag, last_error, started_at, node_entered_at, completed_at";
const HISTORY_COLUMNS: &str =
    "id, instance_id, sequence, action, actor_id, node_id, comment, occurred_at";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Postgres unique_violation is 23505
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn store_err(err: sqlx::Error, what: &str) -> VistoError {
    VistoError::Store(anyhow::Error::new(err).context(what.to_string()))
}

// ============================================
// Definitions
// ============================================

#[async_trait]
impl DefinitionStore for Database {
    async fn insert(&self, def: WorkflowDefinition) -> visto_core::Result<WorkflowDefinition> {
        let nodes = serde_json::to_value(&def.nodes).context("serialize nodes")?;
        let edges = serde_json::to_value(&def.edges).context("serialize edges")?;

        let row = sqlx::query_as::<_, DefinitionRow>(&format!(
            r#"
            INSERT INTO workflow_definitions (id, organization_id, entity_type, version, name, status, nodes, edges)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {DEFINITION_COLUMNS}
            "#,
        ))
        .bind(def.id)
        .bind(def.organization_id)
        .bind(&def.entity_type)
        .bind(def.version)
        .bind(&def.name)
        .bind(def.status.to_string())
        .bind(&nodes)
        .bind(&edges)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VistoError::conflict(format!(
                    "definition version {} already exists for '{}'",
                    def.version, def.entity_type
                ))
            } else {
                store_err(e, "insert definition")
            }
        })?;

        Ok(row.into_domain()?)
    }

    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> visto_core::Result<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, DefinitionRow>(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS}
            FROM workflow_definitions
            WHERE organization_id = $1 AND id = $2
            "#,
        ))
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(e, "get definition"))?;

        row.map(DefinitionRow::into_domain).transpose().map_err(Into::into)
    }

    async fn published_for(
        &self,
        organization_id: Uuid,
        entity_type: &str,
    ) -> visto_core::Result<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, DefinitionRow>(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS}
            FROM workflow_definitions
            WHERE organization_id = $1 AND entity_type = $2 AND status = 'published'
            "#,
        ))
        .bind(organization_id)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(e, "get published definition"))?;

        row.map(DefinitionRow::into_domain).transpose().map_err(Into::into)
    }

    async fn list(
        &self,
        organization_id: Uuid,
        entity_type: Option<&str>,
    ) -> visto_core::Result<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, DefinitionRow>(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS}
            FROM workflow_definitions
            WHERE organization_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
            ORDER BY entity_type ASC, version DESC
            "#,
        ))
        .bind(organization_id)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(e, "list definitions"))?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn latest_version(
        &self,
        organization_id: Uuid,
        entity_type: &str,
    ) -> visto_core::Result<i32> {
        let (version,): (i32,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(version), 0)
            FROM workflow_definitions
            WHERE organization_id = $1 AND entity_type = $2
            "#,
        )
        .bind(organization_id)
        .bind(entity_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_err(e, "latest definition version"))?;

        Ok(version)
    }

    async fn set_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: DefinitionStatus,
    ) -> visto_core::Result<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, DefinitionRow>(&format!(
            r#"
            UPDATE workflow_definitions
            SET status = $3,
                published_at = CASE WHEN $3 = 'published' THEN NOW() ELSE published_at END
            WHERE organization_id = $1 AND id = $2
            RETURNING {DEFINITION_COLUMNS}
            "#,
        ))
        .bind(organization_id)
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VistoError::conflict("another published definition exists for this entity type")
            } else {
                store_err(e, "set definition status")
            }
        })?;

        row.map(DefinitionRow::into_domain).transpose().map_err(Into::into)
    }
}

// ============================================
// Instances
// ============================================

#[async_trait]
impl InstanceStore for Database {
    async fn insert(&self, instance: WorkflowInstance) -> visto_core::Result<WorkflowInstance> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            INSERT INTO workflow_instances
                (id, organization_id, definition_id, entity_type, entity_id, state,
                 current_node_id, requester_id, priority, entity_snapshot,
                 error_flag, last_error, started_at, node_entered_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {INSTANCE_COLUMNS}
            "#,
        ))
        .bind(instance.id)
        .bind(instance.organization_id)
        .bind(instance.definition_id)
        .bind(&instance.entity_type)
        .bind(instance.entity_id)
        .bind(instance.state.to_string())
        .bind(&instance.current_node_id)
        .bind(instance.requester_id)
        .bind(instance.priority.to_string())
        .bind(&instance.entity_snapshot)
        .bind(instance.error_flag)
        .bind(&instance.last_error)
        .bind(instance.started_at)
        .bind(instance.node_entered_at)
        .bind(instance.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VistoError::conflict(format!(
                    "entity {} already has an in-progress workflow",
                    instance.entity_id
                ))
            } else {
                store_err(e, "insert instance")
            }
        })?;

        Ok(row.into_domain()?)
    }

    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> visto_core::Result<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE organization_id = $1 AND id = $2
            "#,
        ))
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(e, "get instance"))?;

        row.map(InstanceRow::into_domain).transpose().map_err(Into::into)
    }

    async fn active_for_entity(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
    ) -> visto_core::Result<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE organization_id = $1 AND entity_type = $2 AND entity_id = $3
              AND state = 'en_progreso'
            "#,
        ))
        .bind(organization_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(e, "get active instance"))?;

        row.map(InstanceRow::into_domain).transpose().map_err(Into::into)
    }

    async fn update_guarded(
        &self,
        organization_id: Uuid,
        id: Uuid,
        expected_state: visto_core::InstanceState,
        expected_node: &str,
        patch: InstancePatch,
    ) -> visto_core::Result<bool> {
        // Compare-and-set on (state, current_node_id); a concurrent decision
        // that already moved the instance makes this a no-op.
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET state = $5,
                current_node_id = $6,
                node_entered_at = $7,
                error_flag = $8,
                last_error = $9,
                completed_at = $10
            WHERE organization_id = $1 AND id = $2
              AND state = $3 AND current_node_id = $4
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .bind(expected_state.to_string())
        .bind(expected_node)
        .bind(patch.state.to_string())
        .bind(&patch.current_node_id)
        .bind(patch.node_entered_at)
        .bind(patch.error_flag)
        .bind(&patch.last_error)
        .bind(patch.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err(e, "update instance"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_in_progress(
        &self,
        organization_id: Uuid,
    ) -> visto_core::Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE organization_id = $1 AND state = 'en_progreso'
            ORDER BY started_at ASC
            "#,
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(e, "list in-progress instances"))?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn list_in_progress_all(&self) -> visto_core::Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE state = 'en_progreso'
            ORDER BY node_entered_at ASC
            "#,
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(e, "list in-progress instances"))?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn list_filtered(
        &self,
        organization_id: Uuid,
        filter: InstanceFilter,
    ) -> visto_core::Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE organization_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::text IS NULL OR state = $3)
              AND ($4::timestamptz IS NULL OR started_at >= $4)
              AND ($5::timestamptz IS NULL OR started_at <= $5)
            ORDER BY started_at DESC
            LIMIT $6 OFFSET $7
            "#,
        ))
        .bind(organization_id)
        .bind(&filter.entity_type)
        .bind(filter.state.map(|s| s.to_string()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(e, "list instances"))?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }
}

// ============================================
// History ledger
// ============================================

#[async_trait]
impl HistoryStore for Database {
    async fn append(
        &self,
        instance_id: Uuid,
        entries: Vec<HistoryEntry>,
    ) -> visto_core::Result<Vec<HistoryEvent>> {
        // One transaction per batch so sequences stay gapless and a partial
        // append never becomes visible.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err(e, "begin history transaction"))?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let row = sqlx::query_as::<_, HistoryRow>(&format!(
                r#"
                INSERT INTO workflow_history (id, instance_id, sequence, action, actor_id, node_id, comment)
                VALUES ($1, $2, COALESCE((SELECT MAX(sequence) + 1 FROM workflow_history WHERE instance_id = $2), 1), $3, $4, $5, $6)
                RETURNING {HISTORY_COLUMNS}
                "#,
            ))
            // Decision: UUIDv7 keeps ledger ids time-ordered
            .bind(Uuid::now_v7())
            .bind(instance_id)
            .bind(entry.action.to_string())
            .bind(entry.actor_id)
            .bind(&entry.node_id)
            .bind(&entry.comment)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| store_err(e, "append history event"))?;

            events.push(row.into_domain()?);
        }

        tx.commit()
            .await
            .map_err(|e| store_err(e, "commit history transaction"))?;

        Ok(events)
    }

    async fn list(&self, instance_id: Uuid) -> visto_core::Result<Vec<HistoryEvent>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"
            SELECT {HISTORY_COLUMNS}
            FROM workflow_history
            WHERE instance_id = $1
            ORDER BY sequence ASC
            "#,
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(e, "list history"))?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }
}
