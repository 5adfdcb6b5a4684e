// Default collaborator wiring for a standalone deployment
//
// The engine's collaborator seams (entity summaries, approver membership,
// accion side effects) normally point at the owning application. When this
// service runs standalone these implementations cover the gap:
// - summaries are derived from the frozen entity snapshot
// - approver membership comes from a JSON directory file
// - acciones are logged, with an opt-in failure switch for drills

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use visto_core::{
    ActionExecutor, ApproverResolver, ApproverSpec, EntityResolver, EntitySummary, InstanceStore,
    Result, VistoError,
};

// ============================================
// Entity summaries from the frozen snapshot
// ============================================

/// Resolves entity summaries from the snapshot frozen at instance start.
/// Deployments embedded next to an ERP replace this with a live resolver.
pub struct SnapshotEntityResolver {
    instances: Arc<dyn InstanceStore>,
}

impl SnapshotEntityResolver {
    pub fn new(instances: Arc<dyn InstanceStore>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl EntityResolver for SnapshotEntityResolver {
    async fn resolve_summary(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<EntitySummary> {
        let snapshot = self
            .instances
            .active_for_entity(organization_id, entity_type, entity_id)
            .await?
            .map(|i| i.entity_snapshot)
            .unwrap_or_default();

        Ok(EntitySummary {
            folio: snapshot
                .get("folio")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| entity_id.to_string()),
            total: snapshot.get("total").and_then(|v| v.as_f64()),
            counterparty_name: snapshot
                .get("proveedor")
                .or_else(|| snapshot.get("counterparty"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            item_count: snapshot.get("item_count").and_then(|v| v.as_i64()),
            extra: serde_json::Value::Null,
        })
    }
}

// ============================================
// Approver directory from a JSON file
// ============================================

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    roles: HashMap<String, Vec<Uuid>>,
    #[serde(default)]
    groups: HashMap<Uuid, Vec<Uuid>>,
}

/// Approver membership loaded once at startup from APPROVER_DIRECTORY_PATH.
/// Without a directory only direct user approvers can match.
pub struct FileDirectoryResolver {
    directory: DirectoryFile,
}

impl FileDirectoryResolver {
    pub fn empty() -> Self {
        Self {
            directory: DirectoryFile::default(),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read approver directory {}", path.display()))?;
        let directory =
            serde_json::from_str(&raw).context("parse approver directory")?;
        Ok(Self { directory })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("APPROVER_DIRECTORY_PATH") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => {
                tracing::warn!(
                    "APPROVER_DIRECTORY_PATH not set; only direct user approvers will match"
                );
                Ok(Self::empty())
            }
        }
    }
}

#[async_trait]
impl ApproverResolver for FileDirectoryResolver {
    async fn matches(
        &self,
        _organization_id: Uuid,
        spec: &ApproverSpec,
        actor_id: Uuid,
    ) -> Result<bool> {
        Ok(match spec {
            ApproverSpec::Usuario(id) => *id == actor_id,
            ApproverSpec::Rol(role) => self
                .directory
                .roles
                .get(role)
                .is_some_and(|members| members.contains(&actor_id)),
            ApproverSpec::Grupo(group_id) => self
                .directory
                .groups
                .get(group_id)
                .is_some_and(|members| members.contains(&actor_id)),
        })
    }
}

// ============================================
// Logging action executor
// ============================================

/// Logs each accion instead of calling out. Params with `"simular_fallo": true`
/// fail on purpose so remediation flows can be exercised end to end.
pub struct LoggingActionExecutor;

#[async_trait]
impl ActionExecutor for LoggingActionExecutor {
    async fn execute(
        &self,
        organization_id: Uuid,
        tipo_accion: &str,
        params: &serde_json::Value,
        _entity_snapshot: &serde_json::Value,
    ) -> Result<()> {
        if params
            .get("simular_fallo")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return Err(VistoError::ActionExecution(format!(
                "accion '{tipo_accion}' failed (simular_fallo)"
            )));
        }

        tracing::info!(
            organization_id = %organization_id,
            tipo_accion = %tipo_accion,
            params = %params,
            "accion executed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visto_core::InMemoryInstanceStore;

    #[tokio::test]
    async fn directory_matches_roles_and_users() {
        let actor = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut roles = HashMap::new();
        roles.insert("gerente".to_string(), vec![actor]);
        let resolver = FileDirectoryResolver {
            directory: DirectoryFile {
                roles,
                groups: HashMap::new(),
            },
        };

        let org = Uuid::now_v7();
        assert!(resolver
            .matches(org, &ApproverSpec::Rol("gerente".to_string()), actor)
            .await
            .unwrap());
        assert!(!resolver
            .matches(org, &ApproverSpec::Rol("gerente".to_string()), other)
            .await
            .unwrap());
        assert!(resolver
            .matches(org, &ApproverSpec::Usuario(actor), actor)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn snapshot_resolver_falls_back_to_entity_id() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let resolver = SnapshotEntityResolver::new(store);
        let entity_id = Uuid::now_v7();

        let summary = resolver
            .resolve_summary(Uuid::now_v7(), "orden_compra", entity_id)
            .await
            .unwrap();
        assert_eq!(summary.folio, entity_id.to_string());
    }

    #[tokio::test]
    async fn simulated_failure_is_reported() {
        let executor = LoggingActionExecutor;
        let err = executor
            .execute(
                Uuid::now_v7(),
                "notificar",
                &serde_json::json!({"simular_fallo": true}),
                &serde_json::json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::ActionExecution(_)));
    }
}
