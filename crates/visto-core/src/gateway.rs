// Approval Gateway: the transactional boundary exposed to collaborators.
//
// Orchestrates definition lifecycle (draft -> published -> archived), instance
// start/approve/reject/cancel, the pending queue, history queries and the
// timeout sweep. All preconditions are checked against a freshly loaded
// instance before any mutation; every mutation appends its ledger entries and
// then writes the instance under a compare-and-set on the (state,
// current_node_id) that was read. A CAS miss surfaces as a state error and the
// caller must re-fetch.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::engine::{Engine, Transition, WorkflowEvent};
use crate::error::{Result, VistoError};
use crate::graph::{DefinitionStatus, Edge, Node, NodeKind, WorkflowDefinition};
use crate::instance::{HistoryEvent, InstanceState, Priority, WorkflowInstance};
use crate::replay::replay;
use crate::traits::{
    ActionExecutor, ApproverResolver, DefinitionStore, EntityResolver, EntitySummary,
    HistoryStore, InstanceFilter, InstancePatch, InstanceStore,
};
use crate::validator::validate;

/// Minimum length of a rejection motive, enforced at the boundary.
const MIN_MOTIVO_LEN: usize = 10;

/// Already-authenticated caller identity. Admin status is asserted by the
/// surrounding system, never derived here.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(id: Uuid) -> Self {
        Self {
            id,
            is_admin: false,
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self { id, is_admin: true }
    }
}

/// Re-export of the store-level filter under its gateway-facing name.
pub type HistoryFilter = InstanceFilter;

/// Pending-queue item: instance plus display data.
#[derive(Debug, Clone)]
pub struct PendingInstance {
    pub instance: WorkflowInstance,
    pub summary: EntitySummary,
    pub node_name: Option<String>,
    /// When the current approval node times out, if configured
    pub deadline: Option<DateTime<Utc>>,
}

/// Detail view: instance, full ledger and a fresh entity summary (the live
/// summary may drift from the snapshot taken at start; callers show both).
#[derive(Debug, Clone)]
pub struct InstanceDetail {
    pub instance: WorkflowInstance,
    pub history: Vec<HistoryEvent>,
    pub summary: EntitySummary,
}

/// Request to start an instance.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub requester_id: Uuid,
    pub entity_snapshot: serde_json::Value,
    pub priority: Priority,
}

#[derive(Clone)]
pub struct ApprovalGateway {
    definitions: Arc<dyn DefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    history: Arc<dyn HistoryStore>,
    entities: Arc<dyn EntityResolver>,
    approvers: Arc<dyn ApproverResolver>,
    actions: Arc<dyn ActionExecutor>,
}

impl ApprovalGateway {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        history: Arc<dyn HistoryStore>,
        entities: Arc<dyn EntityResolver>,
        approvers: Arc<dyn ApproverResolver>,
        actions: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            definitions,
            instances,
            history,
            entities,
            approvers,
            actions,
        }
    }

    // ========================================================================
    // Definition lifecycle
    // ========================================================================

    /// Create a new draft definition with the next version number for its
    /// (organization, entity_type).
    pub async fn create_definition(
        &self,
        organization_id: Uuid,
        entity_type: String,
        name: String,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<WorkflowDefinition> {
        if entity_type.trim().is_empty() {
            return Err(VistoError::invalid("entity_type must not be empty"));
        }
        let version = self
            .definitions
            .latest_version(organization_id, &entity_type)
            .await?
            + 1;
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            organization_id,
            entity_type,
            version,
            name,
            status: DefinitionStatus::Draft,
            nodes,
            edges,
            created_at: Utc::now(),
            published_at: None,
        };
        self.definitions.insert(def).await
    }

    pub async fn get_definition(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowDefinition> {
        self.definitions
            .get(organization_id, id)
            .await?
            .ok_or_else(|| VistoError::NotFound(format!("definition {id} not found")))
    }

    pub async fn list_definitions(
        &self,
        organization_id: Uuid,
        entity_type: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>> {
        self.definitions.list(organization_id, entity_type).await
    }

    /// Validate and publish a draft. Archives the previously published version
    /// for the same entity type. Structural violations are surfaced whole and
    /// nothing is applied.
    pub async fn publish_definition(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowDefinition> {
        let def = self.get_definition(organization_id, id).await?;
        if def.status != DefinitionStatus::Draft {
            return Err(VistoError::state(format!(
                "definition {id} is {}, only drafts can be published",
                def.status
            )));
        }
        validate(&def).map_err(VistoError::Validation)?;

        if let Some(previous) = self
            .definitions
            .published_for(organization_id, &def.entity_type)
            .await?
        {
            self.definitions
                .set_status(organization_id, previous.id, DefinitionStatus::Archived)
                .await?;
            tracing::info!(
                definition_id = %previous.id,
                version = previous.version,
                "archived previously published definition"
            );
        }

        let published = self
            .definitions
            .set_status(organization_id, id, DefinitionStatus::Published)
            .await?
            .ok_or_else(|| VistoError::NotFound(format!("definition {id} not found")))?;
        tracing::info!(
            definition_id = %id,
            entity_type = %published.entity_type,
            version = published.version,
            "definition published"
        );
        Ok(published)
    }

    pub async fn archive_definition(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowDefinition> {
        self.definitions
            .set_status(organization_id, id, DefinitionStatus::Archived)
            .await?
            .ok_or_else(|| VistoError::NotFound(format!("definition {id} not found")))
    }

    // ========================================================================
    // Instance lifecycle
    // ========================================================================

    /// Start an instance against the published definition for the entity type.
    pub async fn start(
        &self,
        organization_id: Uuid,
        req: StartRequest,
    ) -> Result<WorkflowInstance> {
        let def = self
            .definitions
            .published_for(organization_id, &req.entity_type)
            .await?
            .ok_or_else(|| VistoError::definition_not_found(&req.entity_type))?;

        if self
            .instances
            .active_for_entity(organization_id, &req.entity_type, req.entity_id)
            .await?
            .is_some()
        {
            return Err(VistoError::conflict(format!(
                "entity {}/{} already has an active instance",
                req.entity_type, req.entity_id
            )));
        }

        let start_node = def
            .start_node()
            .ok_or_else(|| VistoError::Engine("published definition has no inicio node".into()))?;

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: Uuid::now_v7(),
            organization_id,
            definition_id: def.id,
            entity_type: req.entity_type,
            entity_id: req.entity_id,
            state: InstanceState::EnProgreso,
            current_node_id: start_node.id.clone(),
            requester_id: req.requester_id,
            priority: req.priority,
            entity_snapshot: req.entity_snapshot,
            error_flag: false,
            last_error: None,
            started_at: now,
            node_entered_at: now,
            completed_at: None,
        };
        let instance = self.instances.insert(instance).await?;

        let transition = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Iniciar {
                    requester_id: instance.requester_id,
                },
                self.actions.as_ref(),
            )
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            entity_type = %instance.entity_type,
            entity_id = %instance.entity_id,
            "workflow instance started"
        );
        self.persist(&instance, transition).await
    }

    /// Approve the current aprobacion node.
    pub async fn approve(
        &self,
        organization_id: Uuid,
        instance_id: Uuid,
        actor: Actor,
        comment: Option<String>,
    ) -> Result<WorkflowInstance> {
        let (instance, def) = self.load_for_decision(organization_id, instance_id).await?;
        self.authorize_decision(&instance, &def, actor).await?;

        let transition = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Aprobar {
                    actor_id: actor.id,
                    comment,
                },
                self.actions.as_ref(),
            )
            .await?;

        tracing::info!(instance_id = %instance_id, actor_id = %actor.id, "instance approved");
        self.persist(&instance, transition).await
    }

    /// Reject the current aprobacion node. `motivo` is required and must be at
    /// least 10 characters; checked before any state mutation.
    pub async fn reject(
        &self,
        organization_id: Uuid,
        instance_id: Uuid,
        actor: Actor,
        motivo: String,
    ) -> Result<WorkflowInstance> {
        if motivo.trim().chars().count() < MIN_MOTIVO_LEN {
            return Err(VistoError::invalid(format!(
                "motivo must be at least {MIN_MOTIVO_LEN} characters"
            )));
        }

        let (instance, def) = self.load_for_decision(organization_id, instance_id).await?;
        self.authorize_decision(&instance, &def, actor).await?;

        let transition = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Rechazar {
                    actor_id: actor.id,
                    motivo,
                },
                self.actions.as_ref(),
            )
            .await?;

        tracing::info!(instance_id = %instance_id, actor_id = %actor.id, "instance rejected");
        self.persist(&instance, transition).await
    }

    /// Cancel an in-progress instance. Requester or admin only.
    pub async fn cancel(
        &self,
        organization_id: Uuid,
        instance_id: Uuid,
        actor: Actor,
        motivo: Option<String>,
    ) -> Result<WorkflowInstance> {
        let instance = self.get_instance(organization_id, instance_id).await?;
        if instance.state != InstanceState::EnProgreso {
            return Err(VistoError::state(format!(
                "instance is {}, only en_progreso instances can be cancelled",
                instance.state
            )));
        }
        if actor.id != instance.requester_id && !actor.is_admin {
            return Err(VistoError::unauthorized(
                "only the requester or an administrator may cancel",
            ));
        }

        let def = self
            .get_definition(organization_id, instance.definition_id)
            .await?;
        let transition = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Cancelar {
                    actor_id: actor.id,
                    motivo,
                },
                self.actions.as_ref(),
            )
            .await?;

        tracing::info!(instance_id = %instance_id, actor_id = %actor.id, "instance cancelled");
        self.persist(&instance, transition).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_instance(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowInstance> {
        self.instances
            .get(organization_id, id)
            .await?
            .ok_or_else(|| VistoError::instance_not_found(id))
    }

    /// All non-terminal instances whose current approval node matches the
    /// actor, plus error-flagged instances for administrators.
    pub async fn pending(&self, organization_id: Uuid, actor: Actor) -> Result<Vec<PendingInstance>> {
        let mut result = Vec::new();
        for instance in self.instances.list_in_progress(organization_id).await? {
            let def = match self
                .definitions
                .get(organization_id, instance.definition_id)
                .await?
            {
                Some(d) => d,
                None => {
                    tracing::warn!(
                        instance_id = %instance.id,
                        definition_id = %instance.definition_id,
                        "instance references missing definition"
                    );
                    continue;
                }
            };
            let node = match def.node(&instance.current_node_id) {
                Some(n) => n,
                None => continue,
            };

            let include = if instance.error_flag {
                actor.is_admin
            } else if let NodeKind::Aprobacion { aprobador, .. } = &node.kind {
                self.approvers
                    .matches(organization_id, aprobador, actor.id)
                    .await?
            } else {
                false
            };
            if !include {
                continue;
            }

            let deadline = match &node.kind {
                NodeKind::Aprobacion {
                    timeout_horas: Some(h),
                    ..
                } => Some(instance.node_entered_at + Duration::hours(*h as i64)),
                _ => None,
            };
            let summary = self
                .entities
                .resolve_summary(organization_id, &instance.entity_type, instance.entity_id)
                .await?;
            result.push(PendingInstance {
                node_name: node.nombre.clone(),
                deadline,
                summary,
                instance,
            });
        }
        // Highest priority first, oldest first within a priority
        result.sort_by(|a, b| {
            (b.instance.priority as u8, a.instance.started_at)
                .cmp(&(a.instance.priority as u8, b.instance.started_at))
        });
        Ok(result)
    }

    pub async fn list_instances(
        &self,
        organization_id: Uuid,
        filter: HistoryFilter,
    ) -> Result<Vec<WorkflowInstance>> {
        self.instances.list_filtered(organization_id, filter).await
    }

    /// Detail view with full ledger and a fresh entity summary.
    pub async fn detail(&self, organization_id: Uuid, instance_id: Uuid) -> Result<InstanceDetail> {
        let instance = self.get_instance(organization_id, instance_id).await?;
        let history = self.history.list(instance_id).await?;
        let summary = self
            .entities
            .resolve_summary(organization_id, &instance.entity_type, instance.entity_id)
            .await?;
        Ok(InstanceDetail {
            instance,
            history,
            summary,
        })
    }

    // ========================================================================
    // Timeout sweep
    // ========================================================================

    /// One sweep pass: expire or escalate every approval past its deadline.
    /// Idempotent; a concurrent decision wins the CAS and the sweep skips.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut swept = 0usize;
        for instance in self.instances.list_in_progress_all().await? {
            if instance.error_flag {
                continue;
            }
            // One bad instance must never starve the rest of the pass
            let def = match self
                .definitions
                .get(instance.organization_id, instance.definition_id)
                .await
            {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(instance_id = %instance.id, error = %e, "sweep failed to load definition, skipping instance");
                    continue;
                }
            };
            let overdue = match def.node(&instance.current_node_id).map(|n| &n.kind) {
                Some(NodeKind::Aprobacion {
                    timeout_horas: Some(h),
                    ..
                }) => now >= instance.node_entered_at + Duration::hours(*h as i64),
                _ => false,
            };
            if !overdue {
                continue;
            }

            let transition = match Engine::new(&def)
                .advance(&instance, WorkflowEvent::Timeout, self.actions.as_ref())
                .await
            {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(instance_id = %instance.id, error = %e, "sweep failed to advance instance, skipping");
                    continue;
                }
            };
            match self.persist(&instance, transition).await {
                Ok(updated) => {
                    swept += 1;
                    tracing::info!(
                        instance_id = %instance.id,
                        state = %updated.state,
                        current_node_id = %updated.current_node_id,
                        "overdue approval swept"
                    );
                }
                Err(VistoError::State(_)) => {
                    // Lost the CAS to a concurrent decision; nothing to do
                    tracing::debug!(instance_id = %instance.id, "sweep skipped, instance advanced concurrently");
                }
                Err(e) => {
                    tracing::error!(instance_id = %instance.id, error = %e, "sweep failed to persist transition, skipping");
                }
            }
        }
        Ok(swept)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Recompute the instance projection from its ledger and repair it if a
    /// crash left the stored (state, current_node_id) behind. Returns true if
    /// a repair was written.
    pub async fn reconcile(&self, organization_id: Uuid, instance_id: Uuid) -> Result<bool> {
        let instance = self.get_instance(organization_id, instance_id).await?;
        let def = self
            .get_definition(organization_id, instance.definition_id)
            .await?;
        let events = self.history.list(instance_id).await?;
        let (state, current_node_id) = replay(&def, &instance, &events).await?;

        if state == instance.state && current_node_id == instance.current_node_id {
            return Ok(false);
        }

        tracing::warn!(
            instance_id = %instance_id,
            stored_state = %instance.state,
            replayed_state = %state,
            stored_node = %instance.current_node_id,
            replayed_node = %current_node_id,
            "instance drifted from ledger, repairing"
        );
        let patch = InstancePatch {
            state,
            current_node_id,
            node_entered_at: Utc::now(),
            error_flag: instance.error_flag,
            last_error: instance.last_error.clone(),
            completed_at: if state.is_terminal() {
                instance.completed_at.or_else(|| Some(Utc::now()))
            } else {
                None
            },
        };
        self.instances
            .update_guarded(
                organization_id,
                instance_id,
                instance.state,
                &instance.current_node_id,
                patch,
            )
            .await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Load an instance and its frozen definition, verifying it can still
    /// receive a human decision.
    async fn load_for_decision(
        &self,
        organization_id: Uuid,
        instance_id: Uuid,
    ) -> Result<(WorkflowInstance, WorkflowDefinition)> {
        let instance = self.get_instance(organization_id, instance_id).await?;
        if instance.state != InstanceState::EnProgreso {
            return Err(VistoError::state(format!(
                "instance is {}, no further decisions accepted",
                instance.state
            )));
        }
        if instance.error_flag {
            return Err(VistoError::state(
                "instance is parked for operator remediation",
            ));
        }
        let def = self
            .get_definition(organization_id, instance.definition_id)
            .await?;
        Ok((instance, def))
    }

    /// Approver predicate + self-approval check for the current node.
    async fn authorize_decision(
        &self,
        instance: &WorkflowInstance,
        def: &WorkflowDefinition,
        actor: Actor,
    ) -> Result<()> {
        let node = def.node(&instance.current_node_id).ok_or_else(|| {
            VistoError::Engine(format!(
                "instance parked on unknown node '{}'",
                instance.current_node_id
            ))
        })?;
        let (aprobador, permitir_auto) = match &node.kind {
            NodeKind::Aprobacion {
                aprobador,
                permitir_auto_aprobacion,
                ..
            } => (aprobador, *permitir_auto_aprobacion),
            other => {
                return Err(VistoError::state(format!(
                    "instance is parked on a '{}' node, not awaiting a decision",
                    other.name()
                )))
            }
        };

        if actor.id == instance.requester_id && !permitir_auto {
            return Err(VistoError::unauthorized(
                "requester may not approve their own request",
            ));
        }
        if !self
            .approvers
            .matches(instance.organization_id, aprobador, actor.id)
            .await?
        {
            return Err(VistoError::unauthorized(
                "actor is not an eligible approver for this node",
            ));
        }
        Ok(())
    }

    /// Append ledger entries, then write the instance under CAS on what was
    /// read. Ledger first: a crash before the instance write is repaired by
    /// reconcile().
    async fn persist(
        &self,
        instance: &WorkflowInstance,
        transition: Transition,
    ) -> Result<WorkflowInstance> {
        self.history
            .append(instance.id, transition.history)
            .await?;
        let patch = InstancePatch {
            state: transition.state,
            current_node_id: transition.current_node_id,
            node_entered_at: transition.node_entered_at,
            error_flag: transition.error_flag,
            last_error: transition.last_error,
            completed_at: transition.completed_at,
        };
        let updated = self
            .instances
            .update_guarded(
                instance.organization_id,
                instance.id,
                instance.state,
                &instance.current_node_id,
                patch,
            )
            .await?;
        if !updated {
            return Err(VistoError::state(
                "instance changed concurrently; re-fetch and retry",
            ));
        }
        self.get_instance(instance.organization_id, instance.id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::*;
    use crate::instance::HistoryAction;
    use crate::memory::{
        DirectoryApproverResolver, FailingActionExecutor, InMemoryDefinitionStore,
        InMemoryHistoryStore, InMemoryInstanceStore, RecordingActionExecutor,
        StaticEntityResolver,
    };
    use serde_json::json;

    struct Fixture {
        gateway: ApprovalGateway,
        definitions: Arc<InMemoryDefinitionStore>,
        instances: Arc<InMemoryInstanceStore>,
        history: Arc<InMemoryHistoryStore>,
        approvers: Arc<DirectoryApproverResolver>,
        actions: Arc<RecordingActionExecutor>,
        org: Uuid,
    }

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.into(),
            nombre: None,
            kind,
        }
    }

    fn edge(id: &str, source: &str, label: EdgeLabel, target: &str) -> Edge {
        Edge {
            id: id.into(),
            source: source.into(),
            label,
            target: target.into(),
        }
    }

    fn approval_nodes(
        timeout_horas: Option<u32>,
        permitir_auto_aprobacion: bool,
    ) -> (Vec<Node>, Vec<Edge>) {
        (
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "a1",
                    NodeKind::Aprobacion {
                        aprobador: ApproverSpec::Rol("gerente".into()),
                        timeout_horas,
                        permitir_auto_aprobacion,
                    },
                ),
                node(
                    "ok",
                    NodeKind::Fin {
                        resultado: TerminalOutcome::Aprobado,
                    },
                ),
                node(
                    "ko",
                    NodeKind::Fin {
                        resultado: TerminalOutcome::Rechazado,
                    },
                ),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "a1"),
                edge("e2", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e3", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        )
    }

    fn fixture() -> Fixture {
        let definitions = Arc::new(InMemoryDefinitionStore::new());
        let instances = Arc::new(InMemoryInstanceStore::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let approvers = Arc::new(DirectoryApproverResolver::new());
        let actions = Arc::new(RecordingActionExecutor::new());
        let gateway = ApprovalGateway::new(
            definitions.clone(),
            instances.clone(),
            history.clone(),
            Arc::new(StaticEntityResolver::new()),
            approvers.clone(),
            actions.clone(),
        );
        Fixture {
            gateway,
            definitions,
            instances,
            history,
            approvers,
            actions,
            org: Uuid::now_v7(),
        }
    }

    async fn publish(f: &Fixture, nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDefinition {
        let def = f
            .gateway
            .create_definition(
                f.org,
                "orden_compra".into(),
                "compras".into(),
                nodes,
                edges,
            )
            .await
            .unwrap();
        f.gateway.publish_definition(f.org, def.id).await.unwrap()
    }

    fn start_request(requester: Uuid) -> StartRequest {
        StartRequest {
            entity_type: "orden_compra".into(),
            entity_id: Uuid::now_v7(),
            requester_id: requester,
            entity_snapshot: json!({"total": 1200, "moneda": "MXN"}),
            priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn start_without_published_definition_is_not_found() {
        let f = fixture();
        let err = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::NotFound(_)));
    }

    #[tokio::test]
    async fn approve_scenario_reaches_approved_with_two_events() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let requester = Uuid::now_v7();
        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;

        let instance = f.gateway.start(f.org, start_request(requester)).await.unwrap();
        assert_eq!(instance.state, InstanceState::EnProgreso);
        assert_eq!(instance.current_node_id, "a1");

        let updated = f
            .gateway
            .approve(f.org, instance.id, Actor::user(approver), None)
            .await
            .unwrap();
        assert_eq!(updated.state, InstanceState::Aprobado);
        assert_eq!(updated.current_node_id, "ok");
        assert!(updated.completed_at.is_some());

        let events = f.history.list(instance.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, HistoryAction::Iniciar);
        assert_eq!(events[1].action, HistoryAction::Aprobar);
    }

    #[tokio::test]
    async fn second_start_for_same_entity_conflicts() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let mut req = start_request(Uuid::now_v7());
        req.entity_id = Uuid::now_v7();
        f.gateway.start(f.org, req.clone()).await.unwrap();

        let err = f.gateway.start(f.org, req).await.unwrap_err();
        assert!(matches!(err, VistoError::Conflict(_)));
    }

    #[tokio::test]
    async fn approve_is_idempotent_second_call_fails() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;
        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        f.gateway
            .approve(f.org, instance.id, Actor::user(approver), None)
            .await
            .unwrap();
        let err = f
            .gateway
            .approve(f.org, instance.id, Actor::user(approver), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::State(_)));

        let aprobar_events = f
            .history
            .list(instance.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.action == HistoryAction::Aprobar)
            .count();
        assert_eq!(aprobar_events, 1);
    }

    #[tokio::test]
    async fn unauthorized_actor_leaves_instance_untouched() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        let stranger = Uuid::now_v7();
        let err = f
            .gateway
            .approve(f.org, instance.id, Actor::user(stranger), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::Authorization(_)));

        let after = f.gateway.get_instance(f.org, instance.id).await.unwrap();
        assert_eq!(after.state, InstanceState::EnProgreso);
        assert_eq!(after.current_node_id, "a1");
        assert_eq!(f.history.list(instance.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn self_approval_is_forbidden_without_override() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let requester = Uuid::now_v7();
        // Requester is also an eligible approver by role
        f.approvers.grant_role(requester, "gerente").await;
        let instance = f.gateway.start(f.org, start_request(requester)).await.unwrap();

        let err = f
            .gateway
            .approve(f.org, instance.id, Actor::user(requester), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::Authorization(_)));
    }

    #[tokio::test]
    async fn self_approval_allowed_when_node_permits() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, true);
        publish(&f, nodes, edges).await;

        let requester = Uuid::now_v7();
        f.approvers.grant_role(requester, "gerente").await;
        let instance = f.gateway.start(f.org, start_request(requester)).await.unwrap();

        let updated = f
            .gateway
            .approve(f.org, instance.id, Actor::user(requester), None)
            .await
            .unwrap();
        assert_eq!(updated.state, InstanceState::Aprobado);
    }

    #[tokio::test]
    async fn reject_requires_ten_character_motivo() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;
        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        let err = f
            .gateway
            .reject(f.org, instance.id, Actor::user(approver), "corto".into())
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::InvalidInput(_)));

        // No mutation happened
        let after = f.gateway.get_instance(f.org, instance.id).await.unwrap();
        assert_eq!(after.state, InstanceState::EnProgreso);
        assert_eq!(f.history.list(instance.id).await.unwrap().len(), 1);

        let updated = f
            .gateway
            .reject(
                f.org,
                instance.id,
                Actor::user(approver),
                "presupuesto agotado este trimestre".into(),
            )
            .await
            .unwrap();
        assert_eq!(updated.state, InstanceState::Rechazado);
    }

    #[tokio::test]
    async fn cancel_restricted_to_requester_or_admin() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let requester = Uuid::now_v7();
        let instance = f.gateway.start(f.org, start_request(requester)).await.unwrap();

        let stranger = Uuid::now_v7();
        let err = f
            .gateway
            .cancel(f.org, instance.id, Actor::user(stranger), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::Authorization(_)));

        let cancelled = f
            .gateway
            .cancel(f.org, instance.id, Actor::user(requester), Some("ya no aplica".into()))
            .await
            .unwrap();
        assert_eq!(cancelled.state, InstanceState::Cancelado);
    }

    #[tokio::test]
    async fn pending_lists_only_matching_approvers() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(Some(24), false);
        publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;
        let stranger = Uuid::now_v7();

        let mine = f.gateway.pending(f.org, Actor::user(approver)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].instance.id, instance.id);
        assert!(mine[0].deadline.is_some());

        let theirs = f.gateway.pending(f.org, Actor::user(stranger)).await.unwrap();
        assert!(theirs.is_empty());
    }

    #[tokio::test]
    async fn sweep_escalates_overdue_approval_and_runs_action_once() {
        let f = fixture();
        let nodes = vec![
            node("inicio", NodeKind::Inicio),
            node(
                "a1",
                NodeKind::Aprobacion {
                    aprobador: ApproverSpec::Rol("gerente".into()),
                    timeout_horas: Some(24),
                    permitir_auto_aprobacion: false,
                },
            ),
            node(
                "esc",
                NodeKind::Accion {
                    tipo_accion: "escalar".into(),
                    critica: false,
                    params: json!({}),
                },
            ),
            node(
                "a2",
                NodeKind::Aprobacion {
                    aprobador: ApproverSpec::Rol("director".into()),
                    timeout_horas: None,
                    permitir_auto_aprobacion: false,
                },
            ),
            node(
                "ok",
                NodeKind::Fin {
                    resultado: TerminalOutcome::Aprobado,
                },
            ),
            node(
                "ko",
                NodeKind::Fin {
                    resultado: TerminalOutcome::Rechazado,
                },
            ),
        ];
        let edges = vec![
            edge("e1", "inicio", EdgeLabel::Siguiente, "a1"),
            edge("e2", "a1", EdgeLabel::Aprobar, "ok"),
            edge("e3", "a1", EdgeLabel::Rechazar, "ko"),
            edge("e4", "a1", EdgeLabel::Timeout, "esc"),
            edge("e5", "esc", EdgeLabel::Siguiente, "a2"),
            edge("e6", "a2", EdgeLabel::Aprobar, "ok"),
            edge("e7", "a2", EdgeLabel::Rechazar, "ko"),
        ];
        publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        // Sweep at 25 hours after entry
        let later = instance.node_entered_at + Duration::hours(25);
        let swept = f.gateway.sweep(later).await.unwrap();
        assert_eq!(swept, 1);

        let after = f.gateway.get_instance(f.org, instance.id).await.unwrap();
        assert_eq!(after.state, InstanceState::EnProgreso);
        assert_eq!(after.current_node_id, "a2");
        assert_eq!(f.actions.executed().await, vec!["escalar".to_string()]);

        // Re-running on the already advanced instance is a no-op
        let swept_again = f.gateway.sweep(later).await.unwrap();
        assert_eq!(swept_again, 0);
        assert_eq!(f.actions.executed().await.len(), 1);
    }

    #[tokio::test]
    async fn sweep_without_timeout_edge_expires() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(Some(24), false);
        publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        let later = instance.node_entered_at + Duration::hours(25);
        assert_eq!(f.gateway.sweep(later).await.unwrap(), 1);

        let after = f.gateway.get_instance(f.org, instance.id).await.unwrap();
        assert_eq!(after.state, InstanceState::Expirado);
        let events = f.history.list(instance.id).await.unwrap();
        assert_eq!(events.last().unwrap().action, HistoryAction::Expirar);
    }

    #[tokio::test]
    async fn sweep_skips_not_yet_overdue() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(Some(24), false);
        publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        let soon = instance.node_entered_at + Duration::hours(1);
        assert_eq!(f.gateway.sweep(soon).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_continues_past_poisoned_instance() {
        let f = fixture();

        // A published definition whose timeout edge points at a missing node.
        // The validator would reject it, so seed the store directly.
        let poisoned = WorkflowDefinition {
            id: Uuid::now_v7(),
            organization_id: f.org,
            entity_type: "factura".into(),
            version: 1,
            name: "rota".into(),
            status: DefinitionStatus::Published,
            nodes: vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "a1",
                    NodeKind::Aprobacion {
                        aprobador: ApproverSpec::Rol("gerente".into()),
                        timeout_horas: Some(1),
                        permitir_auto_aprobacion: false,
                    },
                ),
                node(
                    "ok",
                    NodeKind::Fin {
                        resultado: TerminalOutcome::Aprobado,
                    },
                ),
                node(
                    "ko",
                    NodeKind::Fin {
                        resultado: TerminalOutcome::Rechazado,
                    },
                ),
            ],
            edges: vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "a1"),
                edge("e2", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e3", "a1", EdgeLabel::Rechazar, "ko"),
                edge("e4", "a1", EdgeLabel::Timeout, "fantasma"),
            ],
            created_at: Utc::now(),
            published_at: Some(Utc::now()),
        };
        f.definitions.insert(poisoned.clone()).await.unwrap();
        f.instances
            .insert(WorkflowInstance {
                id: Uuid::now_v7(),
                organization_id: f.org,
                definition_id: poisoned.id,
                entity_type: "factura".into(),
                entity_id: Uuid::now_v7(),
                state: InstanceState::EnProgreso,
                current_node_id: "a1".into(),
                requester_id: Uuid::now_v7(),
                priority: Priority::Normal,
                entity_snapshot: json!({}),
                error_flag: false,
                last_error: None,
                started_at: Utc::now(),
                node_entered_at: Utc::now(),
                completed_at: None,
            })
            .await
            .unwrap();

        let (nodes, edges) = approval_nodes(Some(1), false);
        publish(&f, nodes, edges).await;
        let healthy = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        // The poisoned instance fails to advance; the healthy one still expires
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(f.gateway.sweep(later).await.unwrap(), 1);
        let after = f.gateway.get_instance(f.org, healthy.id).await.unwrap();
        assert_eq!(after.state, InstanceState::Expirado);
    }

    #[tokio::test]
    async fn replay_reproduces_stored_projection() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        let def = publish(&f, nodes, edges).await;

        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;
        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();
        let updated = f
            .gateway
            .approve(f.org, instance.id, Actor::user(approver), Some("procede".into()))
            .await
            .unwrap();

        let events = f.history.list(instance.id).await.unwrap();
        let (state, node_id) = replay(&def, &updated, &events).await.unwrap();
        assert_eq!(state, updated.state);
        assert_eq!(node_id, updated.current_node_id);
    }

    fn action_then_approval(tipo_accion: &str) -> (Vec<Node>, Vec<Edge>) {
        (
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "n1",
                    NodeKind::Accion {
                        tipo_accion: tipo_accion.into(),
                        critica: true,
                        params: json!({}),
                    },
                ),
                node(
                    "a1",
                    NodeKind::Aprobacion {
                        aprobador: ApproverSpec::Rol("gerente".into()),
                        timeout_horas: None,
                        permitir_auto_aprobacion: false,
                    },
                ),
                node(
                    "ok",
                    NodeKind::Fin {
                        resultado: TerminalOutcome::Aprobado,
                    },
                ),
                node(
                    "ko",
                    NodeKind::Fin {
                        resultado: TerminalOutcome::Rechazado,
                    },
                ),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "n1"),
                edge("e2", "n1", EdgeLabel::Siguiente, "a1"),
                edge("e3", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e4", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        )
    }

    #[tokio::test]
    async fn replay_reproduces_projection_through_succeeded_action() {
        let f = fixture();
        // The action name itself mentions a failure; only the recorded outcome
        // may decide how the hop replays.
        let (nodes, edges) = action_then_approval("notificar_fallo");
        let def = publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(instance.current_node_id, "a1");
        assert_eq!(
            f.actions.executed().await,
            vec!["notificar_fallo".to_string()]
        );

        let events = f.history.list(instance.id).await.unwrap();
        let (state, node_id) = replay(&def, &instance, &events).await.unwrap();
        assert_eq!(state, InstanceState::EnProgreso);
        assert_eq!(node_id, "a1");
    }

    #[tokio::test]
    async fn replay_reproduces_critical_action_park() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let gateway = ApprovalGateway::new(
            Arc::new(InMemoryDefinitionStore::new()),
            Arc::new(InMemoryInstanceStore::new()),
            history.clone(),
            Arc::new(StaticEntityResolver::new()),
            Arc::new(DirectoryApproverResolver::new()),
            Arc::new(FailingActionExecutor),
        );
        let org = Uuid::now_v7();
        let (nodes, edges) = action_then_approval("cambiar_estado");
        let def = gateway
            .create_definition(org, "orden_compra".into(), "compras".into(), nodes, edges)
            .await
            .unwrap();
        let def = gateway.publish_definition(org, def.id).await.unwrap();

        let instance = gateway
            .start(org, start_request(Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(instance.current_node_id, "n1");
        assert!(instance.error_flag);

        let events = history.list(instance.id).await.unwrap();
        let (state, node_id) = replay(&def, &instance, &events).await.unwrap();
        assert_eq!(state, InstanceState::EnProgreso);
        assert_eq!(node_id, "n1");
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_instance() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;
        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        // Simulate a crash after the ledger append but before the instance
        // write: the aprobar event exists, the instance still shows a1.
        f.history
            .append(
                instance.id,
                vec![crate::instance::HistoryEntry {
                    action: HistoryAction::Aprobar,
                    actor_id: Some(approver),
                    node_id: "a1".into(),
                    comment: None,
                }],
            )
            .await
            .unwrap();

        assert!(f.gateway.reconcile(f.org, instance.id).await.unwrap());
        let repaired = f.gateway.get_instance(f.org, instance.id).await.unwrap();
        assert_eq!(repaired.state, InstanceState::Aprobado);
        assert_eq!(repaired.current_node_id, "ok");

        // Second pass finds nothing to repair
        assert!(!f.gateway.reconcile(f.org, instance.id).await.unwrap());
    }

    #[tokio::test]
    async fn publish_rejects_invalid_definition() {
        let f = fixture();
        let (nodes, mut edges) = approval_nodes(None, false);
        edges.retain(|e| e.id != "e3"); // drop the rechazar edge

        let def = f
            .gateway
            .create_definition(f.org, "orden_compra".into(), "compras".into(), nodes, edges)
            .await
            .unwrap();
        let err = f.gateway.publish_definition(f.org, def.id).await.unwrap_err();
        assert!(matches!(err, VistoError::Validation(_)));

        let still_draft = f.gateway.get_definition(f.org, def.id).await.unwrap();
        assert_eq!(still_draft.status, DefinitionStatus::Draft);
    }

    #[tokio::test]
    async fn publish_archives_previous_version_and_bumps_version() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        let v1 = publish(&f, nodes.clone(), edges.clone()).await;
        assert_eq!(v1.version, 1);

        let v2 = publish(&f, nodes, edges).await;
        assert_eq!(v2.version, 2);
        assert_eq!(v2.status, DefinitionStatus::Published);

        let old = f.gateway.get_definition(f.org, v1.id).await.unwrap();
        assert_eq!(old.status, DefinitionStatus::Archived);
    }

    #[tokio::test]
    async fn republished_definition_does_not_affect_in_flight_instances() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        let v1 = publish(&f, nodes.clone(), edges.clone()).await;

        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;
        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(instance.definition_id, v1.id);

        publish(&f, nodes, edges).await;

        // In-flight instance still advances against its frozen v1 definition
        let updated = f
            .gateway
            .approve(f.org, instance.id, Actor::user(approver), None)
            .await
            .unwrap();
        assert_eq!(updated.definition_id, v1.id);
        assert_eq!(updated.state, InstanceState::Aprobado);
    }

    #[tokio::test]
    async fn decisions_refused_while_parked_for_remediation() {
        let f = fixture();
        let approver = Uuid::now_v7();
        f.approvers.grant_role(approver, "gerente").await;

        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;
        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        // Force the error flag the way a failed critical action would
        let flagged = f
            .instances
            .update_guarded(
                f.org,
                instance.id,
                InstanceState::EnProgreso,
                "a1",
                InstancePatch {
                    state: InstanceState::EnProgreso,
                    current_node_id: "a1".into(),
                    node_entered_at: instance.node_entered_at,
                    error_flag: true,
                    last_error: Some("accion critica fallo".into()),
                    completed_at: None,
                },
            )
            .await
            .unwrap();
        assert!(flagged);

        let err = f
            .gateway
            .approve(f.org, instance.id, Actor::user(approver), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::State(_)));

        // Error-flagged instances surface to admins in the pending queue
        let admin_queue = f
            .gateway
            .pending(f.org, Actor::admin(Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(admin_queue.len(), 1);
        let user_queue = f
            .gateway
            .pending(f.org, Actor::user(approver))
            .await
            .unwrap();
        assert!(user_queue.is_empty());
    }

    #[tokio::test]
    async fn organizations_are_isolated() {
        let f = fixture();
        let (nodes, edges) = approval_nodes(None, false);
        publish(&f, nodes, edges).await;

        let instance = f
            .gateway
            .start(f.org, start_request(Uuid::now_v7()))
            .await
            .unwrap();

        let other_org = Uuid::now_v7();
        let err = f
            .gateway
            .get_instance(other_org, instance.id)
            .await
            .unwrap_err();
        assert!(matches!(err, VistoError::NotFound(_)));
    }
}
