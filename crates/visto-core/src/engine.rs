// Workflow state machine.
//
// The engine is pure with respect to storage: given a definition, an instance
// and an event it computes a Transition (instance patch + history entries to
// append). The gateway persists the result under a compare-and-set. The only
// impure edge is the ActionExecutor collaborator, invoked synchronously when
// traversal enters an accion node.
//
// History granularity: decision events (iniciar/aprobar/rechazar/cancelar/
// expirar) are recorded where they happen; `avanzar` entries are recorded only
// for meaningful automatic hops (condicion resolutions and accion executions),
// not for plain siguiente hops or for entering fin. Replay re-walks the graph
// from the decision events, re-evaluating conditions against the frozen
// snapshot, so the derived hops do not need their own entries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::condition::evaluate;
use crate::error::{Result, VistoError};
use crate::graph::{EdgeLabel, NodeKind, TerminalOutcome, WorkflowDefinition};
use crate::instance::{HistoryAction, HistoryEntry, InstanceState, WorkflowInstance};
use crate::traits::ActionExecutor;

// Accion ledger comments carry a fixed prefix; replay recovers the recorded
// outcome from it and must never have to parse free text (a tipo_accion may
// itself contain words like "fallo").
pub(crate) const ACTION_OK_PREFIX: &str = "accion_ok:";
pub(crate) const ACTION_FAILED_PREFIX: &str = "accion_fallo:";

/// Event driving a single advance step.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Iniciar {
        requester_id: Uuid,
    },
    Aprobar {
        actor_id: Uuid,
        comment: Option<String>,
    },
    Rechazar {
        actor_id: Uuid,
        motivo: String,
    },
    Cancelar {
        actor_id: Uuid,
        motivo: Option<String>,
    },
    Timeout,
}

/// Result of one advance: what the instance becomes plus the ledger entries
/// produced along the way.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: InstanceState,
    pub current_node_id: String,
    pub node_entered_at: DateTime<Utc>,
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
}

impl Transition {
    fn parked(at: &str, now: DateTime<Utc>) -> Self {
        Transition {
            state: InstanceState::EnProgreso,
            current_node_id: at.to_string(),
            node_entered_at: now,
            error_flag: false,
            last_error: None,
            completed_at: None,
            history: Vec::new(),
        }
    }
}

/// State machine over one definition.
pub struct Engine<'a> {
    def: &'a WorkflowDefinition,
}

impl<'a> Engine<'a> {
    pub fn new(def: &'a WorkflowDefinition) -> Self {
        Self { def }
    }

    /// Advance an instance by one event, auto-advancing through siguiente hops,
    /// condicion evaluations and accion executions until parking on an
    /// aprobacion node or reaching a terminal state.
    pub async fn advance(
        &self,
        instance: &WorkflowInstance,
        event: WorkflowEvent,
        actions: &dyn ActionExecutor,
    ) -> Result<Transition> {
        let now = Utc::now();
        let current = instance.current_node_id.as_str();
        let mut t = Transition::parked(current, now);

        match event {
            WorkflowEvent::Iniciar { requester_id } => {
                let start = self
                    .def
                    .start_node()
                    .ok_or_else(|| VistoError::Engine("definition has no inicio node".into()))?;
                t.current_node_id = start.id.clone();
                t.history.push(HistoryEntry {
                    action: HistoryAction::Iniciar,
                    actor_id: Some(requester_id),
                    node_id: start.id.clone(),
                    comment: None,
                });
                let next = self.require_edge(&start.id, EdgeLabel::Siguiente)?;
                self.auto_advance(next, instance, &mut t, actions).await?;
            }
            WorkflowEvent::Aprobar { actor_id, comment } => {
                self.require_parked_on_approval(current)?;
                t.history.push(HistoryEntry {
                    action: HistoryAction::Aprobar,
                    actor_id: Some(actor_id),
                    node_id: current.to_string(),
                    comment,
                });
                let next = self.require_edge(current, EdgeLabel::Aprobar)?;
                self.auto_advance(next, instance, &mut t, actions).await?;
            }
            WorkflowEvent::Rechazar { actor_id, motivo } => {
                self.require_parked_on_approval(current)?;
                t.history.push(HistoryEntry {
                    action: HistoryAction::Rechazar,
                    actor_id: Some(actor_id),
                    node_id: current.to_string(),
                    comment: Some(motivo),
                });
                let next = self.require_edge(current, EdgeLabel::Rechazar)?;
                self.auto_advance(next, instance, &mut t, actions).await?;
            }
            WorkflowEvent::Cancelar { actor_id, motivo } => {
                t.history.push(HistoryEntry {
                    action: HistoryAction::Cancelar,
                    actor_id: Some(actor_id),
                    node_id: current.to_string(),
                    comment: motivo,
                });
                t.state = InstanceState::Cancelado;
                t.completed_at = Some(now);
            }
            WorkflowEvent::Timeout => {
                self.require_parked_on_approval(current)?;
                t.history.push(HistoryEntry {
                    action: HistoryAction::Expirar,
                    actor_id: None,
                    node_id: current.to_string(),
                    comment: None,
                });
                match self.def.edge_from(current, EdgeLabel::Timeout) {
                    Some(edge) => {
                        let target = edge.target.clone();
                        self.auto_advance(target, instance, &mut t, actions).await?;
                    }
                    None => {
                        t.state = InstanceState::Expirado;
                        t.completed_at = Some(now);
                    }
                }
            }
        }

        Ok(t)
    }

    /// Follow automatic edges until parked or terminal. Bounded by
    /// node_count * 2 hops; the validator makes exceeding this unreachable,
    /// but a runtime cycle must never spin the engine.
    async fn auto_advance(
        &self,
        entry_node: String,
        instance: &WorkflowInstance,
        t: &mut Transition,
        actions: &dyn ActionExecutor,
    ) -> Result<()> {
        let max_hops = self.def.nodes.len() * 2;
        let mut hops = 0usize;
        let mut current = entry_node;

        loop {
            hops += 1;
            if hops > max_hops {
                return Err(VistoError::Engine(format!(
                    "auto-advance exceeded {max_hops} hops in definition {}; runtime cycle",
                    self.def.id
                )));
            }

            let node = self.def.node(&current).ok_or_else(|| {
                VistoError::Engine(format!("edge leads to unknown node '{current}'"))
            })?;

            match &node.kind {
                NodeKind::Fin { resultado } => {
                    t.current_node_id = node.id.clone();
                    t.node_entered_at = Utc::now();
                    t.state = match resultado {
                        TerminalOutcome::Aprobado => InstanceState::Aprobado,
                        TerminalOutcome::Rechazado => InstanceState::Rechazado,
                    };
                    t.completed_at = Some(Utc::now());
                    return Ok(());
                }
                NodeKind::Aprobacion { .. } => {
                    t.current_node_id = node.id.clone();
                    t.node_entered_at = Utc::now();
                    t.state = InstanceState::EnProgreso;
                    return Ok(());
                }
                NodeKind::Condicion { condiciones } => {
                    let outcome = evaluate(condiciones, &instance.entity_snapshot);
                    let label = if outcome { EdgeLabel::Si } else { EdgeLabel::No };
                    t.history.push(HistoryEntry {
                        action: HistoryAction::Avanzar,
                        actor_id: None,
                        node_id: node.id.clone(),
                        comment: Some(format!("condicion: {label}")),
                    });
                    current = self.require_edge(&node.id, label)?;
                }
                NodeKind::Accion {
                    tipo_accion,
                    critica,
                    params,
                } => {
                    let result = actions
                        .execute(
                            instance.organization_id,
                            tipo_accion,
                            params,
                            &instance.entity_snapshot,
                        )
                        .await;
                    match result {
                        Ok(()) => {
                            t.history.push(HistoryEntry {
                                action: HistoryAction::Avanzar,
                                actor_id: None,
                                node_id: node.id.clone(),
                                comment: Some(format!("{ACTION_OK_PREFIX} '{tipo_accion}'")),
                            });
                        }
                        Err(e) if *critica => {
                            // Park for operator remediation; instance stays
                            // en_progreso on this node with the error flag set.
                            tracing::error!(
                                instance_id = %instance.id,
                                node_id = %node.id,
                                tipo_accion = %tipo_accion,
                                error = %e,
                                "critical action failed, parking instance"
                            );
                            t.history.push(HistoryEntry {
                                action: HistoryAction::Avanzar,
                                actor_id: None,
                                node_id: node.id.clone(),
                                comment: Some(format!(
                                    "{ACTION_FAILED_PREFIX} '{tipo_accion}' (critica): {e}"
                                )),
                            });
                            t.current_node_id = node.id.clone();
                            t.node_entered_at = Utc::now();
                            t.state = InstanceState::EnProgreso;
                            t.error_flag = true;
                            t.last_error = Some(e.to_string());
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(
                                instance_id = %instance.id,
                                node_id = %node.id,
                                tipo_accion = %tipo_accion,
                                error = %e,
                                "non-critical action failed, continuing"
                            );
                            t.history.push(HistoryEntry {
                                action: HistoryAction::Avanzar,
                                actor_id: None,
                                node_id: node.id.clone(),
                                comment: Some(format!("{ACTION_FAILED_PREFIX} '{tipo_accion}': {e}")),
                            });
                        }
                    }
                    current = self.require_edge(&node.id, EdgeLabel::Siguiente)?;
                }
                NodeKind::Inicio => {
                    // Only reachable through a malformed graph; validated
                    // definitions have no edges back into inicio.
                    return Err(VistoError::Engine(format!(
                        "traversal re-entered inicio node '{}'",
                        node.id
                    )));
                }
            }
        }
    }

    fn require_parked_on_approval(&self, node_id: &str) -> Result<()> {
        let node = self
            .def
            .node(node_id)
            .ok_or_else(|| VistoError::Engine(format!("unknown current node '{node_id}'")))?;
        if matches!(node.kind, NodeKind::Aprobacion { .. }) {
            Ok(())
        } else {
            Err(VistoError::state(format!(
                "instance is parked on a '{}' node, not an aprobacion node",
                node.kind.name()
            )))
        }
    }

    fn require_edge(&self, node_id: &str, label: EdgeLabel) -> Result<String> {
        self.def
            .edge_from(node_id, label)
            .map(|e| e.target.clone())
            .ok_or_else(|| {
                VistoError::Engine(format!("node '{node_id}' has no outgoing '{label}' edge"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::*;
    use crate::memory::{FailingActionExecutor, RecordingActionExecutor};
    use serde_json::json;

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

    fn definition(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            entity_type: "orden_compra".into(),
            version: 1,
            name: "test".into(),
            status: DefinitionStatus::Published,
            nodes,
            edges,
            created_at: Utc::now(),
            published_at: Some(Utc::now()),
        }
    }

    fn approval(timeout_horas: Option<u32>) -> NodeKind {
        NodeKind::Aprobacion {
            aprobador: ApproverSpec::Rol("gerente".into()),
            timeout_horas,
            permitir_auto_aprobacion: false,
        }
    }

    fn instance_on(def: &WorkflowDefinition, node_id: &str, snapshot: serde_json::Value) -> WorkflowInstance {
        WorkflowInstance {
            id: Uuid::now_v7(),
            organization_id: def.organization_id,
            definition_id: def.id,
            entity_type: def.entity_type.clone(),
            entity_id: Uuid::now_v7(),
            state: InstanceState::EnProgreso,
            current_node_id: node_id.into(),
            requester_id: Uuid::now_v7(),
            priority: Default::default(),
            entity_snapshot: snapshot,
            error_flag: false,
            last_error: None,
            started_at: Utc::now(),
            node_entered_at: Utc::now(),
            completed_at: None,
        }
    }

    fn simple_approval_def() -> WorkflowDefinition {
        definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node("a1", approval(None)),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
                node("ko", NodeKind::Fin { resultado: TerminalOutcome::Rechazado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "a1"),
                edge("e2", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e3", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        )
    }

    #[tokio::test]
    async fn iniciar_parks_on_first_approval() {
        let def = simple_approval_def();
        let instance = instance_on(&def, "inicio", json!({}));
        let actions = RecordingActionExecutor::new();

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Iniciar {
                    requester_id: instance.requester_id,
                },
                &actions,
            )
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::EnProgreso);
        assert_eq!(t.current_node_id, "a1");
        assert_eq!(t.history.len(), 1);
        assert_eq!(t.history[0].action, HistoryAction::Iniciar);
    }

    #[tokio::test]
    async fn aprobar_reaches_approved_end() {
        let def = simple_approval_def();
        let instance = instance_on(&def, "a1", json!({}));
        let actor = Uuid::now_v7();
        let actions = RecordingActionExecutor::new();

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Aprobar {
                    actor_id: actor,
                    comment: None,
                },
                &actions,
            )
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::Aprobado);
        assert_eq!(t.current_node_id, "ok");
        assert!(t.completed_at.is_some());
        assert_eq!(t.history.len(), 1);
        assert_eq!(t.history[0].action, HistoryAction::Aprobar);
    }

    #[tokio::test]
    async fn rechazar_reaches_rejected_end() {
        let def = simple_approval_def();
        let instance = instance_on(&def, "a1", json!({}));

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Rechazar {
                    actor_id: Uuid::now_v7(),
                    motivo: "presupuesto agotado este mes".into(),
                },
                &RecordingActionExecutor::new(),
            )
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::Rechazado);
        assert_eq!(t.current_node_id, "ko");
    }

    #[tokio::test]
    async fn aprobar_while_not_on_approval_is_state_error() {
        let def = simple_approval_def();
        let instance = instance_on(&def, "inicio", json!({}));

        let err = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Aprobar {
                    actor_id: Uuid::now_v7(),
                    comment: None,
                },
                &RecordingActionExecutor::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VistoError::State(_)));
    }

    #[tokio::test]
    async fn condition_routes_by_snapshot() {
        // inicio -> condicion(total > 10000) -> si: a1, no: fin(aprobado)
        let def = definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "c1",
                    NodeKind::Condicion {
                        condiciones: vec![ConditionClause {
                            field: "total".into(),
                            operator: ConditionOperator::Gt,
                            value: json!(10000),
                        }],
                    },
                ),
                node("a1", approval(None)),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
                node("ko", NodeKind::Fin { resultado: TerminalOutcome::Rechazado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "c1"),
                edge("e2", "c1", EdgeLabel::Si, "a1"),
                edge("e3", "c1", EdgeLabel::No, "ok"),
                edge("e4", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e5", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        );

        // Above threshold: parks on approval
        let big = instance_on(&def, "inicio", json!({"total": 50000}));
        let t = Engine::new(&def)
            .advance(
                &big,
                WorkflowEvent::Iniciar { requester_id: big.requester_id },
                &RecordingActionExecutor::new(),
            )
            .await
            .unwrap();
        assert_eq!(t.current_node_id, "a1");
        assert_eq!(t.state, InstanceState::EnProgreso);

        // Below threshold: auto-approved without human decision
        let small = instance_on(&def, "inicio", json!({"total": 99}));
        let t = Engine::new(&def)
            .advance(
                &small,
                WorkflowEvent::Iniciar { requester_id: small.requester_id },
                &RecordingActionExecutor::new(),
            )
            .await
            .unwrap();
        assert_eq!(t.state, InstanceState::Aprobado);
        // iniciar + avanzar(condicion)
        assert_eq!(t.history.len(), 2);
        assert_eq!(t.history[1].action, HistoryAction::Avanzar);
    }

    #[tokio::test]
    async fn action_node_executes_and_continues() {
        let def = definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "n1",
                    NodeKind::Accion {
                        tipo_accion: "notificar".into(),
                        critica: false,
                        params: json!({"canal": "compras"}),
                    },
                ),
                node("a1", approval(None)),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
                node("ko", NodeKind::Fin { resultado: TerminalOutcome::Rechazado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "n1"),
                edge("e2", "n1", EdgeLabel::Siguiente, "a1"),
                edge("e3", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e4", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        );
        let instance = instance_on(&def, "inicio", json!({}));
        let actions = RecordingActionExecutor::new();

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Iniciar { requester_id: instance.requester_id },
                &actions,
            )
            .await
            .unwrap();

        assert_eq!(t.current_node_id, "a1");
        assert_eq!(actions.executed().await, vec!["notificar".to_string()]);
    }

    #[tokio::test]
    async fn non_critical_action_failure_continues_traversal() {
        let def = definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "n1",
                    NodeKind::Accion {
                        tipo_accion: "notificar".into(),
                        critica: false,
                        params: json!({}),
                    },
                ),
                node("a1", approval(None)),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
                node("ko", NodeKind::Fin { resultado: TerminalOutcome::Rechazado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "n1"),
                edge("e2", "n1", EdgeLabel::Siguiente, "a1"),
                edge("e3", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e4", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        );
        let instance = instance_on(&def, "inicio", json!({}));

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Iniciar { requester_id: instance.requester_id },
                &FailingActionExecutor,
            )
            .await
            .unwrap();

        assert_eq!(t.current_node_id, "a1");
        assert!(!t.error_flag);
    }

    #[tokio::test]
    async fn critical_action_failure_parks_with_error_flag() {
        let def = definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "n1",
                    NodeKind::Accion {
                        tipo_accion: "cambiar_estado".into(),
                        critica: true,
                        params: json!({}),
                    },
                ),
                node("a1", approval(None)),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
                node("ko", NodeKind::Fin { resultado: TerminalOutcome::Rechazado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "n1"),
                edge("e2", "n1", EdgeLabel::Siguiente, "a1"),
                edge("e3", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e4", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        );
        let instance = instance_on(&def, "inicio", json!({}));

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Iniciar { requester_id: instance.requester_id },
                &FailingActionExecutor,
            )
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::EnProgreso);
        assert_eq!(t.current_node_id, "n1");
        assert!(t.error_flag);
        assert!(t.last_error.is_some());
    }

    #[tokio::test]
    async fn timeout_without_edge_expires_instance() {
        let def = simple_approval_def();
        let instance = instance_on(&def, "a1", json!({}));

        let t = Engine::new(&def)
            .advance(&instance, WorkflowEvent::Timeout, &RecordingActionExecutor::new())
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::Expirado);
        assert_eq!(t.current_node_id, "a1");
        assert_eq!(t.history[0].action, HistoryAction::Expirar);
    }

    #[tokio::test]
    async fn timeout_with_edge_escalates() {
        // a1 --timeout--> accion(escalar) --siguiente--> a2
        let def = definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node("a1", approval(Some(24))),
                node(
                    "esc",
                    NodeKind::Accion {
                        tipo_accion: "escalar".into(),
                        critica: false,
                        params: json!({}),
                    },
                ),
                node("a2", approval(None)),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
                node("ko", NodeKind::Fin { resultado: TerminalOutcome::Rechazado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "a1"),
                edge("e2", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e3", "a1", EdgeLabel::Rechazar, "ko"),
                edge("e4", "a1", EdgeLabel::Timeout, "esc"),
                edge("e5", "esc", EdgeLabel::Siguiente, "a2"),
                edge("e6", "a2", EdgeLabel::Aprobar, "ok"),
                edge("e7", "a2", EdgeLabel::Rechazar, "ko"),
            ],
        );
        let instance = instance_on(&def, "a1", json!({}));
        let actions = RecordingActionExecutor::new();

        let t = Engine::new(&def)
            .advance(&instance, WorkflowEvent::Timeout, &actions)
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::EnProgreso);
        assert_eq!(t.current_node_id, "a2");
        assert_eq!(actions.executed().await, vec!["escalar".to_string()]);
        assert_eq!(t.history[0].action, HistoryAction::Expirar);
    }

    #[tokio::test]
    async fn cancelar_terminates_from_any_parked_node() {
        let def = simple_approval_def();
        let instance = instance_on(&def, "a1", json!({}));

        let t = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Cancelar {
                    actor_id: instance.requester_id,
                    motivo: Some("ya no aplica".into()),
                },
                &RecordingActionExecutor::new(),
            )
            .await
            .unwrap();

        assert_eq!(t.state, InstanceState::Cancelado);
        assert!(t.completed_at.is_some());
    }

    #[tokio::test]
    async fn runtime_cycle_hits_hop_bound() {
        // Two actions feeding each other; structurally invalid, but the engine
        // must refuse to spin if such a graph ever reaches it.
        let def = definition(
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "x",
                    NodeKind::Accion {
                        tipo_accion: "a".into(),
                        critica: false,
                        params: json!({}),
                    },
                ),
                node(
                    "y",
                    NodeKind::Accion {
                        tipo_accion: "b".into(),
                        critica: false,
                        params: json!({}),
                    },
                ),
                node("ok", NodeKind::Fin { resultado: TerminalOutcome::Aprobado }),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "x"),
                edge("e2", "x", EdgeLabel::Siguiente, "y"),
                edge("e3", "y", EdgeLabel::Siguiente, "x"),
            ],
        );
        let instance = instance_on(&def, "inicio", json!({}));

        let err = Engine::new(&def)
            .advance(
                &instance,
                WorkflowEvent::Iniciar { requester_id: instance.requester_id },
                &RecordingActionExecutor::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VistoError::Engine(_)));
    }
}
