// Structural validation of a candidate definition against the registry rules.
//
// Pure: builds an adjacency view, checks per-kind handle cardinalities, then
// runs reachability both ways (everything reachable from inicio, some fin
// reachable from everything). Only a definition that passes may move
// draft -> published.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::graph::{Cardinality, EdgeLabel, NodeKind, WorkflowDefinition};

/// One structural violation. A failed validation returns all of them, not the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    /// Not exactly one inicio node
    StartNodeCount { found: usize },
    /// No fin node at all
    NoEndNode,
    /// Edge references a node id that does not exist
    UnknownNode { edge_id: String, node_id: String },
    /// Edge connects a node to itself
    SelfLoop { edge_id: String },
    /// Same (source, handle, target) appears more than once
    DuplicateEdge { source: String, label: String, target: String },
    /// Handle not allowed for the node's kind (includes any edge out of fin)
    HandleNotAllowed { node_id: String, label: String },
    /// Required handle missing (e.g. aprobacion without rechazar)
    MissingHandle { node_id: String, label: String },
    /// More than one edge on a single-cardinality handle
    DuplicateHandle { node_id: String, label: String },
    /// Non-fin node with no outgoing edges
    NoOutgoing { node_id: String },
    /// Non-inicio node with no incoming edges
    NoIncoming { node_id: String },
    /// Node not reachable from inicio
    Unreachable { node_id: String },
    /// No fin reachable from this node (dead branch)
    DeadBranch { node_id: String },
}

/// Validate a candidate definition. Ok(()) or every violation found.
pub fn validate(def: &WorkflowDefinition) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    let starts = def
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Inicio))
        .count();
    if starts != 1 {
        violations.push(Violation::StartNodeCount { found: starts });
    }
    if !def.nodes.iter().any(|n| matches!(n.kind, NodeKind::Fin { .. })) {
        violations.push(Violation::NoEndNode);
    }

    let node_ids: HashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();

    // Edge-level checks
    let mut seen_triples: HashSet<(&str, EdgeLabel, &str)> = HashSet::new();
    for edge in &def.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                violations.push(Violation::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if edge.source == edge.target {
            violations.push(Violation::SelfLoop {
                edge_id: edge.id.clone(),
            });
        }
        if !seen_triples.insert((edge.source.as_str(), edge.label, edge.target.as_str())) {
            violations.push(Violation::DuplicateEdge {
                source: edge.source.clone(),
                label: edge.label.to_string(),
                target: edge.target.clone(),
            });
        }
    }

    // Per-node handle rules from the registry table
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    for edge in &def.edges {
        *incoming.entry(edge.target.as_str()).or_default() += 1;
    }

    for node in &def.nodes {
        let rules = node.kind.handle_rules();
        let outgoing: Vec<_> = def.outgoing(&node.id).collect();

        let mut counts: HashMap<EdgeLabel, usize> = HashMap::new();
        for edge in &outgoing {
            *counts.entry(edge.label).or_default() += 1;
        }

        for (label, count) in &counts {
            match rules.iter().find(|(l, _)| l == label) {
                None => violations.push(Violation::HandleNotAllowed {
                    node_id: node.id.clone(),
                    label: label.to_string(),
                }),
                Some((_, _)) if *count > 1 => violations.push(Violation::DuplicateHandle {
                    node_id: node.id.clone(),
                    label: label.to_string(),
                }),
                Some(_) => {}
            }
        }
        for (label, cardinality) in rules {
            if *cardinality == Cardinality::ExactlyOne && !counts.contains_key(label) {
                violations.push(Violation::MissingHandle {
                    node_id: node.id.clone(),
                    label: label.to_string(),
                });
            }
        }

        if !matches!(node.kind, NodeKind::Fin { .. }) && outgoing.is_empty() {
            violations.push(Violation::NoOutgoing {
                node_id: node.id.clone(),
            });
        }
        if !matches!(node.kind, NodeKind::Inicio)
            && incoming.get(node.id.as_str()).copied().unwrap_or(0) == 0
        {
            violations.push(Violation::NoIncoming {
                node_id: node.id.clone(),
            });
        }
    }

    // Reachability from inicio
    if let Some(start) = def.start_node() {
        let reachable = bfs(def, &start.id);
        for node in &def.nodes {
            if !reachable.contains(node.id.as_str()) {
                violations.push(Violation::Unreachable {
                    node_id: node.id.clone(),
                });
            }
        }
        // A fin must be reachable from every node (no dead branches)
        for node in &def.nodes {
            let downstream = bfs(def, &node.id);
            let hits_end = downstream.iter().any(|id| {
                def.node(id)
                    .map(|n| matches!(n.kind, NodeKind::Fin { .. }))
                    .unwrap_or(false)
            });
            if !hits_end {
                violations.push(Violation::DeadBranch {
                    node_id: node.id.clone(),
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn bfs<'a>(def: &'a WorkflowDefinition, from: &'a str) -> HashSet<&'a str> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(from);
    queue.push_back(from);
    while let Some(current) = queue.pop_front() {
        for edge in &def.edges {
            if edge.source == current && seen.insert(edge.target.as_str()) {
                queue.push_back(edge.target.as_str());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn def_with(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            entity_type: "orden_compra".into(),
            version: 1,
            name: "test".into(),
            status: DefinitionStatus::Draft,
            nodes,
            edges,
            created_at: Utc::now(),
            published_at: None,
        }
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

    fn approval() -> NodeKind {
        NodeKind::Aprobacion {
            aprobador: ApproverSpec::Rol("gerente".into()),
            timeout_horas: None,
            permitir_auto_aprobacion: false,
        }
    }

    fn fin(resultado: TerminalOutcome) -> NodeKind {
        NodeKind::Fin { resultado }
    }

    /// inicio -> aprobacion -> fin(aprobado) / fin(rechazado)
    fn minimal_valid() -> WorkflowDefinition {
        def_with(
            vec![
                node("inicio", NodeKind::Inicio),
                node("a1", approval()),
                node("ok", fin(TerminalOutcome::Aprobado)),
                node("ko", fin(TerminalOutcome::Rechazado)),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "a1"),
                edge("e2", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e3", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        )
    }

    #[test]
    fn accepts_structurally_complete_definition() {
        assert!(validate(&minimal_valid()).is_ok());
    }

    #[test]
    fn rejects_approval_missing_rechazar_edge() {
        let mut def = minimal_valid();
        def.edges.retain(|e| e.id != "e3");
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::MissingHandle {
            node_id: "a1".into(),
            label: "rechazar".into(),
        }));
    }

    #[test]
    fn rejects_missing_start() {
        let mut def = minimal_valid();
        def.nodes.retain(|n| n.id != "inicio");
        def.edges.retain(|e| e.source != "inicio");
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::StartNodeCount { found: 0 }));
    }

    #[test]
    fn rejects_self_loop() {
        let mut def = minimal_valid();
        def.nodes.push(node(
            "act",
            NodeKind::Accion {
                tipo_accion: "notificar".into(),
                critica: false,
                params: serde_json::Value::Null,
            },
        ));
        def.edges
            .push(edge("e4", "act", EdgeLabel::Siguiente, "act"));
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::SelfLoop { edge_id: "e4".into() }));
    }

    #[test]
    fn rejects_duplicate_source_handle_target() {
        let mut def = minimal_valid();
        def.edges.push(edge("e9", "a1", EdgeLabel::Aprobar, "ok"));
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::DuplicateEdge {
            source: "a1".into(),
            label: "aprobar".into(),
            target: "ok".into(),
        }));
    }

    #[test]
    fn rejects_edge_out_of_fin() {
        let mut def = minimal_valid();
        def.edges.push(edge("e5", "ok", EdgeLabel::Siguiente, "ko"));
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::HandleNotAllowed {
            node_id: "ok".into(),
            label: "siguiente".into(),
        }));
    }

    #[test]
    fn rejects_unreachable_node() {
        let mut def = minimal_valid();
        def.nodes.push(node("isla", fin(TerminalOutcome::Aprobado)));
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::Unreachable {
            node_id: "isla".into()
        }));
        // Also flagged as lacking an incoming edge
        assert!(violations.contains(&Violation::NoIncoming {
            node_id: "isla".into()
        }));
    }

    #[test]
    fn rejects_condition_missing_no_branch() {
        let def = def_with(
            vec![
                node("inicio", NodeKind::Inicio),
                node(
                    "c1",
                    NodeKind::Condicion {
                        condiciones: vec![],
                    },
                ),
                node("a1", approval()),
                node("ok", fin(TerminalOutcome::Aprobado)),
                node("ko", fin(TerminalOutcome::Rechazado)),
            ],
            vec![
                edge("e1", "inicio", EdgeLabel::Siguiente, "c1"),
                edge("e2", "c1", EdgeLabel::Si, "a1"),
                edge("e3", "a1", EdgeLabel::Aprobar, "ok"),
                edge("e4", "a1", EdgeLabel::Rechazar, "ko"),
            ],
        );
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::MissingHandle {
            node_id: "c1".into(),
            label: "no".into(),
        }));
    }

    #[test]
    fn rejects_unknown_edge_endpoint() {
        let mut def = minimal_valid();
        def.edges
            .push(edge("e6", "a1", EdgeLabel::Timeout, "fantasma"));
        let violations = validate(&def).unwrap_err();
        assert!(violations.contains(&Violation::UnknownNode {
            edge_id: "e6".into(),
            node_id: "fantasma".into(),
        }));
    }
}
