// Workflow graph model: definitions, nodes, edges, and the node/edge type registry.
//
// Definitions arrive as JSON produced by an external graphical editor; this module
// is the typed form of that serialized shape. Node kind is a closed tagged enum
// carrying its per-variant config payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Labeled outgoing connection point on a node.
///
/// Wire names match the serialized definition format the editor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EdgeLabel {
    Siguiente,
    Aprobar,
    Rechazar,
    Si,
    No,
    Timeout,
}

impl std::fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeLabel::Siguiente => "siguiente",
            EdgeLabel::Aprobar => "aprobar",
            EdgeLabel::Rechazar => "rechazar",
            EdgeLabel::Si => "si",
            EdgeLabel::No => "no",
            EdgeLabel::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Labeled directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub label: EdgeLabel,
    pub target: String,
}

/// Configured approver for an aprobacion node: a specific user, a role, or a group.
/// Resolution into a membership check is delegated to the ApproverResolver collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "valor", rename_all = "snake_case")]
pub enum ApproverSpec {
    Usuario(Uuid),
    Rol(String),
    Grupo(Uuid),
}

/// Comparison operator for a condition clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

/// Single `{field, operator, value}` clause evaluated against the entity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionClause {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

/// Terminal outcome configured on a fin node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Aprobado,
    Rechazado,
}

/// Node kind with its per-variant config payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum NodeKind {
    Inicio,
    Aprobacion {
        aprobador: ApproverSpec,
        #[serde(default)]
        timeout_horas: Option<u32>,
        #[serde(default)]
        permitir_auto_aprobacion: bool,
    },
    Condicion {
        condiciones: Vec<ConditionClause>,
    },
    Accion {
        tipo_accion: String,
        #[serde(default)]
        critica: bool,
        #[serde(default)]
        params: serde_json::Value,
    },
    Fin {
        resultado: TerminalOutcome,
    },
}

/// Outgoing-handle cardinality for a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ExactlyOne,
    AtMostOne,
}

impl NodeKind {
    /// Registry constraint table: allowed outgoing handles with cardinality.
    /// An edge label absent from the slice is not allowed out of this kind.
    pub fn handle_rules(&self) -> &'static [(EdgeLabel, Cardinality)] {
        match self {
            NodeKind::Inicio => &[(EdgeLabel::Siguiente, Cardinality::ExactlyOne)],
            NodeKind::Aprobacion { .. } => &[
                (EdgeLabel::Aprobar, Cardinality::ExactlyOne),
                (EdgeLabel::Rechazar, Cardinality::ExactlyOne),
                (EdgeLabel::Timeout, Cardinality::AtMostOne),
            ],
            NodeKind::Condicion { .. } => &[
                (EdgeLabel::Si, Cardinality::ExactlyOne),
                (EdgeLabel::No, Cardinality::ExactlyOne),
            ],
            NodeKind::Accion { .. } => &[(EdgeLabel::Siguiente, Cardinality::ExactlyOne)],
            NodeKind::Fin { .. } => &[],
        }
    }

    /// Wire name of the kind, for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Inicio => "inicio",
            NodeKind::Aprobacion { .. } => "aprobacion",
            NodeKind::Condicion { .. } => "condicion",
            NodeKind::Accion { .. } => "accion",
            NodeKind::Fin { .. } => "fin",
        }
    }
}

/// Graph vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Lifecycle status of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum DefinitionStatus {
    Draft,
    Published,
    Archived,
}

impl std::fmt::Display for DefinitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DefinitionStatus::Draft => "draft",
            DefinitionStatus::Published => "published",
            DefinitionStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DefinitionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DefinitionStatus::Draft),
            "published" => Ok(DefinitionStatus::Published),
            "archived" => Ok(DefinitionStatus::Archived),
            other => Err(format!("unknown definition status: {other}")),
        }
    }
}

/// Reusable graph template for a class of approvals.
///
/// Versioned per (organization, entity_type); immutable once published.
/// Owns its nodes and edges (embedded, not independently addressable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entity_type: String,
    pub version: i32,
    pub name: String,
    pub status: DefinitionStatus,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The single inicio node. Guaranteed present on published definitions.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::Inicio))
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// The outgoing edge with the given label, if any.
    pub fn edge_from(&self, node_id: &str, label: EdgeLabel) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source == node_id && e.label == label)
    }
}
