// Definition DTOs for public API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use visto_core::DefinitionStatus;

/// A workflow definition as exposed over the API. Nodes and edges carry the
/// editor's serialized graph; the engine validates it on publish.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Definition {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entity_type: String,
    pub version: i32,
    pub name: String,
    pub status: DefinitionStatus,
    #[schema(value_type = Vec<Object>)]
    pub nodes: Vec<serde_json::Value>,
    #[schema(value_type = Vec<Object>)]
    pub edges: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<visto_core::WorkflowDefinition> for Definition {
    fn from(d: visto_core::WorkflowDefinition) -> Self {
        Definition {
            id: d.id,
            organization_id: d.organization_id,
            entity_type: d.entity_type,
            version: d.version,
            name: d.name,
            status: d.status,
            nodes: d
                .nodes
                .into_iter()
                .map(|n| serde_json::to_value(n).unwrap_or_default())
                .collect(),
            edges: d
                .edges
                .into_iter()
                .map(|e| serde_json::to_value(e).unwrap_or_default())
                .collect(),
            created_at: d.created_at,
            published_at: d.published_at,
        }
    }
}

/// Request to create a draft definition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateDefinitionRequest {
    #[schema(example = "orden_compra")]
    pub entity_type: String,
    #[schema(example = "Aprobación de órdenes de compra")]
    pub name: String,
    /// Nodes in the editor's serialized form.
    #[schema(value_type = Vec<Object>, example = json!([
        {"id": "inicio", "tipo": "inicio"},
        {"id": "a1", "tipo": "aprobacion", "aprobador": {"tipo": "rol", "valor": "gerente"}},
        {"id": "ok", "tipo": "fin", "resultado": "aprobado"},
        {"id": "ko", "tipo": "fin", "resultado": "rechazado"}
    ]))]
    pub nodes: Vec<serde_json::Value>,
    /// Edges in the editor's serialized form.
    #[schema(value_type = Vec<Object>, example = json!([
        {"id": "e1", "source": "inicio", "label": "siguiente", "target": "a1"},
        {"id": "e2", "source": "a1", "label": "aprobar", "target": "ok"},
        {"id": "e3", "source": "a1", "label": "rechazar", "target": "ko"}
    ]))]
    pub edges: Vec<serde_json::Value>,
}

/// Query parameters for listing definitions.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ListDefinitionsParams {
    pub entity_type: Option<String>,
}
