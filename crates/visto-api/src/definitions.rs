// Definition HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use visto_contracts::{CreateDefinitionRequest, Definition, ListDefinitionsParams, ListResponse};
use visto_core::{ApprovalGateway, Edge, Node, VistoError};

use crate::common::OrgId;
use crate::error::ApiError;

/// App state for definition routes
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ApprovalGateway>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/definitions", post(create_definition).get(list_definitions))
        .route("/v1/definitions/:definition_id", get(get_definition))
        .route("/v1/definitions/:definition_id/publish", post(publish_definition))
        .route("/v1/definitions/:definition_id/archive", post(archive_definition))
        .with_state(state)
}

fn parse_graph(req: CreateDefinitionRequest) -> Result<(String, String, Vec<Node>, Vec<Edge>), ApiError> {
    let nodes: Vec<Node> = serde_json::from_value(serde_json::Value::Array(req.nodes))
        .map_err(|e| ApiError::from(VistoError::invalid(format!("malformed nodes: {e}"))))?;
    let edges: Vec<Edge> = serde_json::from_value(serde_json::Value::Array(req.edges))
        .map_err(|e| ApiError::from(VistoError::invalid(format!("malformed edges: {e}"))))?;
    Ok((req.entity_type, req.name, nodes, edges))
}

/// POST /v1/definitions - Create a draft definition
#[utoipa::path(
    post,
    path = "/v1/definitions",
    request_body = CreateDefinitionRequest,
    responses(
        (status = 201, description = "Draft created", body = Definition),
        (status = 422, description = "Malformed graph"),
        (status = 500, description = "Internal server error")
    ),
    tag = "definitions"
)]
pub async fn create_definition(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Json(req): Json<CreateDefinitionRequest>,
) -> Result<(StatusCode, Json<Definition>), ApiError> {
    let (entity_type, name, nodes, edges) = parse_graph(req)?;
    let def = state
        .gateway
        .create_definition(org, entity_type, name, nodes, edges)
        .await?;
    Ok((StatusCode::CREATED, Json(def.into())))
}

/// GET /v1/definitions - List definitions, optionally by entity type
#[utoipa::path(
    get,
    path = "/v1/definitions",
    params(
        ("entity_type" = Option<String>, Query, description = "Filter by entity type")
    ),
    responses(
        (status = 200, description = "List of definitions", body = ListResponse<Definition>),
        (status = 500, description = "Internal server error")
    ),
    tag = "definitions"
)]
pub async fn list_definitions(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Query(params): Query<ListDefinitionsParams>,
) -> Result<Json<ListResponse<Definition>>, ApiError> {
    let defs = state
        .gateway
        .list_definitions(org, params.entity_type.as_deref())
        .await?;
    Ok(Json(ListResponse::new(
        defs.into_iter().map(Definition::from).collect(),
    )))
}

/// GET /v1/definitions/{definition_id} - Get one definition
#[utoipa::path(
    get,
    path = "/v1/definitions/{definition_id}",
    params(
        ("definition_id" = Uuid, Path, description = "Definition ID")
    ),
    responses(
        (status = 200, description = "Definition found", body = Definition),
        (status = 404, description = "Definition not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "definitions"
)]
pub async fn get_definition(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(definition_id): Path<Uuid>,
) -> Result<Json<Definition>, ApiError> {
    let def = state.gateway.get_definition(org, definition_id).await?;
    Ok(Json(def.into()))
}

/// POST /v1/definitions/{definition_id}/publish - Validate and publish a draft
#[utoipa::path(
    post,
    path = "/v1/definitions/{definition_id}/publish",
    params(
        ("definition_id" = Uuid, Path, description = "Definition ID")
    ),
    responses(
        (status = 200, description = "Definition published", body = Definition),
        (status = 404, description = "Definition not found"),
        (status = 409, description = "Definition is not a draft"),
        (status = 422, description = "Graph failed validation"),
        (status = 500, description = "Internal server error")
    ),
    tag = "definitions"
)]
pub async fn publish_definition(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(definition_id): Path<Uuid>,
) -> Result<Json<Definition>, ApiError> {
    let def = state.gateway.publish_definition(org, definition_id).await?;
    Ok(Json(def.into()))
}

/// POST /v1/definitions/{definition_id}/archive - Archive a definition
#[utoipa::path(
    post,
    path = "/v1/definitions/{definition_id}/archive",
    params(
        ("definition_id" = Uuid, Path, description = "Definition ID")
    ),
    responses(
        (status = 200, description = "Definition archived", body = Definition),
        (status = 404, description = "Definition not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "definitions"
)]
pub async fn archive_definition(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(definition_id): Path<Uuid>,
) -> Result<Json<Definition>, ApiError> {
    let def = state.gateway.archive_definition(org, definition_id).await?;
    Ok(Json(def.into()))
}
