// Instance lifecycle HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use visto_contracts::{
    ApproveRequest, CancelRequest, HistoryEventDto, Instance, InstanceDetailDto,
    ListInstancesParams, ListResponse, PendingItem, PendingParams, RejectRequest,
    StartInstanceRequest,
};
use visto_core::{Actor, ApprovalGateway, InstanceFilter, StartRequest};

use crate::common::OrgId;
use crate::error::ApiError;

/// App state for instance routes
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ApprovalGateway>,
}

pub fn routes(state: AppState) -> Router {
    // /pending before /:instance_id so it is not captured as an id
    Router::new()
        .route("/v1/instances", post(start_instance).get(list_instances))
        .route("/v1/instances/pending", get(pending_instances))
        .route("/v1/instances/:instance_id", get(get_instance))
        .route("/v1/instances/:instance_id/approve", post(approve_instance))
        .route("/v1/instances/:instance_id/reject", post(reject_instance))
        .route("/v1/instances/:instance_id/cancel", post(cancel_instance))
        .with_state(state)
}

fn actor(id: Uuid, is_admin: bool) -> Actor {
    if is_admin {
        Actor::admin(id)
    } else {
        Actor::user(id)
    }
}

/// POST /v1/instances - Start a workflow instance for an entity
#[utoipa::path(
    post,
    path = "/v1/instances",
    request_body = StartInstanceRequest,
    responses(
        (status = 201, description = "Instance started", body = Instance),
        (status = 404, description = "No published definition for entity type"),
        (status = 409, description = "Entity already has an in-progress instance"),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn start_instance(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Json(req): Json<StartInstanceRequest>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let instance = state
        .gateway
        .start(
            org,
            StartRequest {
                entity_type: req.entity_type,
                entity_id: req.entity_id,
                requester_id: req.requester_id,
                entity_snapshot: req.entity_snapshot,
                priority: req.priority,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(instance.into())))
}

/// GET /v1/instances - List instances with filters
#[utoipa::path(
    get,
    path = "/v1/instances",
    params(
        ("entity_type" = Option<String>, Query, description = "Filter by entity type"),
        ("state" = Option<String>, Query, description = "Filter by instance state"),
        ("from" = Option<String>, Query, description = "Started at or after (RFC 3339)"),
        ("to" = Option<String>, Query, description = "Started at or before (RFC 3339)"),
        ("limit" = Option<i64>, Query, description = "Page size (default 20)"),
        ("offset" = Option<i64>, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "List of instances", body = ListResponse<Instance>),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn list_instances(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Query(params): Query<ListInstancesParams>,
) -> Result<Json<ListResponse<Instance>>, ApiError> {
    let instances = state
        .gateway
        .list_instances(
            org,
            InstanceFilter {
                entity_type: params.entity_type,
                state: params.state,
                from: params.from,
                to: params.to,
                limit: params.limit,
                offset: params.offset,
            },
        )
        .await?;
    Ok(Json(ListResponse::new(
        instances.into_iter().map(Instance::from).collect(),
    )))
}

/// GET /v1/instances/pending - Approval queue for an actor
#[utoipa::path(
    get,
    path = "/v1/instances/pending",
    params(
        ("actor_id" = Uuid, Query, description = "Actor whose queue to build"),
        ("is_admin" = Option<bool>, Query, description = "Admins also see error-flagged instances")
    ),
    responses(
        (status = 200, description = "Pending instances for the actor", body = ListResponse<PendingItem>),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn pending_instances(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Query(params): Query<PendingParams>,
) -> Result<Json<ListResponse<PendingItem>>, ApiError> {
    let pending = state
        .gateway
        .pending(org, actor(params.actor_id, params.is_admin))
        .await?;
    Ok(Json(ListResponse::new(
        pending
            .into_iter()
            .map(|p| PendingItem {
                instance: p.instance.into(),
                summary: p.summary,
                node_name: p.node_name,
                deadline: p.deadline,
            })
            .collect(),
    )))
}

/// GET /v1/instances/{instance_id} - Instance detail with full history
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}",
    params(
        ("instance_id" = Uuid, Path, description = "Instance ID")
    ),
    responses(
        (status = 200, description = "Instance detail", body = InstanceDetailDto),
        (status = 404, description = "Instance not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn get_instance(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(instance_id): Path<Uuid>,
) -> Result<Json<InstanceDetailDto>, ApiError> {
    let detail = state.gateway.detail(org, instance_id).await?;
    let entity_snapshot = detail.instance.entity_snapshot.clone();
    Ok(Json(InstanceDetailDto {
        instance: detail.instance.into(),
        history: detail.history.into_iter().map(HistoryEventDto::from).collect(),
        summary: detail.summary,
        entity_snapshot,
    }))
}

/// POST /v1/instances/{instance_id}/approve - Approve the current node
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/approve",
    params(
        ("instance_id" = Uuid, Path, description = "Instance ID")
    ),
    request_body = ApproveRequest,
    responses(
        (status = 200, description = "Approval applied", body = Instance),
        (status = 403, description = "Actor is not an eligible approver"),
        (status = 404, description = "Instance not found"),
        (status = 409, description = "Instance is not awaiting approval"),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn approve_instance(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(instance_id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .gateway
        .approve(org, instance_id, Actor::user(req.actor_id), req.comment)
        .await?;
    Ok(Json(instance.into()))
}

/// POST /v1/instances/{instance_id}/reject - Reject the current node
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/reject",
    params(
        ("instance_id" = Uuid, Path, description = "Instance ID")
    ),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Rejection applied", body = Instance),
        (status = 403, description = "Actor is not an eligible approver"),
        (status = 404, description = "Instance not found"),
        (status = 409, description = "Instance is not awaiting approval"),
        (status = 422, description = "Motivo too short"),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn reject_instance(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(instance_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .gateway
        .reject(org, instance_id, Actor::user(req.actor_id), req.motivo)
        .await?;
    Ok(Json(instance.into()))
}

/// POST /v1/instances/{instance_id}/cancel - Cancel an in-progress instance
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/cancel",
    params(
        ("instance_id" = Uuid, Path, description = "Instance ID")
    ),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Instance cancelled", body = Instance),
        (status = 403, description = "Actor is neither the requester nor an admin"),
        (status = 404, description = "Instance not found"),
        (status = 409, description = "Instance already terminal"),
        (status = 500, description = "Internal server error")
    ),
    tag = "instances"
)]
pub async fn cancel_instance(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(instance_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .gateway
        .cancel(
            org,
            instance_id,
            actor(req.actor_id, req.is_admin),
            req.motivo,
        )
        .await?;
    Ok(Json(instance.into()))
}
