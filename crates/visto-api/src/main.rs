// Visto approval API server
// Decision: tenant scope travels as an x-organization-id header set by the
// caller; this service never derives it from authentication state

mod common;
mod definitions;
mod error;
mod instances;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use visto_contracts::*;
use visto_core::{
    ActionExecutor, ApprovalGateway, ApproverResolver, DefinitionStore, EntityResolver,
    HistoryStore, InstanceStore,
};
use visto_storage::Database;

use visto_worker::collaborators::{
    FileDirectoryResolver, LoggingActionExecutor, SnapshotEntityResolver,
};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        definitions::create_definition,
        definitions::list_definitions,
        definitions::get_definition,
        definitions::publish_definition,
        definitions::archive_definition,
        instances::start_instance,
        instances::list_instances,
        instances::pending_instances,
        instances::get_instance,
        instances::approve_instance,
        instances::reject_instance,
        instances::cancel_instance,
    ),
    components(
        schemas(
            Definition, CreateDefinitionRequest,
            Instance, InstanceDetailDto, HistoryEventDto, PendingItem,
            StartInstanceRequest, ApproveRequest, RejectRequest, CancelRequest,
            ListResponse<Definition>,
            ListResponse<Instance>,
            ListResponse<PendingItem>,
            ErrorBody,
        )
    ),
    tags(
        (name = "definitions", description = "Workflow definition management"),
        (name = "instances", description = "Workflow instance lifecycle and approvals")
    ),
    info(
        title = "Visto API",
        version = "0.2.0",
        description = "Graph-based approval workflows for business entities",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visto_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    tracing::info!("visto-api starting...");

    // Initialize database and run migrations
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    visto_storage::MIGRATOR
        .run(db.pool())
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Connected to database, migrations applied");

    let db = Arc::new(db);
    let instance_store: Arc<dyn InstanceStore> = db.clone();
    let definition_store: Arc<dyn DefinitionStore> = db.clone();
    let history_store: Arc<dyn HistoryStore> = db.clone();

    // Collaborator seams; standalone defaults, replaced when embedded
    let entities: Arc<dyn EntityResolver> =
        Arc::new(SnapshotEntityResolver::new(instance_store.clone()));
    let approvers: Arc<dyn ApproverResolver> = Arc::new(
        FileDirectoryResolver::from_env().context("Failed to load approver directory")?,
    );
    let actions: Arc<dyn ActionExecutor> = Arc::new(LoggingActionExecutor);

    let gateway = Arc::new(ApprovalGateway::new(
        definition_store,
        instance_store,
        history_store,
        entities,
        approvers,
        actions,
    ));

    // Load API prefix from environment (default: empty)
    // Example: API_PREFIX="/api" results in routes like /api/v1/instances
    let api_prefix = std::env::var("API_PREFIX").unwrap_or_default();
    if !api_prefix.is_empty() {
        tracing::info!(prefix = %api_prefix, "API prefix configured");
    }

    // Load CORS allowed origins from environment (optional)
    // Only needed when UI is served from a different origin than the API
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
    }

    // Build API routes
    let api_routes = Router::new()
        .merge(definitions::routes(definitions::AppState {
            gateway: gateway.clone(),
        }))
        .merge(instances::routes(instances::AppState { gateway }));

    let mut app = Router::new().route("/health", get(health));
    app = app.merge(build_router_with_prefix(api_routes, &api_prefix));

    // Add Swagger UI
    let app =
        app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // Add CORS layer only if origins are configured
    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    axum::http::HeaderName::from_static(common::ORGANIZATION_HEADER),
                ])
                .allow_credentials(true),
        )
    } else {
        app
    };

    // Add tracing
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let port = std::env::var("PORT").unwrap_or_else(|_| "9000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Build router with optional API prefix (extracted for testing)
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
