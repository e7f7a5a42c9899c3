//! HCQA API - HTTP query and ingestion server
//!
//! Serves `POST /` for questions, document upload and removal under
//! `/api/v1`, health probes, JSON metrics and the OpenAPI documentation.
//!
//! Author: hephaex@gmail.com

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use handlers::{documents, health, query};
use hcqa_core::config::{AppConfig, LoggingConfig};
use hcqa_rag::{HcqaService, Ingestor, JsonLinesSource};
use state::AppState;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[cfg(any(test, feature = "test-utils"))]
pub use testing::create_router_for_testing;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "HCQA API",
        version = "0.1.0",
        description = "Retrieval-augmented question answering over a streaming document collection"
    ),
    paths(
        health::health_check,
        health::readiness_check,
        query::answer_handler,
        query::query_handler,
        documents::upload_documents,
        documents::get_document,
        documents::delete_document,
    ),
    components(schemas(
        error::ApiError,
        health::HealthResponse,
        health::BuildInfo,
        health::ReadinessResponse,
        health::ReadinessChecks,
        query::QueryRequest,
        query::QueryResponse,
        query::Source,
        documents::DocumentInfo,
        documents::UploadDocumentsRequest,
        documents::UploadDocumentsResponse,
        documents::DeleteDocumentResponse,
    )),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "query", description = "Question answering"),
        (name = "documents", description = "Document ingestion and removal")
    )
)]
pub struct ApiDoc;

/// Build the application router around shared state
pub fn create_router(state: Arc<AppState>) -> Router {
    let server = &state.config.server;

    let mut router = Router::new()
        .route("/", post(query::answer_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .nest("/api/v1", routes::api_routes())
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::metrics_middleware,
        ))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_body_size))
        .layer(TraceLayer::new_for_http());

    if server.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level` when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=debug", config.level).into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Assemble the service from `config` and serve until Ctrl-C
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let (service, ingestor) = HcqaService::from_config(&config)?;
    run(config, service, ingestor, shutdown_signal()).await
}

/// Serve an assembled service until `signal` resolves.
///
/// Spawns the ingestor and, when configured, the JSON Lines source. On
/// shutdown the server stops accepting requests, the source stops, and the
/// ingestor commits whatever it still holds before this returns.
pub async fn run<F>(
    config: AppConfig,
    service: HcqaService,
    ingestor: Ingestor,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = CancellationToken::new();
    let ingest_task = tokio::spawn(ingestor.run(shutdown.clone()));

    let source_task = JsonLinesSource::from_config(&config.ingest).map(|source| {
        info!(
            path = %source.path().display(),
            follow = config.ingest.follow,
            "Starting JSON Lines source"
        );
        let handle = service.ingest.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            match source.run(handle, token).await {
                Ok(report) => info!(
                    lines = report.lines,
                    accepted = report.accepted,
                    malformed = report.malformed,
                    "JSON Lines source finished"
                ),
                Err(e) => error!(error = %e, "JSON Lines source failed"),
            }
        })
    });

    let addr = config.server.bind_address();
    let state = Arc::new(AppState::new(config, service));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HCQA API Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal => info!("Shutdown signal received"),
                _ = token.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    if let Some(task) = source_task {
        if let Err(e) = task.await {
            warn!(error = %e, "JSON Lines source task aborted");
        }
    }
    ingest_task.await?;
    info!("HCQA API Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
