//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::PlaneError;
use crate::server::handlers::{
    cancel_certificates_handler, health_handler, provider_fields_handler, providers_handler,
    resources_handler, scale_handler, start_certificates_handler, status_handler,
    validate_provider_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the HTTP API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Applications
        .route("/applications/{uuid}/status", get(status_handler))
        .route("/applications/{uuid}/resources", get(resources_handler))
        .route("/applications/{uuid}/scale", post(scale_handler))
        .route(
            "/applications/{uuid}/certificates",
            post(start_certificates_handler).delete(cancel_certificates_handler),
        )
        // DNS providers
        .route("/dns/providers", get(providers_handler))
        .route("/dns/providers/{name}/fields", get(provider_fields_handler))
        .route("/dns/providers/{name}/validate", post(validate_provider_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlaneError>>, PlaneError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PlaneError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PlaneError::ServerError(e.to_string()))
    });

    Ok(handle)
}
