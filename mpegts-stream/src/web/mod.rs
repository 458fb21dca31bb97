//! HTTP status and control API.

pub mod api;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::monitor::MonitorRegistry;
use crate::DatabaseHandle;
use state::WebState;

pub fn router(database: DatabaseHandle, registry: Arc<MonitorRegistry>) -> Router {
    let web_state = Arc::new(WebState::new(database, registry));

    Router::new()
        // Streams
        .route("/api/streams", get(api::get_streams).post(api::add_stream))
        .route(
            "/api/streams/:title",
            get(api::get_stream).delete(api::remove_stream),
        )
        .route("/api/streams/:title/start", post(api::start_stream))
        .route("/api/streams/:title/stop", post(api::stop_stream))
        .route("/api/streams/:title/config", post(api::update_stream_config))
        // Records
        .route("/api/records", get(api::get_records))
        .route("/api/records/:id", get(api::get_record))
        .with_state(web_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until the listener fails.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    database: DatabaseHandle,
    registry: Arc<MonitorRegistry>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(database, registry);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Web API listening on http://{}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
