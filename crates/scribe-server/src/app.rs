use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;

use axum::{
    Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use scribe_api::state::AppState;

/// Query routes, the `/gateway` ingestion socket and, when `public_dir`
/// exists, static files as the fallback.
pub fn build(state: AppState, public_dir: &Path) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(gateway))
        .with_state(state.clone());

    let mut app = Router::new()
        .merge(scribe_api::router(state))
        .merge(ws_route);

    if public_dir.is_dir() {
        info!("Serving static files from {}", public_dir.display());
        app = app.fallback_service(ServeDir::new(public_dir));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` until `shutdown` resolves. Peer addresses reach the
/// ingestion sessions through `ConnectInfo`.
pub async fn serve<S>(listener: TcpListener, app: Router, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn gateway(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.listener.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let listener = state.listener.clone();
    ws.on_upgrade(move |socket| async move { listener.accept(socket, Some(peer)).await })
}
