//! Axum transport: theme asset serving plus a fallback that bridges
//! every other request into the application router.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use forgekit::{App, Request};

const BODY_LIMIT: usize = 2 * 1024 * 1024;

pub async fn serve(
    app: Arc<App>,
    themes_dir: PathBuf,
    addr: SocketAddr,
    timeout_sec: u64,
) -> anyhow::Result<()> {
    let timeout_sec = if timeout_sec == 0 { 30 } else { timeout_sec };
    let router = axum::Router::new()
        // theme assets straight from disk, everything else through the app
        .nest_service("/themes", ServeDir::new(themes_dir))
        .fallback(dispatch)
        .with_state(app)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_sec)));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(forgekit_bootstrap::signals::wait_for_shutdown())
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

async fn dispatch(
    State(app): State<Arc<App>>,
    req: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .unwrap_or_default();

    let mut request = Request::new(parts.method, parts.uri.path())
        .with_headers(parts.headers)
        .with_body(bytes.to_vec());
    if let Some(query) = parts.uri.query() {
        request = request.with_query(query);
    }

    let response = app.handle(request).await;

    let mut builder = http::Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| {
            http::Response::builder()
                .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default()
        })
}
