//! Ephemeral content server.
//!
//! Serves the site root over loopback HTTP so the renderer can load pages
//! through normal relative URLs, with their scripts running exactly as in
//! production.
//!
//! # Routing
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET /` | the index document (`site.index`) |
//! | `GET /<path>` | `<root>/<path>` with a content type from its extension |
//! | missing file, `..` segment | `404 Not found` |
//!
//! The listener is bound before [`ContentServer::start`] returns, so the
//! server is reachable before the first page visit. Dropping the handle
//! stops the server; [`ContentServer::shutdown`] also waits for it.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct SiteState {
    root: Arc<PathBuf>,
    index: Arc<String>,
}

/// Handle to a running content server.
pub struct ContentServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ContentServer {
    /// Bind `127.0.0.1:port` (`0` = ephemeral) and start serving `root`.
    pub async fn start(root: &Path, port: u16, index: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("Failed to bind content server on port {}", port))?;
        let addr = listener.local_addr()?;

        let state = SiteState {
            root: Arc::new(root.to_path_buf()),
            index: Arc::new(index.trim_start_matches('/').to_string()),
        };
        let app = router(state);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "content server stopped with error");
            }
        });

        info!(%addr, root = %root.display(), "content server listening");
        Ok(Self {
            addr,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>` with no trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait (bounded) for in-flight
    /// requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!(addr = %self.addr, "content server did not drain in time, aborting");
                handle.abort();
            }
        }
        debug!(addr = %self.addr, "content server stopped");
    }
}

impl Drop for ContentServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn router(state: SiteState) -> Router {
    Router::new()
        .fallback(serve_file)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn serve_file(State(state): State<SiteState>, uri: Uri) -> Response {
    let Some(relative) = resolve_path(uri.path(), &state.index) else {
        return not_found();
    };
    let path = state.root.join(&relative);

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type(&relative))],
            Body::from(bytes),
        )
            .into_response(),
        Err(_) => not_found(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Map a request path onto a path relative to the root. `None` for paths
/// that would escape it.
fn resolve_path(raw: &str, index: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(raw).ok()?;
    let trimmed = decoded.trim_start_matches('/');
    let relative = if trimmed.is_empty() { index } else { trimmed };

    let path = PathBuf::from(relative);
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Some(path)
    } else {
        None
    }
}

/// Content type by file extension; unknown extensions are opaque binary.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}
