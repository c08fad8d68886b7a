//! `wirepack dev` command implementation.
//!
//! Serves the in-memory compilation over HTTP and pushes live updates over a
//! WebSocket.
//!
//! ## Request flow
//!
//! ```text
//! GET /path
//!   → proxy table (longest prefix)      → forward upstream, 502 on failure
//!   → emitted asset                     → 200 with content type
//!   → history fallback (no extension)   → entry document, 200
//!   → no servable build yet             → error page, 500
//!   → 404
//! ```
//!
//! A watcher thread feeds changed paths to a single rebuild worker. Changes
//! that arrive while a rebuild runs are coalesced into the next one.

use super::Project;
use crate::notifier::DesktopNotifier;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use notify::{Config, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower_http::compression::CompressionLayer;
use wirepack_core::assets::content_type;
use wirepack_core::config::DevServerConfig;
use wirepack_core::dev::{
    should_ignore, DevSession, HmrFrame, RebuildStatus, Route, CLIENT_RUNTIME, WS_PATH,
};
use wirepack_core::plugins::CLIENT_PATH;
use wirepack_core::report::format_human;
use wirepack_core::{Compilation, ProxyError, ServerStartError};

/// Quiet period before a rebuild starts, so editor save bursts land in one.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Poll interval when `watchOptions.poll` is on.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Largest request body forwarded to a proxy upstream.
const MAX_PROXY_BODY: usize = 64 * 1024 * 1024;

/// Headers that apply to one connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub project: Project,
    /// `--host`, wins over `HOST` and the config.
    pub host: Option<String>,
    /// `--port`, wins over `PORT` and the config.
    pub port: Option<u16>,
    pub quiet: bool,
}

/// Shared server state.
struct ServerState {
    session: Arc<DevSession>,
    client: reqwest::Client,
}

type AppState = Arc<ServerState>;

/// Run the dev server until Ctrl+C.
pub async fn run(action: DevAction) -> Result<()> {
    let server = effective_server(
        action.project.config.dev_server.clone().with_process_env(),
        action.host.as_deref(),
        action.port,
    );
    let quiet = action.quiet;

    let compiler = action.project.compiler(true, DesktopNotifier::detect(quiet))?;
    let session = Arc::new(DevSession::new(compiler));
    let initial = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.start())
            .await
            .into_diagnostic()?
    };
    report_initial(&initial, quiet);

    let listener = bind(&server.host, server.port).await?;
    let local = listener.local_addr().into_diagnostic()?;

    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let root = action.project.root.clone();
    let output_dir = action.project.config.output.path.to_string_lossy().into_owned();
    let poll = server.watch_options.poll;
    std::thread::spawn(move || {
        if let Err(e) = watch_files(root, output_dir, poll, change_tx) {
            tracing::error!(error = %e, "file watcher stopped");
        }
    });
    tokio::spawn(rebuild_worker(Arc::clone(&session), change_rx, quiet));

    let app = router(Arc::clone(&session), server.compress)?;

    if !quiet {
        println!();
        println!("  wirepack dev server running at http://{}:{}", server.host, local.port());
        if server.hot {
            println!("  Live updates enabled");
        }
        println!();
        println!("  Press Ctrl+C to stop");
        println!();
    }
    tracing::info!(addr = %local, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

/// Apply CLI flags on top of the configured (and environment) host and port.
fn effective_server(
    mut server: DevServerConfig,
    host: Option<&str>,
    port: Option<u16>,
) -> DevServerConfig {
    if let Some(host) = host {
        server.host = host.to_string();
    }
    if let Some(port) = port {
        server.port = port;
    }
    server
}

async fn bind(host: &str, port: u16) -> Result<tokio::net::TcpListener> {
    let bind_host = if host == "localhost" { "127.0.0.1" } else { host };
    tokio::net::TcpListener::bind((bind_host, port))
        .await
        .map_err(|e| ServerStartError {
            addr: format!("{host}:{port}"),
            message: e.to_string(),
        })
        .into_diagnostic()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}

fn report_initial(compilation: &Compilation, quiet: bool) {
    let summary = compilation.summary();
    if summary.errors > 0 {
        tracing::warn!(errors = summary.errors, "initial build failed; serving error page");
    }
    if !quiet && !compilation.diagnostics.is_empty() {
        eprint!("{}", format_human(&compilation.diagnostics));
    }
}

/// Build the HTTP router for a started session.
///
/// The WebSocket route sits outside the compression layer.
pub fn router(session: Arc<DevSession>, compress: bool) -> Result<Router> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .into_diagnostic()?;
    let state: AppState = Arc::new(ServerState { session, client });

    let mut app = Router::new()
        .route(CLIENT_PATH, get(serve_client))
        .fallback(serve_request);
    if compress {
        app = app.layer(CompressionLayer::new());
    }
    Ok(app.route(WS_PATH, get(live_websocket)).with_state(state))
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn serve_client() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        CLIENT_RUNTIME,
    )
}

async fn serve_request(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let session = &state.session;

    match session.route(&path, query.as_deref()) {
        Route::Proxy { upstream, url } => match forward(&state.client, &upstream, &url, req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "proxy failed");
                (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
            }
        },
        Route::Asset(name) => match session.asset(&name) {
            Some(asset) => (
                [
                    (header::CONTENT_TYPE, content_type(&name)),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                asset.bytes.to_vec(),
            )
                .into_response(),
            None => not_found(&path),
        },
        Route::Fallback => match session.entry_document() {
            Some(doc) => Html(doc.bytes.to_vec()).into_response(),
            None => not_found(&path),
        },
        Route::ErrorPage => {
            (StatusCode::INTERNAL_SERVER_ERROR, Html(session.error_page())).into_response()
        }
        Route::NotFound => not_found(&path),
    }
}

fn not_found(path: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Cannot GET {path}")).into_response()
}

/// Forward one request upstream and stream the response back.
async fn forward(
    client: &reqwest::Client,
    upstream: &str,
    url: &str,
    req: Request,
) -> std::result::Result<Response, ProxyError> {
    let proxy_error = |message: String| ProxyError {
        upstream: upstream.to_string(),
        message,
    };
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| proxy_error(e.to_string()))?;
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let upstream_response = client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| proxy_error(e.to_string()))?;

    let mut builder = Response::builder().status(upstream_response.status());
    if let Some(out) = builder.headers_mut() {
        out.extend(upstream_response.headers().clone());
        strip_hop_by_hop(out);
    }
    builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| proxy_error(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for &name in HOP_BY_HOP {
        headers.remove(HeaderName::from_static(name));
    }
}

// ============================================================================
// WebSocket live updates
// ============================================================================

async fn live_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let frames = state.session.subscribe();
    ws.on_upgrade(move |socket| live_socket(socket, frames))
}

async fn live_socket(mut socket: WebSocket, mut frames: tokio::sync::broadcast::Receiver<HmrFrame>) {
    if socket
        .send(Message::Text(HmrFrame::Connected.to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let frame = match frame {
                    Ok(frame) => frame,
                    // Missed updates; the page can no longer be patched
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "live client lagged");
                        HmrFrame::FullReload
                    }
                    Err(RecvError::Closed) => break,
                };
                if socket.send(Message::Text(frame.to_json())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

// ============================================================================
// File Watching
// ============================================================================

/// Watch the project root and send relevant changed paths.
fn watch_files(
    root: PathBuf,
    output_dir: String,
    poll: bool,
    changes: mpsc::UnboundedSender<Vec<PathBuf>>,
) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher: Box<dyn Watcher> = if poll {
        Box::new(
            PollWatcher::new(tx, Config::default().with_poll_interval(POLL_INTERVAL))
                .into_diagnostic()?,
        )
    } else {
        Box::new(RecommendedWatcher::new(tx, Config::default()).into_diagnostic()?)
    };
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .into_diagnostic()?;
    tracing::debug!(root = %root.display(), poll, "watching");

    for result in rx {
        match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    continue;
                }
                let paths: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| !should_ignore(p, &root, &output_dir))
                    .collect();
                if paths.is_empty() {
                    continue;
                }
                if changes.send(paths).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        }
    }
    Ok(())
}

/// Run rebuilds one at a time, folding queued changes into the next run.
async fn rebuild_worker(
    session: Arc<DevSession>,
    mut changes: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    quiet: bool,
) {
    while let Some(mut changed) = changes.recv().await {
        tokio::time::sleep(DEBOUNCE).await;
        while let Ok(more) = changes.try_recv() {
            changed.extend(more);
        }
        changed.sort();
        changed.dedup();
        for path in &changed {
            tracing::debug!(path = %path.display(), "changed");
        }

        let worker = Arc::clone(&session);
        let status = match tokio::task::spawn_blocking(move || worker.rebuild(&changed)).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(error = %e, "rebuild task failed");
                continue;
            }
        };

        match status {
            RebuildStatus::Unchanged => tracing::debug!("no affected modules"),
            RebuildStatus::Committed {
                frames,
                full_reload,
            } => tracing::info!(frames, full_reload, "update sent"),
            RebuildStatus::Failed { errors } => {
                tracing::warn!(errors, "rebuild failed; keeping previous build");
            }
        }
        if !quiet {
            let diagnostics = session.diagnostics();
            if !diagnostics.is_empty() {
                eprint!("{}", format_human(&diagnostics));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use wirepack_core::plugins::LogNotifier;

    fn project(proxy: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("wirepack.config.json"),
            format!(
                r#"{{
                    "entry": "./src/main.js",
                    "plugins": {{ "notify": false }},
                    "devServer": {{ "proxy": {proxy} }}
                }}"#
            ),
        )
        .unwrap();
        fs::write(dir.path().join("src/main.js"), "module.exports = 'hi';").unwrap();
        dir
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn start(dir: &TempDir) -> SocketAddr {
        let project = Project::load(dir.path(), None).unwrap();
        let compiler = project.compiler(true, Arc::new(LogNotifier)).unwrap();
        let session = Arc::new(DevSession::new(compiler));
        session.start();
        serve(router(session, true).unwrap()).await
    }

    #[test]
    fn test_cli_flags_win() {
        let server = DevServerConfig::default().with_env_overrides(Some("0.0.0.0"), Some("3000"));
        let server = effective_server(server, None, Some(4000));
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 4000);
    }

    #[tokio::test]
    async fn test_history_fallback_serves_entry_document() {
        let dir = project("{}");
        let addr = start(&dir).await;
        let res = reqwest::get(format!("http://{addr}/settings/profile")).await.unwrap();
        assert_eq!(res.status(), 200);
        let body = res.text().await.unwrap();
        assert!(body.contains("<script src=\"/main.js\"></script>"));
        assert!(body.contains(CLIENT_PATH));
    }

    #[tokio::test]
    async fn test_serves_emitted_asset() {
        let dir = project("{}");
        let addr = start(&dir).await;
        let res = reqwest::get(format!("http://{addr}/main.js")).await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(
            res.headers()[header::CONTENT_TYPE],
            "application/javascript; charset=utf-8"
        );
        assert!(res.text().await.unwrap().contains("module.exports = 'hi';"));
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = project("{}");
        let addr = start(&dir).await;
        let res = reqwest::get(format!("http://{addr}/missing.png")).await.unwrap();
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_client_runtime_served() {
        let dir = project("{}");
        let addr = start(&dir).await;
        let res = reqwest::get(format!("http://{addr}{CLIENT_PATH}")).await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.text().await.unwrap().contains(WS_PATH));
    }

    #[tokio::test]
    async fn test_proxy_forwards_with_rewrite_and_query() {
        let upstream = serve(Router::new().route(
            "/v1/users",
            get(|req: Request| async move {
                format!("users?{}", req.uri().query().unwrap_or(""))
            }),
        ))
        .await;
        let dir = project(&format!(
            r#"{{ "/api": {{ "target": "http://{upstream}", "pathRewrite": {{ "^/api": "/v1" }} }} }}"#
        ));
        let addr = start(&dir).await;
        let res = reqwest::get(format!("http://{addr}/api/users?page=2")).await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "users?page=2");
    }

    #[tokio::test]
    async fn test_bind_in_use_is_startup_error() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(
            err.to_string().starts_with(&format!("Failed to bind 127.0.0.1:{port}")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_queued_changes_coalesce_into_one_rebuild() {
        let dir = project("{}");
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        fs::write(src.join("main.js"), "require('./a.js');\nrequire('./b.js');\n").unwrap();
        fs::write(src.join("a.js"), "module.exports = 'a';").unwrap();
        fs::write(src.join("b.js"), "module.exports = 'b';").unwrap();

        let project = Project::load(&root, None).unwrap();
        let compiler = project.compiler(true, Arc::new(LogNotifier)).unwrap();
        let session = Arc::new(DevSession::new(compiler));
        assert!(!session.start().has_errors());
        let mut frames = session.subscribe();

        // Alone, the first batch would push an update for a.js before the
        // second triggers a reload.
        fs::write(src.join("a.js"), "module.exports = 'a2';").unwrap();
        fs::write(src.join("c.js"), "module.exports = 'c';").unwrap();
        fs::write(src.join("b.js"), "require('./c.js');").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(vec![src.join("a.js")]).unwrap();
        tx.send(vec![src.join("b.js"), src.join("c.js")]).unwrap();
        drop(tx);
        rebuild_worker(Arc::clone(&session), rx, true).await;

        assert_eq!(frames.try_recv().unwrap(), HmrFrame::FullReload);
        assert!(frames.try_recv().is_err());
        let served = session.current().unwrap();
        let bundle = String::from_utf8_lossy(&served.assets["main.js"].bytes).into_owned();
        assert!(bundle.contains("module.exports = 'a2';"));
        assert!(bundle.contains("module.exports = 'c';"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_502() {
        let dead = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let dir = project(&format!(r#"{{ "/api": "http://{dead}" }}"#));
        let addr = start(&dir).await;
        let res = reqwest::get(format!("http://{addr}/api/users")).await.unwrap();
        assert_eq!(res.status(), 502);
        // Other routes keep working
        let res = reqwest::get(format!("http://{addr}/main.js")).await.unwrap();
        assert_eq!(res.status(), 200);
    }
}
