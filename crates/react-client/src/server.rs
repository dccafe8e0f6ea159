//! HTTP router and server lifecycle.
//!
//! One listener serves everything: prebundled modules, transformed
//! project sources, the overlay runtime, source snippets, public assets,
//! and the injected index page. Any request carrying a WebSocket upgrade
//! joins the HMR broadcast set instead.

use crate::config::ProjectConfig;
use crate::error::{DevError, Result};
use crate::hmr::{self, HmrBroadcaster, HmrMessage};
use crate::overlay;
use crate::plugins::{PluginHost, ServerContext};
use crate::prebundle::PrebundleCache;
use crate::resolver::ModuleResolver;
use crate::sourcemap::{self, SnippetError, SnippetQuery};
use crate::transform::{self, TransformCache};
use crate::transpiler::Transpiler;
use crate::watch::{SourceWatcher, WatchEvent};
use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, FromRequestParts, Path as UrlPath, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Hot-reload client template inlined into the index page.
const HMR_CLIENT: &str = include_str!("../assets/hmr-client.js");

/// Watcher debounce window in milliseconds.
const WATCH_DEBOUNCE_MS: u64 = 100;

/// How far past the configured port the alternate-port scan looks.
const PORT_SCAN_RANGE: u16 = 10;

/// Everything a request handler needs, shared across the router, the
/// watcher loop, and the WebSocket tasks.
pub struct DevState {
    pub config: ProjectConfig,
    pub addr: SocketAddr,
    pub transforms: TransformCache,
    pub prebundler: PrebundleCache,
    pub transpiler: Arc<Transpiler>,
    pub plugins: PluginHost,
    pub hmr: Arc<HmrBroadcaster>,
}

/// Shared handle to [`DevState`].
pub type SharedState = Arc<DevState>;

impl DevState {
    /// Wire up the core components for one project.
    pub fn new(config: ProjectConfig, addr: SocketAddr) -> Result<Self> {
        let transpiler = Arc::new(Transpiler::discover(&config.root_dir)?);
        let resolver = Arc::new(ModuleResolver::new(config.root_dir.clone()));
        let prebundler = PrebundleCache::new(
            config.src_dir.clone(),
            config.entry_file.clone(),
            config.dep_cache_dir(),
            resolver,
            Arc::clone(&transpiler),
        );
        let plugins = PluginHost::new(config.plugins.clone());
        Ok(Self {
            config,
            addr,
            transforms: TransformCache::new(),
            prebundler,
            transpiler,
            plugins,
            hmr: Arc::new(HmrBroadcaster::new()),
        })
    }

    /// Browser-facing URL of this server.
    pub fn server_url(&self) -> String {
        format!("http://localhost:{}", self.addr.port())
    }

    /// WebSocket URL baked into the injected client.
    pub fn ws_url(&self) -> String {
        format!("ws://localhost:{}", self.addr.port())
    }
}

/// Build the router. Route order follows request classification:
/// explicit module/runtime/snippet endpoints first, then the fallback
/// that handles sources, public assets, the index page, and upgrades.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/@modules/{*specifier}", get(serve_module))
        .route("/@runtime/overlay", get(serve_overlay))
        .route("/@source-map", get(serve_snippet))
        .fallback(serve_fallback)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the dev server until SIGINT.
///
/// Startup order: bind (prompting on a port conflict), prebundle, watch,
/// plugin `server_start` hooks, serve. Shutdown order: stop broadcasting
/// and close clients, stop the HTTP server, drop the watcher.
pub async fn serve(config: ProjectConfig) -> Result<()> {
    let Some(listener) = bind_with_prompt(config.listen_port).await? else {
        info!("alternate port declined, exiting");
        return Ok(());
    };
    let addr = listener.local_addr()?;
    let state: SharedState = Arc::new(DevState::new(config, addr)?);

    match state.prebundler.ensure_all().await {
        Ok(0) => debug!("dependency cache up to date"),
        Ok(built) => info!("prebundled {built} dependencies"),
        Err(e) => warn!("dependency prebundle failed: {e}"),
    }

    let (watcher, mut events) = SourceWatcher::new(
        state.config.src_dir.clone(),
        state.config.manifest_path.clone(),
        WATCH_DEBOUNCE_MS,
    )?;
    debug!("watching {}", watcher.src_dir().display());

    state.plugins.run_server_start(&ServerContext {
        root_dir: state.config.root_dir.clone(),
        server_url: state.server_url(),
    });

    let app = build_router(Arc::clone(&state));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    info!("dev server running at {}", state.server_url());
    if state.config.open_browser_on_start {
        open_browser(&state.server_url());
    }

    loop {
        tokio::select! {
            Some(event) = events.recv() => handle_watch_event(&state, event).await,
            _ = signal::ctrl_c() => {
                info!("shutting down dev server");
                break;
            }
        }
    }

    state.hmr.shutdown();
    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("http server terminated with error: {e}"),
        Err(e) => warn!("http server task failed: {e}"),
    }
    drop(watcher);
    Ok(())
}

/// React to one watcher event.
async fn handle_watch_event(state: &SharedState, event: WatchEvent) {
    match event {
        WatchEvent::Manifest => {
            info!("project manifest changed, refreshing dependency cache");
            if let Err(e) = state.prebundler.ensure_all().await {
                warn!("dependency refresh failed: {e}");
            }
        }
        WatchEvent::Source(path) => {
            state.transforms.invalidate(&path);

            let hub = Arc::clone(&state.hmr);
            state
                .plugins
                .run_hot_update(&path, &move |msg| hub.broadcast(&msg));

            // The event is advisory; re-stat before telling clients to
            // re-import a file that may already be gone.
            if !path.is_file() {
                return;
            }
            if let Some(url) = source_url(&state.config.root_dir, &path) {
                debug!("hmr update {url}");
                state.hmr.broadcast(&HmrMessage::Update { path: url });
            }
        }
    }
}

/// `GET /@modules/<specifier>`: stream the prebundle artifact, building
/// it on demand.
async fn serve_module(
    State(state): State<SharedState>,
    UrlPath(specifier): UrlPath<String>,
) -> Response {
    match state.prebundler.bundle_on_demand(&specifier).await {
        Ok(artifact) => match tokio::fs::read(&artifact).await {
            Ok(bytes) => js_response(StatusCode::OK, bytes),
            Err(e) => {
                error!("failed to read artifact for {specifier}: {e}");
                js_error_response(&DevError::Io(e))
            }
        },
        Err(e) => {
            error!("{e}");
            js_error_response(&e)
        }
    }
}

/// `GET /@runtime/overlay`.
async fn serve_overlay(State(state): State<SharedState>) -> Response {
    js_response(
        StatusCode::OK,
        overlay::overlay_source(&state.config.src_dir).await.into_bytes(),
    )
}

/// `GET /@source-map?file=&line=&column=`.
async fn serve_snippet(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = match SnippetQuery::from_params(&params) {
        Ok(query) => query,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, "{}".to_string()),
    };
    match sourcemap::lookup_snippet(&state.config.root_dir, &query) {
        Ok(snippet) => {
            // Both `source` and `file` carry the path; older overlay
            // builds read one, newer ones the other.
            let body = serde_json::json!({
                "source": snippet.file,
                "file": snippet.file,
                "line": snippet.line,
                "column": snippet.column,
                "snippet": snippet.snippet,
            });
            json_response(StatusCode::OK, body.to_string())
        }
        Err(SnippetError::BadRequest) => json_response(StatusCode::BAD_REQUEST, "{}".to_string()),
        Err(SnippetError::NotFound) => json_response(StatusCode::NOT_FOUND, "{}".to_string()),
    }
}

/// Whether a request carries a WebSocket upgrade.
fn is_websocket_upgrade(req: &Request) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Everything the explicit routes do not claim: WebSocket upgrades,
/// project sources, public assets, and the index page.
async fn serve_fallback(State(state): State<SharedState>, req: Request) -> Response {
    if is_websocket_upgrade(&req) {
        let (mut parts, _body) = req.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => {
                let hub = Arc::clone(&state.hmr);
                ws.on_upgrade(move |socket| hmr::handle_socket(socket, hub))
            }
            Err(e) => {
                warn!("websocket upgrade failed: {e}");
                (StatusCode::BAD_REQUEST, "WebSocket upgrade failed").into_response()
            }
        };
    }

    let path = req.uri().path().to_string();

    if path.starts_with("/src/") || path.ends_with(".css") {
        if let Some(file) = transform::resolve_source_path(&state.config.root_dir, &path) {
            return match transform::transform_source(
                &state.transforms,
                &state.plugins,
                &state.transpiler,
                &file,
            )
            .await
            {
                Ok(body) => js_response(StatusCode::OK, body.into_bytes()),
                Err(e) => {
                    error!("transform of {} failed: {e}", file.display());
                    // Raise the overlay in every open tab, not just the
                    // one that fetched the broken module.
                    state.hmr.broadcast(&HmrMessage::Error {
                        message: e.to_string(),
                        stack: None,
                    });
                    js_error_response(&e)
                }
            };
        }
    }

    if let Some(response) = serve_public(&state, &path).await {
        return response;
    }

    if path == "/" || path == "/index.html" {
        return serve_index(&state).await;
    }

    (StatusCode::NOT_FOUND, format!("Not found: {path}")).into_response()
}

/// Static files under `<root>/public/`.
async fn serve_public(state: &SharedState, url_path: &str) -> Option<Response> {
    let relative = url_path.trim_start_matches('/');
    if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
        return None;
    }
    let file = state.config.root_dir.join("public").join(relative);
    if !file.is_file() {
        return None;
    }
    match tokio::fs::read(&file).await {
        Ok(bytes) => Some(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type_for(&file))
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(bytes))
                .unwrap(),
        ),
        Err(e) => {
            warn!("failed to read public file {}: {e}", file.display());
            None
        }
    }
}

/// The project index page with the overlay and hot-reload scripts
/// injected before `</body>`.
async fn serve_index(state: &SharedState) -> Response {
    let html = match tokio::fs::read_to_string(&state.config.index_html_path).await {
        Ok(html) => html,
        Err(e) => {
            warn!(
                "failed to read {}: {e}",
                state.config.index_html_path.display()
            );
            return (StatusCode::NOT_FOUND, "index.html not found").into_response();
        }
    };
    let injected = inject_dev_scripts(&html, &state.ws_url());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(injected))
        .unwrap()
}

/// Add the overlay script tag and the inline hot-reload client to an
/// index page, once.
pub fn inject_dev_scripts(html: &str, ws_url: &str) -> String {
    if html.contains("/@runtime/overlay") {
        return html.to_string();
    }
    let client = HMR_CLIENT.replace("__WS_URL__", ws_url);
    let tags = format!(
        "  <script type=\"module\" src=\"/@runtime/overlay\"></script>\n  <script type=\"module\">\n{client}  </script>\n"
    );
    match html.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + tags.len());
            out.push_str(&html[..pos]);
            out.push_str(&tags);
            out.push_str(&html[pos..]);
            out
        }
        None => {
            let mut out = html.to_string();
            out.push('\n');
            out.push_str(&tags);
            out
        }
    }
}

/// Slash-normalized URL for a file under the project root.
fn source_url(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let mut url = String::new();
    for component in relative.components() {
        url.push('/');
        url.push_str(component.as_os_str().to_str()?);
    }
    Some(url)
}

/// Bind the configured port, or scan forward and ask before taking an
/// alternate. `None` means the user declined.
async fn bind_with_prompt(port: u16) -> Result<Option<TcpListener>> {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => Ok(Some(listener)),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            let Some(alternate) = find_available_port(port) else {
                return Err(DevError::Server(format!(
                    "ports {port}-{} are all in use",
                    port.saturating_add(PORT_SCAN_RANGE)
                )));
            };
            if confirm_alternate_port(port, alternate).await? {
                let listener = TcpListener::bind(("127.0.0.1", alternate)).await?;
                Ok(Some(listener))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// First free port in `(requested, requested + PORT_SCAN_RANGE]`.
fn find_available_port(requested: u16) -> Option<u16> {
    (1..=PORT_SCAN_RANGE)
        .map(|offset| requested.saturating_add(offset))
        .find(|port| std::net::TcpListener::bind(("127.0.0.1", *port)).is_ok())
}

/// Terminal prompt for the alternate port. Empty input means yes.
async fn confirm_alternate_port(requested: u16, alternate: u16) -> Result<bool> {
    let answer = tokio::task::spawn_blocking(move || {
        eprint!("Port {requested} is in use. Use port {alternate} instead? [Y/n] ");
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| DevError::Server(e.to_string()))??;

    let trimmed = answer.trim().to_ascii_lowercase();
    Ok(trimmed.is_empty() || trimmed == "y" || trimmed == "yes")
}

/// Launch the platform browser opener; failures are only warnings.
fn open_browser(url: &str) {
    use std::process::Command;

    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => info!("opened browser at {url}"),
        Err(e) => warn!("failed to open browser: {e}"),
    }
}

fn js_response(status: StatusCode, body: Vec<u8>) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/javascript; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .unwrap()
}

/// Error body for routes the browser imports as modules: always a valid
/// JavaScript comment, never HTML.
fn js_error_response(error: &DevError) -> Response {
    js_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        error.as_js_comment().into_bytes(),
    )
}

fn json_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}

/// Content type for public assets, by extension.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
