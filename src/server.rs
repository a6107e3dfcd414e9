//! The HTTP router, the file watcher + HMR broadcaster, the overlay
//! endpoint, and the source-map snippet endpoint all live here behind one
//! axum `Router` and one `DevServer` state struct.

use crate::cache::{PrebundleCache, TransformCache};
use crate::config::DEFAULT_PORT;
use crate::core::models::{BareSpecifier, HmrMessage, ProjectConfig};
use crate::core::plugin::{BroadcastHandle, PluginHost, PluginServerContext};
use crate::resolver::Resolver;
use crate::transform::{css_hot_reload_module, rewrite_bare_imports, TranspilerGateway};
use crate::utils::errors::SprigError;
use crate::utils::logging::Logger;
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Query, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use serde::Deserialize;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct DevServer {
    config: Arc<ProjectConfig>,
    resolver: Arc<Resolver>,
    prebundle: Arc<PrebundleCache>,
    transform_cache: Arc<TransformCache>,
    gateway: Arc<TranspilerGateway>,
    plugin_host: Arc<PluginHost>,
    hmr_tx: broadcast::Sender<HmrMessage>,
}

impl DevServer {
    pub fn new(config: ProjectConfig) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(Resolver::new(config.root_dir.clone(), config.resolve.clone()));
        let prebundle = Arc::new(PrebundleCache::new(
            config.root_dir.clone(),
            resolver.clone(),
            num_cpus::get(),
        ));
        let (hmr_tx, _) = broadcast::channel(1024);
        let plugin_host = Arc::new(PluginHost::new(config.plugins.clone()));

        Self {
            config,
            resolver,
            prebundle,
            transform_cache: Arc::new(TransformCache::new()),
            gateway: Arc::new(TranspilerGateway::new()),
            plugin_host,
            hmr_tx,
        }
    }

    /// Scans the direct dependency set from the entry file and builds any
    /// missing or stale artifact. Exposed separately from [`Self::run`] so
    /// tests can drive the HTTP surface without binding a real socket.
    pub async fn warm_prebundle(&self) -> crate::utils::Result<()> {
        self.prebundle
            .refresh(&self.config.entry_file, &self.config.resolve.conditions)
            .await
    }

    /// Binds the listener, runs the prebundle at startup, starts the
    /// watcher, and serves until SIGINT. If the configured port is taken,
    /// the user is asked whether to try the next one; declining exits the
    /// process cleanly rather than treating the conflict as a failure.
    pub async fn run(self) -> crate::utils::Result<()> {
        self.warm_prebundle().await?;

        let listener = match bind_with_port_prompt(self.config.listen_port).await? {
            Some(listener) => listener,
            None => {
                Logger::info("startup cancelled: no port available");
                return Ok(());
            }
        };

        let watcher_handle = self.clone().spawn_watcher();
        let app = self.clone().into_router();
        let bound_addr = listener.local_addr().map_err(SprigError::from)?;

        Logger::server_listening(&self.config.listen_host, bound_addr.port());

        let server_context = PluginServerContext::new(bound_addr, self.hmr_tx.clone());
        self.plugin_host.run_server_start(&server_context).await?;

        tokio::select! {
            result = axum::serve(listener, app) => {
                result.map_err(SprigError::from)?;
            }
            _ = tokio::signal::ctrl_c() => {
                Logger::info("shutting down");
            }
        }

        watcher_handle.abort();
        Ok(())
    }

    /// Builds the axum [`Router`] without binding a socket, so tests can
    /// drive requests through it directly (e.g. via `tower::ServiceExt::oneshot`).
    pub fn into_router(self) -> Router {
        Router::new()
            .route("/", get(handle_request))
            .route("/*path", get(handle_request))
            .with_state(self)
    }

    fn spawn_watcher(self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            let (tx, rx) = std::sync::mpsc::channel::<Event>();
            let mut watcher = match RecommendedWatcher::new(
                move |res: Result<Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = tx.send(event);
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(err) => {
                    Logger::watcher_error(&err.to_string());
                    return;
                }
            };

            if let Err(err) = watcher.watch(&self.config.src_dir, RecursiveMode::Recursive) {
                Logger::watcher_error(&err.to_string());
                return;
            }
            let _ = watcher.watch(&self.config.manifest_path(), RecursiveMode::NonRecursive);

            let rt = tokio::runtime::Handle::current();
            for event in rx {
                for path in event.paths {
                    if !should_watch(&path, &self.config.root_dir) {
                        continue;
                    }
                    let server = self.clone();
                    rt.block_on(server.handle_file_change(path));
                }
            }
        })
    }

    async fn handle_file_change(&self, path: PathBuf) {
        if path == self.config.manifest_path() {
            if let Err(err) = self
                .prebundle
                .refresh(&self.config.entry_file, &self.config.resolve.conditions)
                .await
            {
                Logger::prebundle_failed("<manifest refresh>", &err.to_string());
            }
            return;
        }

        if !path.is_file() {
            return;
        }

        self.transform_cache.invalidate(&path);

        let broadcast = BroadcastHandle::new(self.hmr_tx.clone());
        let force_reload = self.plugin_host.run_hot_update(&path, &broadcast).await;

        let message = if force_reload {
            Logger::hmr_full_reload(&path.display().to_string());
            HmrMessage::Reload
        } else {
            let relative = path
                .strip_prefix(&self.config.root_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            HmrMessage::Update {
                path: format!("/{}", relative),
            }
        };

        let receivers = self.hmr_tx.receiver_count();
        Logger::hmr_update(&path.display().to_string(), receivers);
        let _ = self.hmr_tx.send(message);
    }
}

/// Binds `127.0.0.1:<port>`, retrying on the next port up each time the
/// user confirms an interactive prompt that the current one is taken.
/// Returns `None` if the user declines, so the caller can exit cleanly
/// instead of treating the conflict as a startup error.
async fn bind_with_port_prompt(port: u16) -> crate::utils::Result<Option<tokio::net::TcpListener>> {
    let mut candidate_port = port;
    loop {
        let addr = SocketAddr::from(([127, 0, 0, 1], candidate_port));
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => return Ok(Some(listener)),
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                let next_port = candidate_port + 1;
                let question = format!(
                    "Port {} is in use, try {} instead? [Y/n] ",
                    candidate_port, next_port
                );
                if !prompt_yes_no(&question) {
                    return Ok(None);
                }
                candidate_port = next_port;
            }
            Err(err) => return Err(SprigError::from(err)),
        }
    }
}

/// Reads a yes/no answer from stdin. An empty line (just pressing enter)
/// counts as yes, matching the `[Y/n]` prompt text.
fn prompt_yes_no(question: &str) -> bool {
    print!("{}", question);
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }

    let answer = answer.trim().to_lowercase();
    answer.is_empty() || answer == "y" || answer == "yes"
}

fn should_watch(path: &Path, root_dir: &Path) -> bool {
    if let Ok(relative) = path.strip_prefix(root_dir) {
        if relative.starts_with(".react-client") {
            return false;
        }
    }
    !path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct SourceMapQuery {
    file: Option<String>,
    line: Option<usize>,
    column: Option<usize>,
}

/// Single entry point for every HTTP request. Route matching happens in
/// a fixed order below; any request carrying a WebSocket handshake is
/// upgraded before any of the other matchers run.
async fn handle_request(
    State(server): State<DevServer>,
    ws: Option<WebSocketUpgrade>,
    uri: axum::http::Uri,
    Query(query): Query<SourceMapQuery>,
) -> Response {
    if let Some(ws) = ws {
        return ws.on_upgrade(move |socket| handle_hmr_socket(socket, server));
    }

    let path = uri.path();

    if let Some(specifier) = path.strip_prefix("/@modules/") {
        return handle_module(&server, specifier).await;
    }

    if path == "/@runtime/overlay" {
        return handle_overlay(&server).await;
    }

    if path.starts_with("/@source-map") {
        return handle_source_map(&server, query).await;
    }

    if path.starts_with("/src/") || path.ends_with(".css") {
        return handle_transform(&server, path).await;
    }

    if let Some(response) = serve_public(&server, path).await {
        return response;
    }

    if path == "/" || path == "/index.html" {
        return handle_index(&server).await;
    }

    StatusCode::NOT_FOUND.into_response()
}

async fn handle_module(server: &DevServer, specifier: &str) -> Response {
    let Some(bare) = BareSpecifier::parse(specifier) else {
        return js_error_response(&SprigError::resolve(specifier, "not a bare specifier"));
    };

    let importer = server.config.entry_file.clone();
    match server.prebundle.ensure_built(bare, importer).await {
        Ok(artifact_path) => match tokio::fs::read_to_string(&artifact_path).await {
            Ok(body) => js_response(body),
            Err(err) => js_error_response(&SprigError::from(err)),
        },
        Err(err) => js_error_response(&err),
    }
}

async fn handle_overlay(server: &DevServer) -> Response {
    let custom_path = server.config.src_dir.join("runtime").join("overlay-runtime.js");
    if let Ok(content) = tokio::fs::read_to_string(&custom_path).await {
        return js_response(content);
    }
    js_response(OVERLAY_RUNTIME_JS.to_string())
}

async fn handle_source_map(server: &DevServer, query: SourceMapQuery) -> Response {
    let Some(file) = query.file else {
        return (StatusCode::BAD_REQUEST, json_body("{}")).into_response();
    };
    let Some(line) = query.line else {
        return (StatusCode::BAD_REQUEST, json_body("{}")).into_response();
    };
    let column = query.column.unwrap_or(0);

    let relative = file.trim_start_matches('/');
    let full_path = server.config.root_dir.join(relative);

    let Ok(content) = tokio::fs::read_to_string(&full_path).await else {
        return (StatusCode::NOT_FOUND, json_body("{}")).into_response();
    };

    let snippet = source_snippet(&content, line);

    let body = serde_json::json!({
        "source": file,
        "line": line,
        "column": column,
        "snippet": snippet,
    });
    json_response(body.to_string())
}

/// `[line-3, line+2]` inclusive, clamped to file bounds, each line
/// HTML-escaped and prefixed with its line number.
fn source_snippet(content: &str, line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line.saturating_sub(3).max(1);
    let end = (line + 2).min(lines.len());

    let mut out = Vec::new();
    for n in start..=end {
        if let Some(text) = lines.get(n - 1) {
            let escaped = text.replace('<', "&lt;").replace('>', "&gt;");
            out.push(format!("{}: {}", n, escaped));
        }
    }
    out.join("\n")
}

async fn handle_transform(server: &DevServer, url_path: &str) -> Response {
    let resolved = match resolve_source_path(server, url_path) {
        Some(path) => path,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    if let Some(cached) = server.transform_cache.get(&resolved) {
        return js_response(cached);
    }

    let content = match tokio::fs::read_to_string(&resolved).await {
        Ok(content) => content,
        Err(err) => return js_error_response(&SprigError::from(err)),
    };

    let rewritten = rewrite_bare_imports(&content);
    let plugin_transformed = match server.plugin_host.run_transform(&resolved, rewritten).await {
        Ok(code) => code,
        Err(err) => return js_error_response(&err),
    };

    let is_css = resolved.extension().and_then(|e| e.to_str()) == Some("css");
    let compiled = if is_css {
        css_hot_reload_module(&plugin_transformed)
    } else {
        match server.gateway.compile(&resolved, &plugin_transformed) {
            Ok(code) => code,
            Err(err) => {
                let _ = server.hmr_tx.send(HmrMessage::Error {
                    message: err.to_string(),
                    stack: err.format_detailed(),
                });
                return js_error_response(&err);
            }
        }
    };

    server.transform_cache.insert(resolved, compiled.clone());
    js_response(compiled)
}

/// Maps a `/src/...` or `*.css` URL to a file under `root_dir`, trying each
/// resolvable extension in turn if the path as given doesn't exist.
fn resolve_source_path(server: &DevServer, url_path: &str) -> Option<PathBuf> {
    let relative = url_path.trim_start_matches('/');
    let candidate = server.config.root_dir.join(relative);
    if candidate.is_file() {
        return Some(candidate);
    }
    for ext in [".tsx", ".ts", ".jsx", ".js", ".css"] {
        let with_ext = PathBuf::from(format!("{}{}", candidate.display(), ext));
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    None
}

async fn serve_public(server: &DevServer, url_path: &str) -> Option<Response> {
    if url_path == "/" {
        return None;
    }
    let candidate = server.config.public_dir().join(url_path.trim_start_matches('/'));
    if !candidate.is_file() {
        return None;
    }
    let bytes = tokio::fs::read(&candidate).await.ok()?;
    let content_type = mime_guess_from_extension(&candidate);
    Some(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes.into())
            .unwrap(),
    )
}

fn mime_guess_from_extension(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

async fn handle_index(server: &DevServer) -> Response {
    let content = match tokio::fs::read_to_string(&server.config.index_html_path).await {
        Ok(content) => content,
        Err(err) => return js_error_response(&SprigError::from(err)),
    };

    let injected = inject_hmr_tags(&content, server.config.listen_host.as_str(), server.config.listen_port);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(injected.into())
        .unwrap()
}

/// Injects the overlay script tag and the inline HMR client before
/// `</body>`, unless already present.
fn inject_hmr_tags(html: &str, host: &str, port: u16) -> String {
    if html.contains("/@runtime/overlay") {
        return html.to_string();
    }

    let tags = format!(
        "<script type=\"module\" src=\"/@runtime/overlay\"></script>\n\
         <script type=\"module\">\n{}\n</script>\n",
        hmr_client_script(host, port)
    );

    match html.rfind("</body>") {
        Some(index) => {
            let mut out = html.to_string();
            out.insert_str(index, &tags);
            out
        }
        None => format!("{}{}", html, tags),
    }
}

/// The browser-side HMR client: reacts to `update`, `error`, and `reload`
/// messages.
fn hmr_client_script(host: &str, port: u16) -> String {
    format!(
        r#"const socket = new WebSocket("ws://{host}:{port}");
socket.addEventListener("message", (event) => {{
  const data = JSON.parse(event.data);
  if (data.type === "reload") {{
    window.location.reload();
  }} else if (data.type === "error") {{
    window.showErrorOverlay({{ message: data.message, stack: data.stack }});
  }} else if (data.type === "update") {{
    window.clearErrorOverlay();
    import(data.path + "?t=" + Date.now());
  }}
}});"#
    )
}

async fn handle_hmr_socket(socket: WebSocket, server: DevServer) {
    let (mut sender, mut receiver) = socket.split();
    let mut hmr_rx = server.hmr_tx.subscribe();

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            update = hmr_rx.recv() => {
                match update {
                    Ok(message) => {
                        let Ok(json) = serde_json::to_string(&message) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }
}

fn js_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/javascript; charset=utf-8")
        .body(body.into())
        .unwrap()
}

fn js_error_response(err: &SprigError) -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/javascript; charset=utf-8")
        .body(err.as_js_comment().into())
        .unwrap()
}

fn json_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn json_body(body: &str) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.to_string().into())
        .unwrap()
}

const OVERLAY_RUNTIME_JS: &str = r#"
(function () {
  let overlayEl = null;

  function clearErrorOverlay() {
    if (overlayEl) {
      overlayEl.remove();
      overlayEl = null;
    }
  }

  async function frameHtml(frame) {
    const match = frame.match(/\/src\/[^:]+:(\d+):(\d+)/);
    if (!match) return "";
    const file = frame.slice(0, frame.indexOf(":" + match[1]));
    const res = await fetch(`/@source-map?file=${file}&line=${match[1]}&column=${match[2]}`);
    const data = await res.json();
    return `<pre><code>${data.snippet || ""}</code></pre>`;
  }

  async function showErrorOverlay(err) {
    clearErrorOverlay();
    overlayEl = document.createElement("div");
    overlayEl.style.cssText =
      "position:fixed;inset:0;background:rgba(20,0,0,.9);color:#fff;z-index:999999;padding:24px;overflow:auto;font-family:monospace";
    overlayEl.innerHTML = `<h2>${err.message || "Unknown error"}</h2>`;

    const stackLines = (err.stack || "").split("\n");
    for (const line of stackLines) {
      const frame = document.createElement("div");
      frame.textContent = line;
      frame.style.cursor = "pointer";
      frame.addEventListener("click", () => {
        const match = line.match(/\/src\/([^:]+):(\d+):(\d+)/);
        if (match) {
          window.open(`vscode://file/${match[1]}:${match[2]}:${match[3]}`);
        }
      });
      overlayEl.appendChild(frame);
      frameHtml(line).then((html) => {
        if (html) {
          const pre = document.createElement("div");
          pre.innerHTML = html;
          overlayEl.appendChild(pre);
        }
      });
    }

    document.body.appendChild(overlayEl);
  }

  window.showErrorOverlay = showErrorOverlay;
  window.clearErrorOverlay = clearErrorOverlay;
  window.addEventListener("error", (event) => showErrorOverlay(event.error || event));
  window.addEventListener("unhandledrejection", (event) => showErrorOverlay(event.reason || event));
})();
"#;

pub fn default_listen_port() -> u16 {
    DEFAULT_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_windows_five_lines_around_middle() {
        let content = "line1\nline2\nline3\nline4\nline5\n";
        let snippet = source_snippet(content, 3);
        assert!(snippet.starts_with("1: line1"));
        assert!(snippet.contains("3: line3"));
        assert!(snippet.ends_with("5: line5"));
    }

    #[test]
    fn snippet_clamps_at_start_of_file() {
        let content = "only line\n";
        let snippet = source_snippet(content, 1);
        assert_eq!(snippet, "1: only line");
    }

    #[test]
    fn snippet_escapes_angle_brackets() {
        let content = "const x = <div/>;\n";
        let snippet = source_snippet(content, 1);
        assert!(snippet.contains("&lt;div/&gt;"));
    }

    #[test]
    fn inject_tags_is_idempotent() {
        let html = "<html><body></body></html>";
        let once = inject_hmr_tags(html, "localhost", 5173);
        let twice = inject_hmr_tags(&once, "localhost", 5173);
        assert_eq!(once, twice);
    }
}
