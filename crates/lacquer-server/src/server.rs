//! Development server.
//!
//! Static and proxy modes share one router: the live-reload socket, the
//! client script and the HTML injection layer are mounted the same way, and
//! only the fallback differs.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use lacquer_pipeline::{ServeMode, ServerConfig};
use tower_http::services::ServeDir;

use crate::websocket::{client_script, LiveReloadHub, ReloadMessage, SCRIPT_PATH, SOCKET_PATH};

/// Largest body the injection layer or the proxy will buffer.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error("Invalid proxy backend {0}: {1}")]
    InvalidBackend(String, String),

    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// Development server.
pub struct DevServer {
    config: ServerConfig,
    output_root: PathBuf,
    hub: LiveReloadHub,
}

impl DevServer {
    /// Create a server for `output_root`, announcing rebuilds through `hub`.
    pub fn new(config: ServerConfig, output_root: PathBuf, hub: LiveReloadHub) -> Self {
        Self {
            config,
            output_root,
            hub,
        }
    }

    pub fn address(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        addr.parse().map_err(|_| ServerError::InvalidAddress(addr))
    }

    /// Build the router for the configured mode.
    pub fn router(&self) -> Result<Router, ServerError> {
        let fallback = match &self.config.mode {
            ServeMode::Static => Router::new().fallback_service(ServeDir::new(&self.output_root)),
            ServeMode::Proxy { backend } => Router::new()
                .fallback(proxy_handler)
                .with_state(ProxyState::new(backend)?),
        };

        Ok(Router::new()
            .route(SOCKET_PATH, get(ws_handler))
            .route(SCRIPT_PATH, get(script_handler))
            .with_state(self.hub.clone())
            .merge(fallback)
            .layer(middleware::from_fn(inject_livereload)))
    }

    /// Bind and serve until the process is stopped.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = self.address()?;
        let app = self.router()?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        match &self.config.mode {
            ServeMode::Static => tracing::info!(
                "Serving {} at http://{}",
                self.output_root.display(),
                addr
            ),
            ServeMode::Proxy { backend } => {
                tracing::info!("Proxying {} at http://{}", backend, addr)
            }
        }

        if self.config.open {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::warn!("Could not open browser: {}", e);
            }
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        Ok(())
    }
}

/// Handler for the live-reload WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<LiveReloadHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, hub))
}

async fn handle_ws(mut socket: WebSocket, hub: LiveReloadHub) {
    let mut rx = hub.subscribe();

    if send_message(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    while let Ok(msg) = rx.recv().await {
        if send_message(&mut socket, &msg).await.is_err() {
            break;
        }
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Handler for the live-reload client script.
async fn script_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        client_script(),
    )
}

/// Add the client script tag to successful HTML responses.
async fn inject_livereload(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));
    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Could not buffer HTML response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Insert the client script tag before the last `</body>`, or append it
/// when there is none.
pub fn inject_script(html: &str) -> String {
    let tag = format!(r#"<script src="{}"></script>"#, SCRIPT_PATH);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{}{}", html, tag),
    }
}

#[derive(Clone)]
struct ProxyState {
    client: reqwest::Client,
    backend: String,
}

impl ProxyState {
    fn new(backend: &str) -> Result<Self, ServerError> {
        reqwest::Url::parse(backend)
            .map_err(|e| ServerError::InvalidBackend(backend.to_string(), e.to_string()))?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ServerError::InvalidBackend(backend.to_string(), e.to_string()))?;

        Ok(Self {
            client,
            backend: backend.trim_end_matches('/').to_string(),
        })
    }
}

/// Forward everything not served by the router to the backend.
async fn proxy_handler(State(proxy): State<ProxyState>, request: Request) -> Response {
    match forward(&proxy, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("{}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

async fn forward(proxy: &ProxyState, request: Request) -> Result<Response, ServerError> {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", proxy.backend, path);

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ServerError::Proxy(e.to_string()))?;

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    // Injection needs an uncompressed body
    headers.remove(header::ACCEPT_ENCODING);

    let upstream = proxy
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| ServerError::Proxy(format!("{}: {}", url, e)))?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(out) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if *name != header::TRANSFER_ENCODING
                && *name != header::CONTENT_LENGTH
                && *name != header::CONNECTION
            {
                out.append(name, value.clone());
            }
        }
    }

    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| ServerError::Proxy(format!("{}: {}", url, e)))?;

    response
        .body(Body::from(bytes))
        .map_err(|e| ServerError::Proxy(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn server_config(mode: ServeMode) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            open: false,
            mode,
        }
    }

    async fn spawn(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn injects_before_last_body_tag() {
        assert_eq!(
            inject_script("<html><BODY><p>x</p></BODY></html>"),
            r#"<html><BODY><p>x</p><script src="/__lacquer/livereload.js"></script></BODY></html>"#
        );
        assert_eq!(
            inject_script("<p>fragment</p>"),
            r#"<p>fragment</p><script src="/__lacquer/livereload.js"></script>"#
        );
    }

    #[test]
    fn rejects_invalid_backend() {
        let server = DevServer::new(
            server_config(ServeMode::Proxy {
                backend: "not a url".to_string(),
            }),
            PathBuf::from("theme"),
            LiveReloadHub::new("theme"),
        );
        assert!(matches!(
            server.router(),
            Err(ServerError::InvalidBackend(_, _))
        ));
    }

    #[test]
    fn rejects_invalid_address() {
        let mut config = server_config(ServeMode::Static);
        config.host = "not a host".to_string();
        let server = DevServer::new(config, PathBuf::from("theme"), LiveReloadHub::new("theme"));
        assert!(matches!(server.address(), Err(ServerError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn serves_output_with_injected_script() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("css")).unwrap();
        fs::write(
            temp.path().join("index.html"),
            "<html><body><h1>Hi</h1></body></html>",
        )
        .unwrap();
        fs::write(temp.path().join("css/style.css"), "body{}").unwrap();

        let server = DevServer::new(
            server_config(ServeMode::Static),
            temp.path().to_path_buf(),
            LiveReloadHub::new(temp.path()),
        );
        let addr = spawn(server.router().unwrap()).await;

        let html = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(html.contains(r#"<script src="/__lacquer/livereload.js"></script></body>"#));

        let css = reqwest::get(format!("http://{}/css/style.css", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(css, "body{}");

        let script = reqwest::get(format!("http://{}{}", addr, SCRIPT_PATH))
            .await
            .unwrap();
        assert_eq!(script.status(), 200);
        assert!(script.text().await.unwrap().contains(SOCKET_PATH));

        let missing = reqwest::get(format!("http://{}/nope.html", addr))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn proxies_backend_with_injected_script() {
        let backend = Router::new()
            .route(
                "/page.php",
                get(|| async { axum::response::Html("<body>from backend</body>") }),
            )
            .route("/api", get(|| async { "plain" }));
        let backend_addr = spawn(backend).await;

        let server = DevServer::new(
            server_config(ServeMode::Proxy {
                backend: format!("http://{}/", backend_addr),
            }),
            PathBuf::from("theme"),
            LiveReloadHub::new("theme"),
        );
        let addr = spawn(server.router().unwrap()).await;

        let html = reqwest::get(format!("http://{}/page.php?x=1", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(
            html,
            r#"<body>from backend<script src="/__lacquer/livereload.js"></script></body>"#
        );

        let plain = reqwest::get(format!("http://{}/api", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(plain, "plain");
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let server = DevServer::new(
            server_config(ServeMode::Proxy {
                backend: "http://127.0.0.1:1".to_string(),
            }),
            PathBuf::from("theme"),
            LiveReloadHub::new("theme"),
        );
        let addr = spawn(server.router().unwrap()).await;

        let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
        assert_eq!(response.status(), 502);
    }
}
