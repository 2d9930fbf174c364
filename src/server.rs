//! Static file server for the build output with live-reload injection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

use crate::error::{ConfigError, ServerError};
use crate::live::{LiveReload, client_script};

/// Path the live-reload client is served under.
pub const CLIENT_PATH: &str = "/__livereload.js";

const CLIENT_TAG: &str = "<script src=\"/__livereload.js\"></script>";

/// A dev server that can be started once.
pub struct DevServer {
    root: Utf8PathBuf,
    port: u16,
    live_port: u16,
    live: LiveReload,
    started: AtomicBool,
}

/// A running server. Dropping the handle leaves the server running.
#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub live_port: u16,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl DevServer {
    pub fn new(root: impl Into<Utf8PathBuf>, port: u16, live_port: u16, live: LiveReload) -> Self {
        Self {
            root: root.into(),
            port,
            live_port,
            live,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Bind the HTTP listener and the live-reload socket, then serve in the
    /// background.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::ServerStarted.into());
        }

        match self.bind().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn bind(&self) -> Result<ServerHandle, ServerError> {
        let address = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                port: self.port,
                source,
            })?;

        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            port: self.port,
            source,
        })?;

        let live_port = self
            .live
            .start(self.live_port)
            .map_err(|source| ServerError::Bind {
                port: self.live_port,
                source,
            })?;

        let router = router(&self.root, live_port);

        tracing::info!(
            url = %style(format!("http://localhost:{}/", addr.port())).yellow(),
            "starting a HTTP server"
        );

        let task = tokio::spawn(async move { axum::serve(listener, router).await });

        Ok(ServerHandle {
            addr,
            live_port,
            task,
        })
    }
}

fn router(root: &Utf8Path, live_port: u16) -> Router {
    let script = Arc::<str>::from(client_script(live_port));

    Router::new()
        .route(
            CLIENT_PATH,
            get(move || {
                let script = script.clone();
                async move { ([(header::CONTENT_TYPE, "text/javascript")], script.to_string()) }
            }),
        )
        // path to the dist directory with generated website
        .fallback_service(ServeDir::new(root.as_std_path()))
        .layer(middleware::from_fn(inject_client))
}

async fn inject_client(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't buffer response: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Insert the live-reload client before `</body>`, or at the end of the
/// document when there is none.
pub fn inject(html: &str) -> String {
    match html.rfind("</body>") {
        Some(at) => format!("{}{CLIENT_TAG}{}", &html[..at], &html[at..]),
        None => format!("{html}{CLIENT_TAG}"),
    }
}
