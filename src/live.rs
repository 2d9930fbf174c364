//! Live-reload push channel.
//!
//! Browsers connect to a plain websocket server running on two dedicated
//! threads: one accepts connections, the other forwards every
//! [`ReloadEvent`] published through [`LiveReload::notify`] to all open
//! sockets. The dev server injects [`client_script`] into HTML pages so they
//! connect automatically.

use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::broadcast;
use tungstenite::{Message, WebSocket};

/// Connections kept open, older ones are closed first.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// A message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReloadEvent {
    /// Reload the whole page.
    Reload,
    /// Refresh stylesheets in place.
    Style { path: String },
}

impl ReloadEvent {
    pub fn to_json(&self) -> String {
        // a tagged enum of strings always serializes
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"kind":"reload"}"#.to_string())
    }
}

/// Handle to the live-reload channel. Clones publish to the same clients.
#[derive(Clone)]
pub struct LiveReload {
    tx: broadcast::Sender<ReloadEvent>,
    clients: Clients,
    port: Arc<OnceLock<u16>>,
}

impl LiveReload {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);

        Self {
            tx,
            clients: Arc::default(),
            port: Arc::default(),
        }
    }

    /// Start the websocket server, preferring `port` and falling back to a
    /// free one. Calling it again returns the port already in use.
    pub fn start(&self, port: u16) -> std::io::Result<u16> {
        if let Some(&port) = self.port.get() {
            return Ok(port);
        }

        let (tcp, port) = reserve_port(port)?;
        if self.port.set(port).is_err() {
            // lost a race against another start, keep the first server
            return self.port.get().copied().ok_or_else(|| std::io::Error::other("live reload port"));
        }

        tracing::info!("live reload listening on ws://localhost:{port}");

        let _thread_i = new_thread_ws_incoming(tcp, self.clients.clone());
        let _thread_o = new_thread_ws_reload(self.tx.subscribe(), self.clients.clone());

        Ok(port)
    }

    pub fn port(&self) -> Option<u16> {
        self.port.get().copied()
    }

    /// Publish an event to every connected client.
    pub fn notify(&self, event: ReloadEvent) {
        tracing::debug!("sending {}", event.to_json());
        if self.tx.send(event).is_err() {
            tracing::debug!("no live reload listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for LiveReload {
    fn default() -> Self {
        Self::new()
    }
}

fn reserve_port(port: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap_or_else(PoisonError::into_inner).push(socket),
                Err(e) => tracing::warn!("live reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(mut rx: broadcast::Receiver<ReloadEvent>, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let event = match rx.blocking_recv() {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let text = event.to_json();
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(Message::text(text.clone())) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e)) => {
                        tracing::debug!("dropping live reload client: {e}");
                        broken.push(i);
                    }
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        broken.push(i);
                    }
                    Err(e) => {
                        tracing::error!("live reload error: {e}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }
        }
    })
}

/// Browser side of the channel. Full reloads refresh the page, style events
/// cache-bust every linked stylesheet.
pub fn client_script(port: u16) -> String {
    format!(
        r#"(() => {{
    const socket = new WebSocket(`ws://${{location.hostname}}:{port}`);
    socket.addEventListener("message", event => {{
        const message = JSON.parse(event.data);
        if (message.kind === "style") {{
            for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
                const url = new URL(link.href);
                url.searchParams.set("v", Date.now());
                link.href = url.toString();
            }}
        }} else {{
            window.location.reload();
        }}
    }});
}})();
"#
    )
}
