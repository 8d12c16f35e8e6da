//! Websocket front end and admin surface.
//!
//! Each connection names its document in the request path and carries
//! its credentials in headers; the connection task shuttles frames
//! between the socket and the per-document actor. Routing of admin HTTP
//! requests lives outside this crate; the two handlers here return the
//! outcome and the outer router maps it to status codes.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::config::Config;
use crate::content::HttpContentStore;
use crate::document::{self, DocHandle};
use crate::registry::Registry;
use crate::session::{parse_actions, Session, SessionMessage};
use crate::storage::{ChunkedStore, MemoryBackend, RocksConfig, RocksDocuments};

/// Header carrying the session's capability list.
pub const ACTIONS_HEADER: &str = "x-auth-actions";

/// Outcome of an admin invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminStatus {
    /// The document was live; its sessions have been closed.
    Found,
    /// No live document under that name.
    NotFound,
}

/// The collaborative document server.
pub struct CollabServer {
    config: Config,
    registry: Arc<Registry>,
    content: Arc<HttpContentStore>,
    durable: Option<Arc<RocksDocuments>>,
}

impl CollabServer {
    /// Create a server. Opens durable storage when configured.
    pub fn new(config: Config) -> Self {
        let durable = config.storage_path.as_ref().map(|path| {
            Arc::new(
                RocksDocuments::open(RocksConfig::new(path))
                    .expect("Failed to open durable document storage"),
            )
        });
        Self {
            config,
            registry: Registry::new(),
            content: Arc::new(HttpContentStore::new()),
            durable,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Accept websocket connections until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("collab server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = self.registry.clone();
            let content = self.content.clone();
            let durable = self.durable.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, addr, registry, content, durable, config).await
                {
                    log::warn!("connection from {addr} ended with error: {e}");
                }
            });
        }
    }

    // ─── Admin surface ────────────────────────────────────────────────

    /// Out-of-band notification that the store-side content changed.
    ///
    /// Every session is closed; the next opener rebinds from the store
    /// and any stale durable record is discarded during that bind.
    pub async fn sync_admin(&self, name: &str) -> AdminStatus {
        self.invalidate(name).await
    }

    /// Out-of-band notification that the document was deleted upstream.
    pub async fn delete_admin(&self, name: &str) -> AdminStatus {
        self.invalidate(name).await
    }

    async fn invalidate(&self, name: &str) -> AdminStatus {
        match self.registry.get(name).await {
            Some(handle) => {
                handle.invalidate();
                AdminStatus::Found
            }
            None => AdminStatus::NotFound,
        }
    }
}

/// Open (or join) the actor for a document, choosing the storage backend
/// by configuration.
async fn open_document(
    name: &str,
    registry: &Arc<Registry>,
    content: &Arc<HttpContentStore>,
    durable: &Option<Arc<RocksDocuments>>,
    config: &Config,
) -> DocHandle {
    let limits = config.chunk_limits;
    let doc_config = config.doc;
    registry
        .get_or_create(name, || match durable {
            Some(db) => document::spawn(
                name,
                registry.clone(),
                content.clone(),
                ChunkedStore::with_limits(name, db.slot(name), limits),
                doc_config,
            ),
            None => document::spawn(
                name,
                registry.clone(),
                content.clone(),
                ChunkedStore::with_limits(name, MemoryBackend::new(), limits),
                doc_config,
            ),
        })
        .await
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
    content: Arc<HttpContentStore>,
    durable: Option<Arc<RocksDocuments>>,
    config: Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Capture the document name and credentials during the handshake.
    let mut name = String::new();
    let mut auth: Option<String> = None;
    let mut actions: HashSet<String> = parse_actions(None);

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        name = req.uri().path().trim_start_matches('/').to_string();
        auth = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        actions = parse_actions(
            req.headers()
                .get(ACTIONS_HEADER)
                .and_then(|v| v.to_str().ok()),
        );
        Ok(resp)
    })
    .await?;

    if name.is_empty() {
        log::warn!("connection from {addr} named no document; closing");
        return Ok(());
    }
    log::info!("session from {addr} opening {name:?}");

    let (session, mut outbox) = Session::new(auth, actions);
    let session_id = session.id();

    // Joining can race a dying actor that is mid-removal. A rejected
    // send retries here; an attach accepted by an actor that is already
    // shutting down comes back as a close on the outbox, which ends the
    // connection and lets the client reconnect to a fresh actor.
    let handle = loop {
        let handle = open_document(&name, &registry, &content, &durable, &config).await;
        if handle.attach(session.clone()) {
            break handle;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();
    loop {
        tokio::select! {
            out = outbox.recv() => match out {
                Some(SessionMessage::Frame(frame)) => {
                    if sink.send(Message::Binary(frame.into())).await.is_err() {
                        break;
                    }
                }
                Some(SessionMessage::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    if !handle.frame(session_id, data.into()) {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::debug!("websocket error from {addr}: {e}");
                    break;
                }
                _ => {}
            },
        }
    }

    handle.detach(session_id);
    log::debug!("connection from {addr} closed");
    Ok(())
}
