//! Per-document coordinator.
//!
//! Each named document runs as one actor task that serializes every
//! operation touching its state: session attach/detach, incoming frames,
//! engine update events, the delayed content reset, and persistence.
//! Engine observers never call back into the document; they post events
//! into the actor's own mailbox instead.
//!
//! ```text
//! Session A ──┐                              ┌── durable slot (every update)
//!             ├── DocCommand ──► actor ──────┤
//! Session B ──┘                   ▲          └── content store (debounced)
//!                                 │
//!                    DocEvent ────┘  (yrs update observer)
//! ```
//!
//! Binding happens on the first attach: fetch the authored HTML, try to
//! restore from the durable slot, and when the restored projection does
//! not match the fetched content schedule a transactional rewrite after
//! a short grace period.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;
use yrs::block::ClientID;
use yrs::sync::{Awareness, Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::{
    Any, Doc, Map, MapRef, Options, ReadTxn, StateVector, Transact, Update, XmlFragment,
    XmlFragmentRef,
};

use crate::config::DocConfig;
use crate::content::{ContentApi, ContentError, EMPTY_DOC};
use crate::debounce::Debounce;
use crate::protocol;
use crate::registry::Registry;
use crate::session::Session;
use crate::storage::{ChunkedStore, StorageBackend};

/// Commands accepted by a document actor.
pub enum DocCommand {
    Attach { session: Session },
    Detach { session_id: Uuid },
    Frame { session_id: Uuid, data: Vec<u8> },
    Invalidate,
    Stats(oneshot::Sender<DocStats>),
}

/// Events posted by engine observers.
enum DocEvent {
    Update(Vec<u8>),
}

/// Snapshot of a document's live state, for the admin surface and tests.
#[derive(Debug, Clone)]
pub struct DocStats {
    pub sessions: usize,
    pub awareness_clients: Vec<ClientID>,
    pub controlled_clients: Vec<ClientID>,
    pub restored: bool,
    pub upstream_content: String,
}

/// Cheap handle to a live document actor.
#[derive(Clone)]
pub struct DocHandle {
    pub id: Uuid,
    pub name: Arc<str>,
    commands: mpsc::UnboundedSender<DocCommand>,
}

impl DocHandle {
    /// Attach a session. Returns false when the actor is gone.
    pub fn attach(&self, session: Session) -> bool {
        self.commands.send(DocCommand::Attach { session }).is_ok()
    }

    pub fn detach(&self, session_id: Uuid) -> bool {
        self.commands.send(DocCommand::Detach { session_id }).is_ok()
    }

    pub fn frame(&self, session_id: Uuid, data: Vec<u8>) -> bool {
        self.commands
            .send(DocCommand::Frame { session_id, data })
            .is_ok()
    }

    /// Force-close every session; the actor removes itself and stops.
    pub fn invalidate(&self) -> bool {
        self.commands.send(DocCommand::Invalidate).is_ok()
    }

    /// Ask the actor for a state snapshot.
    pub async fn stats(&self) -> Option<DocStats> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(DocCommand::Stats(tx)).is_err() {
            return None;
        }
        rx.await.ok()
    }

    #[cfg(test)]
    pub(crate) fn for_test(name: &str, commands: mpsc::UnboundedSender<DocCommand>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Arc::from(name),
            commands,
        }
    }
}

/// Spawn the actor for a document and return its handle.
///
/// The caller inserts the handle into the registry; the actor removes it
/// again when its last session detaches or it is invalidated.
pub fn spawn<C, B>(
    name: &str,
    registry: Arc<Registry>,
    content: Arc<C>,
    store: ChunkedStore<B>,
    config: DocConfig,
) -> DocHandle
where
    C: ContentApi,
    B: StorageBackend,
{
    let (command_tx, commands) = mpsc::unbounded_channel();
    let handle = DocHandle {
        id: Uuid::new_v4(),
        name: Arc::from(name),
        commands: command_tx,
    };

    let actor = SharedDocument::new(handle.id, name, registry, content, store, config, commands);
    tokio::spawn(actor.run());
    handle
}

struct SessionEntry {
    session: Session,
    controlled: HashSet<ClientID>,
}

/// The live server-side state of one document.
struct SharedDocument<C, B> {
    handle_id: Uuid,
    name: String,
    registry: Arc<Registry>,
    content: Arc<C>,
    store: ChunkedStore<B>,
    config: DocConfig,

    awareness: Awareness,
    fragment: XmlFragmentRef,
    error_map: MapRef,
    _update_sub: yrs::UpdateSubscription,

    sessions: HashMap<Uuid, SessionEntry>,
    /// Last-known content of the store; writes are suppressed while the
    /// projection still equals it.
    current: String,
    bound: bool,
    restored: bool,
    closed: bool,

    reset_at: Option<Instant>,
    reset_html: Option<String>,
    debounce: Debounce,

    commands: mpsc::UnboundedReceiver<DocCommand>,
    events: mpsc::UnboundedReceiver<DocEvent>,
}

impl<C, B> SharedDocument<C, B>
where
    C: ContentApi,
    B: StorageBackend,
{
    fn new(
        handle_id: Uuid,
        name: &str,
        registry: Arc<Registry>,
        content: Arc<C>,
        store: ChunkedStore<B>,
        config: DocConfig,
        commands: mpsc::UnboundedReceiver<DocCommand>,
    ) -> Self {
        // Garbage collection stays off so historical updates from
        // reconnecting clients always integrate.
        let doc = Doc::with_options(Options {
            skip_gc: true,
            ..Options::default()
        });
        let fragment = doc.get_or_insert_xml_fragment(quill_codec::ROOT_FRAGMENT);
        let error_map = doc.get_or_insert_map("error");

        let (event_tx, events) = mpsc::unbounded_channel();
        let update_sub = doc
            .observe_update_v1(move |_txn, event| {
                let _ = event_tx.send(DocEvent::Update(event.update.clone()));
            })
            .expect("register update observer");

        Self {
            handle_id,
            name: name.to_string(),
            registry,
            content,
            store,
            config,
            awareness: Awareness::new(doc),
            fragment,
            error_map,
            _update_sub: update_sub,
            sessions: HashMap::new(),
            current: String::new(),
            bound: false,
            restored: false,
            closed: false,
            reset_at: None,
            reset_html: None,
            debounce: Debounce::new(config.upstream_wait, config.upstream_max_wait),
            commands,
            events,
        }
    }

    fn doc(&self) -> &Doc {
        self.awareness.doc()
    }

    async fn run(mut self) {
        log::debug!("document actor for {:?} started", self.name);
        loop {
            let reset_at = self.reset_at;
            let flush_at = self.debounce.deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(DocCommand::Attach { session }) => self.handle_attach(session).await,
                    Some(DocCommand::Frame { session_id, data }) => {
                        self.handle_frame(session_id, &data);
                    }
                    Some(DocCommand::Detach { session_id }) => self.handle_detach(session_id).await,
                    Some(DocCommand::Invalidate) => {
                        log::info!("invalidating document {:?}", self.name);
                        self.shutdown_sessions().await;
                    }
                    Some(DocCommand::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    None => self.closed = true,
                },
                event = self.events.recv() => {
                    if let Some(DocEvent::Update(update)) = event {
                        self.handle_engine_update(update).await;
                    }
                }
                _ = wait_until(reset_at), if reset_at.is_some() => {
                    self.reset_at = None;
                    self.apply_initial_content();
                }
                _ = wait_until(flush_at), if flush_at.is_some() => {
                    self.flush_upstream().await;
                }
            }
            if self.closed {
                break;
            }
        }

        // Commands can land between the registry removal and this point;
        // close those sessions instead of stranding them in a mailbox
        // that is never drained again.
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            if let DocCommand::Attach { session } = cmd {
                log::debug!("closing session attached to stopping {:?}", self.name);
                session.close();
            }
        }
        log::debug!("document actor for {:?} stopped", self.name);
    }

    // ─── Binding ──────────────────────────────────────────────────────

    /// Materialize initial state. Runs once, inline in the actor loop,
    /// so every queued opener observes the completed bind.
    async fn bind(&mut self, auth: Option<&str>) -> Result<(), ContentError> {
        let current = match self.content.fetch(&self.name, auth).await {
            Ok(html) => html,
            Err(e) => {
                log::error!("binding {:?} failed: {e}", self.name);
                self.record_error(&e.to_string(), "content store fetch during bind");
                return Err(e);
            }
        };

        match self.store.read().await {
            Ok(Some(stored)) if !stored.is_empty() => {
                {
                    let mut txn = self.doc().transact_mut();
                    match Update::decode_v1(&stored) {
                        Ok(update) => {
                            let _ = txn.apply_update(update);
                        }
                        Err(e) => log::warn!("undecodable durable state for {:?}: {e}", self.name),
                    }
                }
                let projection = quill_codec::doc2aem(self.doc());
                if projection == current {
                    self.restored = true;
                    log::info!("restored {:?} from durable storage", self.name);
                } else {
                    // Stale durable state; the content fetched from the
                    // store wins and overwrites it on the next update.
                    log::info!("durable state for {:?} does not match the store", self.name);
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("durable read for {:?} failed: {e}", self.name),
        }

        if !self.restored && current != EMPTY_DOC {
            // Give the first session's sync step a moment to settle
            // before rewriting the root fragment.
            self.reset_at = Some(Instant::now() + self.config.restore_delay);
            self.reset_html = Some(current.clone());
        }
        self.current = current;
        Ok(())
    }

    /// Delete the fragment contents and reparse the fetched HTML, as one
    /// transaction so observers see a single update.
    fn apply_initial_content(&mut self) {
        let Some(html) = self.reset_html.take() else {
            return;
        };
        match quill_codec::parse_aem(&html) {
            Ok(nodes) => {
                let mut txn = self.doc().transact_mut();
                let len = self.fragment.len(&txn);
                if len > 0 {
                    self.fragment.remove_range(&mut txn, 0, len);
                }
                quill_codec::write_fragment(&mut txn, &self.fragment, &nodes);
                log::debug!("reset {:?} to fetched content", self.name);
            }
            Err(e) => {
                log::error!("cannot parse fetched content for {:?}: {e}", self.name);
                self.record_error(&e.to_string(), "parsing fetched content");
            }
        }
    }

    // ─── Sessions ─────────────────────────────────────────────────────

    async fn handle_attach(&mut self, session: Session) {
        if !self.bound {
            self.bound = true;
            if self.bind(session.auth()).await.is_err() {
                session.close();
                self.registry.remove_if(&self.name, self.handle_id).await;
                self.closed = true;
                return;
            }
        }

        // Initial exchange: our state vector, then all known presence.
        let state_vector = {
            let txn = self.doc().transact();
            txn.state_vector()
        };
        let mut delivered = session.send(protocol::sync_step1(&state_vector));
        if delivered {
            if let Ok(update) = self.awareness.update() {
                if !update.clients.is_empty() {
                    delivered = session.send(protocol::awareness(update));
                }
            }
        }

        if !delivered {
            log::debug!("session died during initial exchange with {:?}", self.name);
            session.close();
            if self.sessions.is_empty() {
                self.registry.remove_if(&self.name, self.handle_id).await;
                self.closed = true;
            }
            return;
        }

        log::info!(
            "session {} attached to {:?} ({} total)",
            session.id(),
            self.name,
            self.sessions.len() + 1
        );
        self.sessions.insert(
            session.id(),
            SessionEntry {
                session,
                controlled: HashSet::new(),
            },
        );
    }

    async fn handle_detach(&mut self, session_id: Uuid) {
        let Some(entry) = self.sessions.remove(&session_id) else {
            return;
        };

        // Drop exactly the presence entries this session controlled and
        // tell the remaining peers.
        let removed: Vec<ClientID> = entry.controlled.iter().copied().collect();
        for client_id in &removed {
            self.awareness.remove_state(*client_id);
        }
        if !removed.is_empty() {
            if let Ok(update) = self.awareness.update_with_clients(removed) {
                self.broadcast(protocol::awareness(update), None);
            }
        }

        log::info!(
            "session {session_id} detached from {:?} ({} left)",
            self.name,
            self.sessions.len()
        );

        if self.sessions.is_empty() {
            self.registry.remove_if(&self.name, self.handle_id).await;
            self.closed = true;
        }
        entry.session.close();
    }

    /// Close every session and drop the registry entry.
    async fn shutdown_sessions(&mut self) {
        for (_, entry) in self.sessions.drain() {
            entry.session.close();
        }
        self.registry.remove_if(&self.name, self.handle_id).await;
        self.closed = true;
    }

    // ─── Frames ───────────────────────────────────────────────────────

    fn handle_frame(&mut self, session_id: Uuid, data: &[u8]) {
        if !self.sessions.contains_key(&session_id) {
            return;
        }
        let message = match protocol::decode(data) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("dropping malformed frame on {:?}: {e}", self.name);
                return;
            }
        };

        match message {
            Message::Sync(SyncMessage::SyncStep1(state_vector)) => {
                let diff = {
                    let txn = self.doc().transact();
                    txn.encode_diff_v1(&state_vector)
                };
                self.send_to(session_id, protocol::sync_step2(diff));
            }
            Message::Sync(SyncMessage::SyncStep2(update))
            | Message::Sync(SyncMessage::Update(update)) => {
                if !self
                    .sessions
                    .get(&session_id)
                    .is_some_and(|e| e.session.can_write())
                {
                    log::debug!("ignoring update from read-only session {session_id}");
                    return;
                }
                match Update::decode_v1(&update) {
                    Ok(update) => {
                        let mut txn = self.doc().transact_mut();
                        let _ = txn.apply_update(update);
                        // The update observer queues broadcast and
                        // persistence from here.
                    }
                    Err(e) => log::warn!("undecodable update on {:?}: {e}", self.name),
                }
            }
            Message::Awareness(update) => {
                let changes: Vec<(ClientID, bool)> = update
                    .clients
                    .iter()
                    .map(|(client_id, state)| (*client_id, state.json == "null"))
                    .collect();
                if let Err(e) = self.awareness.apply_update(update) {
                    log::warn!("awareness update failed on {:?}: {e}", self.name);
                    return;
                }
                // Bookkeeping strictly after the engine accepted the
                // update, so the controlled sets mirror engine state.
                if let Some(entry) = self.sessions.get_mut(&session_id) {
                    for (client_id, removed) in changes {
                        if removed {
                            entry.controlled.remove(&client_id);
                        } else {
                            entry.controlled.insert(client_id);
                        }
                    }
                }
                // Fan the change out to everyone, the sender included;
                // awareness application is idempotent.
                self.broadcast(data.to_vec(), None);
            }
            Message::AwarenessQuery => {
                if let Ok(update) = self.awareness.update() {
                    self.send_to(session_id, protocol::awareness(update));
                }
            }
            other => log::debug!("unhandled message on {:?}: {other:?}", self.name),
        }
    }

    // ─── Engine updates ───────────────────────────────────────────────

    async fn handle_engine_update(&mut self, update: Vec<u8>) {
        self.broadcast(protocol::sync_update(update), None);

        // Durable write on every update, but only while this instance is
        // still the canonical one for the name. Losing the last write is
        // fine; the content store is authoritative.
        let canonical = self
            .registry
            .get(&self.name)
            .await
            .map(|handle| handle.id)
            == Some(self.handle_id);
        if canonical {
            let state = {
                let txn = self.doc().transact();
                txn.encode_state_as_update_v1(&StateVector::default())
            };
            if let Err(e) = self.store.write(&state).await {
                log::error!("durable write for {:?} failed: {e}", self.name);
            }
        }

        self.debounce.mark();
    }

    /// Debounced write-through of the HTML projection.
    async fn flush_upstream(&mut self) {
        self.debounce.clear();

        let html = quill_codec::doc2aem(self.doc());
        if html == self.current {
            return;
        }

        let auths: Vec<String> = self
            .sessions
            .values()
            .filter_map(|entry| entry.session.auth().map(str::to_string))
            .collect();

        let outcome = self.content.store(&self.name, html.clone(), auths).await;
        if outcome.ok {
            log::debug!("synced {:?} upstream ({})", self.name, outcome.status);
            self.current = html;
        } else if outcome.status == 401 {
            // Credentials went stale; force every client to reconnect
            // and bind again with fresh auth.
            log::warn!("store rejected credentials for {:?}; closing sessions", self.name);
            self.shutdown_sessions().await;
        } else {
            log::error!(
                "store write for {:?} failed: {} {}",
                self.name,
                outcome.status,
                outcome.status_text
            );
            self.record_error(
                &format!("upstream write failed: {}", outcome.status),
                &outcome.status_text,
            );
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn send_to(&mut self, session_id: Uuid, frame: Vec<u8>) {
        let dead = match self.sessions.get(&session_id) {
            Some(entry) => !entry.session.send(frame),
            None => false,
        };
        if dead {
            self.drop_dead_session(session_id);
        }
    }

    /// Send to every session, skipping `except`. Sessions whose
    /// transport is gone are closed and forgotten.
    fn broadcast(&mut self, frame: Vec<u8>, except: Option<Uuid>) {
        let mut dead = Vec::new();
        for (id, entry) in &self.sessions {
            if Some(*id) == except {
                continue;
            }
            if !entry.session.send(frame.clone()) {
                dead.push(*id);
            }
        }
        for id in dead {
            self.drop_dead_session(id);
        }
    }

    /// Forget a session whose outbox is gone. The connection task also
    /// issues a Detach, which then finds nothing and is a no-op; the
    /// registry cleanup runs here in case that Detach never arrives.
    fn drop_dead_session(&mut self, session_id: Uuid) {
        if let Some(entry) = self.sessions.remove(&session_id) {
            for client_id in &entry.controlled {
                self.awareness.remove_state(*client_id);
            }
            entry.session.close();
            log::debug!("dropped dead session {session_id} on {:?}", self.name);
        }
    }

    /// Record a failure in the document's error map, transactionally, so
    /// clients can surface it.
    fn record_error(&self, message: &str, detail: &str) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as f64;
        let mut txn = self.doc().transact_mut();
        self.error_map.insert(&mut txn, "timestamp", Any::from(timestamp));
        self.error_map.insert(&mut txn, "message", Any::from(message));
        self.error_map.insert(&mut txn, "stack", Any::from(detail));
    }

    fn stats(&self) -> DocStats {
        let mut awareness_clients: Vec<ClientID> =
            self.awareness.clients().keys().copied().collect();
        awareness_clients.sort_unstable();
        let mut controlled_clients: Vec<ClientID> = self
            .sessions
            .values()
            .flat_map(|entry| entry.controlled.iter().copied())
            .collect();
        controlled_clients.sort_unstable();

        DocStats {
            sessions: self.sessions.len(),
            awareness_clients,
            controlled_clients,
            restored: self.restored,
            upstream_content: self.current.clone(),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
