//! # quill-collab — Real-time collaborative document server
//!
//! Mediates between any number of concurrent editors of one HTML
//! document and the authoritative content store, with a fast durable
//! tier in between.
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ Editor      │ ◄─────────────────► │ CollabServer     │
//! │ (per user)  │    y-sync frames    │                  │
//! └─────────────┘                     └────────┬─────────┘
//!                                              │ one actor per name
//!                                     ┌────────┴─────────┐
//!                                     │ SharedDocument   │
//!                                     │ (Yrs authority)  │
//!                                     └───┬─────────┬────┘
//!                          every update   │         │  debounced, on change
//!                                ┌────────┴──┐   ┌──┴───────────────┐
//!                                │ Chunked   │   │ Content store    │
//!                                │ durable   │   │ (HTML, GET/PUT)  │
//!                                │ slot      │   │                  │
//!                                └───────────┘   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — y-sync binary frames (sync step 1/2, update, awareness)
//! - [`session`] — one connected editor and its outbound channel
//! - [`registry`] — process-wide name → live document map
//! - [`document`] — the per-document coordinator actor
//! - [`content`] — content-store client with aggregated authorization
//! - [`storage`] — chunked durable codec over a bounded key/value store
//! - [`server`] — websocket front end and admin invalidation
//!
//! The HTML ↔ document bijection lives in the `quill-codec` crate.

pub mod config;
pub mod content;
pub mod debounce;
pub mod document;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

pub use config::{Config, DocConfig};
pub use content::{ContentApi, ContentError, HttpContentStore, PutOutcome, EMPTY_DOC};
pub use document::{DocHandle, DocStats};
pub use registry::Registry;
pub use server::{AdminStatus, CollabServer};
pub use session::{Session, SessionMessage};
pub use storage::{
    ChunkLimits, ChunkedStore, MemoryBackend, RocksDocuments, StorageBackend, StorageError,
    MAX_KEYS, MAX_VALUE,
};
