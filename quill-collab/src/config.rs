//! Server and per-document configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::ChunkLimits;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the websocket listener to
    pub bind_addr: String,
    /// Durable storage path (None = in-memory slots only)
    pub storage_path: Option<PathBuf>,
    /// Per-document coordinator timings
    pub doc: DocConfig,
    /// Size limits of the durable store
    pub chunk_limits: ChunkLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9800".to_string(),
            storage_path: None,
            doc: DocConfig::default(),
            chunk_limits: ChunkLimits::default(),
        }
    }
}

impl Config {
    /// Create with durable storage enabled at the given path.
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Coordinator timings.
///
/// `restore_delay` stays below `upstream_wait` so a scheduled content
/// reset lands before the first coalesced upstream write fires.
#[derive(Debug, Clone, Copy)]
pub struct DocConfig {
    /// Delay before rewriting the document from fetched content,
    /// letting the first session's initial sync settle
    pub restore_delay: Duration,
    /// Trailing quiet period before an upstream write
    pub upstream_wait: Duration,
    /// Upper bound on write delay under continuous editing
    pub upstream_max_wait: Duration,
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            restore_delay: Duration::from_secs(1),
            upstream_wait: Duration::from_secs(2),
            upstream_max_wait: Duration::from_secs(10),
        }
    }
}

impl DocConfig {
    /// Compressed timings for tests driving the actor with paused time.
    pub fn for_testing() -> Self {
        Self {
            restore_delay: Duration::from_millis(20),
            upstream_wait: Duration::from_millis(50),
            upstream_max_wait: Duration::from_millis(250),
        }
    }
}
