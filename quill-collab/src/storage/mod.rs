//! Two-tier persistence, fast tier: the CRDT state in a bounded
//! key/value store.
//!
//! The store has a per-value size limit and a per-record key limit, so
//! one document state is laid out as either
//!
//! ```text
//! { doc: <name>, docstore: <bytes> }                     state < MAX_VALUE
//! { doc: <name>, chunks: N, chunk_0 .. chunk_{N-1} }     otherwise
//! ```
//!
//! The `doc` field guards against records left behind by a previous
//! occupant of the same storage slot: a mismatch empties the slot and
//! reads as absent. Losing the latest durable write is acceptable, the
//! content store stays authoritative.
//!
//! Reference: Kleppmann, DDIA Chapter 3 (log-structured storage).

pub mod rocks;

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use rocks::{RocksBackend, RocksConfig, RocksDocuments};

/// Per-value size limit of the underlying store.
pub const MAX_VALUE: usize = 131_072;
/// Per-record key limit of the underlying store.
pub const MAX_KEYS: usize = 128;

/// A value in the key/value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Text(String),
    Bytes(Vec<u8>),
    Count(u64),
}

impl StoredValue {
    fn as_text(&self) -> Option<&str> {
        match self {
            StoredValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StoredValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn as_count(&self) -> Option<u64> {
        match self {
            StoredValue::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// The state needs more chunk keys than one record may hold.
    Overflow { chunks: usize, max_keys: usize },
    /// A record is present but structurally invalid.
    Corrupted(String),
    /// The underlying store failed.
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Overflow { chunks, max_keys } => {
                write!(f, "State needs {chunks} chunks, store allows {max_keys} keys")
            }
            StorageError::Corrupted(e) => write!(f, "Corrupted durable record: {e}"),
            StorageError::Backend(e) => write!(f, "Storage backend error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// A transactional key/value slot holding at most one document record.
///
/// Every document actor exclusively owns one backend handle.
pub trait StorageBackend: Send + Sync + 'static {
    /// All fields of the record, empty map when the slot is empty.
    fn list(&self) -> BoxFuture<'_, Result<BTreeMap<String, StoredValue>, StorageError>>;

    /// Write all fields atomically.
    fn put(&self, entries: BTreeMap<String, StoredValue>) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Empty the slot.
    fn delete_all(&self) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// Size limits of the store, overridable for tests.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    pub max_value: usize,
    pub max_keys: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_value: MAX_VALUE,
            max_keys: MAX_KEYS,
        }
    }
}

/// The chunked codec over one document's storage slot.
pub struct ChunkedStore<B> {
    name: String,
    backend: B,
    limits: ChunkLimits,
}

impl<B: StorageBackend> ChunkedStore<B> {
    pub fn new(name: impl Into<String>, backend: B) -> Self {
        Self::with_limits(name, backend, ChunkLimits::default())
    }

    pub fn with_limits(name: impl Into<String>, backend: B, limits: ChunkLimits) -> Self {
        Self {
            name: name.into(),
            backend,
            limits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the stored state, if any.
    ///
    /// A record whose `doc` field names a different document is a stale
    /// leftover: the slot is emptied and the read reports absence.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.backend.list().await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let owner = entries.get("doc").and_then(StoredValue::as_text);
        if owner != Some(self.name.as_str()) {
            log::info!(
                "discarding stale durable record for {:?} while binding {:?}",
                owner.unwrap_or("<unnamed>"),
                self.name
            );
            self.backend.delete_all().await?;
            return Ok(None);
        }

        if let Some(value) = entries.get("docstore") {
            let bytes = value
                .as_bytes()
                .ok_or_else(|| StorageError::Corrupted("docstore is not a byte field".into()))?;
            return Ok(Some(bytes.to_vec()));
        }

        let chunks = entries
            .get("chunks")
            .and_then(StoredValue::as_count)
            .ok_or_else(|| StorageError::Corrupted("record has neither docstore nor chunks".into()))?
            as usize;

        // States can run to megabytes; concatenate chunk by chunk.
        let mut state = Vec::new();
        for i in 0..chunks {
            let key = format!("chunk_{i}");
            let chunk = entries
                .get(&key)
                .and_then(StoredValue::as_bytes)
                .ok_or_else(|| StorageError::Corrupted(format!("missing {key}")))?;
            state.extend_from_slice(chunk);
        }
        Ok(Some(state))
    }

    /// Replace the stored state.
    pub async fn write(&self, state: &[u8]) -> Result<(), StorageError> {
        let mut entries = BTreeMap::new();
        entries.insert("doc".to_string(), StoredValue::Text(self.name.clone()));

        if state.len() < self.limits.max_value {
            entries.insert("docstore".to_string(), StoredValue::Bytes(state.to_vec()));
        } else {
            let chunks = state.len().div_ceil(self.limits.max_value);
            if chunks >= self.limits.max_keys {
                return Err(StorageError::Overflow {
                    chunks,
                    max_keys: self.limits.max_keys,
                });
            }
            entries.insert("chunks".to_string(), StoredValue::Count(chunks as u64));
            for (i, slice) in state.chunks(self.limits.max_value).enumerate() {
                entries.insert(format!("chunk_{i}"), StoredValue::Bytes(slice.to_vec()));
            }
        }

        self.backend.delete_all().await?;
        self.backend.put(entries).await
    }
}

// ─── In-memory backend ────────────────────────────────────────────────

/// Backend operations, recorded by [`MemoryBackend`] for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    List,
    Put(Vec<String>),
    DeleteAll,
}

/// In-memory backend used in tests and storage-less deployments.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    inner: std::sync::Arc<std::sync::Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    entries: BTreeMap<String, StoredValue>,
    ops: Vec<BackendOp>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the slot, bypassing the op log.
    pub fn seed(&self, entries: BTreeMap<String, StoredValue>) {
        self.inner.lock().unwrap().entries = entries;
    }

    /// Current record contents.
    pub fn snapshot(&self) -> BTreeMap<String, StoredValue> {
        self.inner.lock().unwrap().entries.clone()
    }

    /// Operations performed so far.
    pub fn ops(&self) -> Vec<BackendOp> {
        self.inner.lock().unwrap().ops.clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn list(&self) -> BoxFuture<'_, Result<BTreeMap<String, StoredValue>, StorageError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(BackendOp::List);
            Ok(inner.entries.clone())
        })
    }

    fn put(&self, entries: BTreeMap<String, StoredValue>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(BackendOp::Put(entries.keys().cloned().collect()));
            inner.entries.extend(entries);
            Ok(())
        })
    }

    fn delete_all(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(BackendOp::DeleteAll);
            inner.entries.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(name: &str, backend: MemoryBackend, chunk: usize) -> ChunkedStore<MemoryBackend> {
        ChunkedStore::with_limits(
            name,
            backend,
            ChunkLimits {
                max_value: chunk,
                max_keys: MAX_KEYS,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_slot_reads_none() {
        let store = ChunkedStore::new("doc", MemoryBackend::new());
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_small_state_uses_docstore_field() {
        let backend = MemoryBackend::new();
        let store = ChunkedStore::new("doc", backend.clone());
        store.write(b"state").await.unwrap();

        let entries = backend.snapshot();
        assert_eq!(
            entries.get("doc"),
            Some(&StoredValue::Text("doc".to_string()))
        );
        assert_eq!(
            entries.get("docstore"),
            Some(&StoredValue::Bytes(b"state".to_vec()))
        );
        assert!(!entries.contains_key("chunks"));
    }

    #[tokio::test]
    async fn test_chunked_layout_and_read_back() {
        let backend = MemoryBackend::new();
        let store = tiny("doc", backend.clone(), 4);
        let state: Vec<u8> = (1..=9).collect();
        store.write(&state).await.unwrap();

        // deleteAll first, then a single transactional put.
        assert_eq!(
            backend.ops(),
            vec![
                BackendOp::DeleteAll,
                BackendOp::Put(vec![
                    "chunk_0".to_string(),
                    "chunk_1".to_string(),
                    "chunk_2".to_string(),
                    "chunks".to_string(),
                    "doc".to_string(),
                ]),
            ]
        );

        let entries = backend.snapshot();
        assert_eq!(entries.get("chunks"), Some(&StoredValue::Count(3)));
        assert_eq!(
            entries.get("chunk_0"),
            Some(&StoredValue::Bytes(vec![1, 2, 3, 4]))
        );
        assert_eq!(
            entries.get("chunk_1"),
            Some(&StoredValue::Bytes(vec![5, 6, 7, 8]))
        );
        assert_eq!(entries.get("chunk_2"), Some(&StoredValue::Bytes(vec![9])));

        assert_eq!(store.read().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_round_trip_at_many_chunk_sizes() {
        let state: Vec<u8> = (0..=255).cycle().take(1000).map(|b| b as u8).collect();
        for chunk_size in [1, 2, 3, 7, 100, 999, 1000, 1001] {
            let store = tiny("doc", MemoryBackend::new(), chunk_size);
            store.write(&state).await.unwrap();
            assert_eq!(
                store.read().await.unwrap(),
                Some(state.clone()),
                "chunk size {chunk_size}"
            );
        }
    }

    #[tokio::test]
    async fn test_exact_boundary_goes_chunked() {
        let backend = MemoryBackend::new();
        let store = tiny("doc", backend.clone(), 4);
        store.write(&[0u8; 4]).await.unwrap();
        assert_eq!(backend.snapshot().get("chunks"), Some(&StoredValue::Count(1)));
    }

    #[tokio::test]
    async fn test_overflow_is_fatal_and_preserves_slot() {
        let backend = MemoryBackend::new();
        let store = ChunkedStore::with_limits(
            "doc",
            backend.clone(),
            ChunkLimits {
                max_value: 1,
                max_keys: 4,
            },
        );
        store.write(b"ok").await.unwrap();

        let err = store.write(&[0u8; 16]).await.unwrap_err();
        assert!(matches!(err, StorageError::Overflow { chunks: 16, .. }));
        // The failed write did not destroy the previous record.
        assert_eq!(store.read().await.unwrap(), Some(b"ok".to_vec()));
    }

    #[tokio::test]
    async fn test_stale_record_discarded_and_slot_emptied() {
        let backend = MemoryBackend::new();
        let mut entries = BTreeMap::new();
        entries.insert(
            "doc".to_string(),
            StoredValue::Text("someone-else".to_string()),
        );
        entries.insert("docstore".to_string(), StoredValue::Bytes(vec![1, 2, 3]));
        backend.seed(entries);

        let store = ChunkedStore::new("doc", backend.clone());
        assert_eq!(store.read().await.unwrap(), None);
        assert!(backend.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_record_reports_error() {
        let backend = MemoryBackend::new();
        let mut entries = BTreeMap::new();
        entries.insert("doc".to_string(), StoredValue::Text("doc".to_string()));
        entries.insert("chunks".to_string(), StoredValue::Count(2));
        entries.insert("chunk_0".to_string(), StoredValue::Bytes(vec![1]));
        backend.seed(entries);

        let store = ChunkedStore::new("doc", backend.clone());
        let err = store.read().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_rewrite_replaces_previous_record() {
        let backend = MemoryBackend::new();
        let store = tiny("doc", backend.clone(), 4);
        store.write(&[1u8; 12]).await.unwrap();
        store.write(b"abc").await.unwrap();

        let entries = backend.snapshot();
        assert!(entries.contains_key("docstore"));
        assert!(!entries.contains_key("chunks"));
        assert!(!entries.contains_key("chunk_0"));
        assert_eq!(store.read().await.unwrap(), Some(b"abc".to_vec()));
    }
}
