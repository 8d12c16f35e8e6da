//! RocksDB-backed storage slots.
//!
//! One database serves every document; each document owns a key range
//! prefixed by its name. Values are bincode-encoded [`StoredValue`]s,
//! LZ4-compressed before hitting the database since CRDT states are
//! highly repetitive.
//!
//! Reference: Kleppmann, DDIA Chapter 3 (LSM trees).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded, WriteBatch};

use super::{StorageBackend, StorageError, StoredValue};

type Db = DBWithThreadMode<SingleThreaded>;

/// Separator between the document name and the field name in keys.
/// Document names are URLs and never contain NUL.
const KEY_SEPARATOR: u8 = 0;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Max open files for RocksDB
    pub max_open_files: i32,
    /// Write buffer size
    pub write_buffer_size: usize,
}

impl RocksConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }

    /// Small buffers for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Shared handle to the durable store for all documents.
pub struct RocksDocuments {
    db: Arc<Db>,
    path: PathBuf,
}

impl RocksDocuments {
    /// Open (or create) the database.
    pub fn open(config: RocksConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_keep_log_file_num(5);

        let db = Db::open(&opts, &config.path)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            path: config.path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The storage slot owned by one document actor.
    pub fn slot(&self, name: &str) -> RocksBackend {
        let mut prefix = name.as_bytes().to_vec();
        prefix.push(KEY_SEPARATOR);
        RocksBackend {
            db: self.db.clone(),
            prefix,
        }
    }
}

/// One document's key range in the shared database.
pub struct RocksBackend {
    db: Arc<Db>,
    prefix: Vec<u8>,
}

impl RocksBackend {
    fn field_key(&self, field: &str) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(field.as_bytes());
        key
    }

    fn own_keys(&self) -> Result<Vec<Vec<u8>>, StorageError> {
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&self.prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
            if !key.starts_with(&self.prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

impl StorageBackend for RocksBackend {
    fn list(&self) -> BoxFuture<'_, Result<BTreeMap<String, StoredValue>, StorageError>> {
        Box::pin(async move {
            let mut entries = BTreeMap::new();
            let iter = self
                .db
                .iterator(IteratorMode::From(&self.prefix, Direction::Forward));
            for item in iter {
                let (key, value) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
                if !key.starts_with(&self.prefix) {
                    break;
                }
                let field = String::from_utf8_lossy(&key[self.prefix.len()..]).to_string();
                entries.insert(field, decode_value(&value)?);
            }
            Ok(entries)
        })
    }

    fn put(&self, entries: BTreeMap<String, StoredValue>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut batch = WriteBatch::default();
            for (field, value) in &entries {
                batch.put(self.field_key(field), encode_value(value)?);
            }
            self.db
                .write(batch)
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
    }

    fn delete_all(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let keys = self.own_keys()?;
            if keys.is_empty() {
                return Ok(());
            }
            let mut batch = WriteBatch::default();
            for key in keys {
                batch.delete(key);
            }
            self.db
                .write(batch)
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
    }
}

fn encode_value(value: &StoredValue) -> Result<Vec<u8>, StorageError> {
    let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&encoded))
}

fn decode_value(bytes: &[u8]) -> Result<StoredValue, StorageError> {
    let decompressed = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StorageError::Corrupted(e.to_string()))?;
    let (value, _) = bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
        .map_err(|e| StorageError::Corrupted(e.to_string()))?;
    Ok(value)
}
