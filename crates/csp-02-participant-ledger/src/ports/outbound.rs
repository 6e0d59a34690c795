//! # Outbound Ports (Driven Ports)
//!
//! Storage the Participant Ledger requires from the host application.

use crate::domain::errors::KVStoreError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Abstract interface for key-value database operations.
///
/// Production: `RocksDbStore` (pool-runtime/adapters/storage) or
/// [`FileBackedKVStore`].
/// Testing: [`InMemoryKVStore`].
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// ## Atomicity Guarantee
    ///
    /// Either ALL operations in the batch are durable, or NONE are applied.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries under a prefix, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

fn apply_batch(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, operations: Vec<BatchOperation>) {
    for op in operations {
        match op {
            BatchOperation::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOperation::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

fn scan(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    data.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// In-memory key-value store for tests.
///
/// Clones share the same data, so a test can drop a ledger and reopen a new
/// one over the same contents to simulate a restart. Writes can be made to
/// fail through [`InMemoryKVStore::fail_writes`].
#[derive(Clone, Default)]
pub struct InMemoryKVStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent batch write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a raw value, bypassing the ledger. Used to inject corruption.
    pub fn put_raw(&self, key: &[u8], value: &[u8]) {
        self.data.write().insert(key.to_vec(), value.to_vec());
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KVStoreError::IOError {
                message: "injected write failure".to_string(),
            });
        }
        apply_batch(&mut self.data.write(), operations);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(scan(&self.data.read(), prefix))
    }
}

/// Leading bytes of every log record.
const LOG_MAGIC: [u8; 4] = [0xC5, 0x70, 0x02, 0x1B];

/// Magic plus payload length.
const LOG_HEADER: usize = 8;

/// Log size that triggers folding it into the snapshot file.
pub const DEFAULT_COMPACTION_BYTES: u64 = 8 * 1024 * 1024;

/// Frame one batch as a log record.
///
/// ```text
/// [magic: 4][payload length: u32 LE][bincode Vec<BatchOperation>][crc32: u32 LE]
/// ```
///
/// The checksum covers the length field and the payload.
fn encode_record(operations: &[BatchOperation]) -> Result<Vec<u8>, KVStoreError> {
    let payload = bincode::serialize(operations).map_err(|e| KVStoreError::IOError {
        message: e.to_string(),
    })?;
    let len = u32::try_from(payload.len()).map_err(|_| KVStoreError::IOError {
        message: format!("batch of {} bytes exceeds log record limit", payload.len()),
    })?;

    let mut record = Vec::with_capacity(LOG_HEADER + payload.len() + 4);
    record.extend_from_slice(&LOG_MAGIC);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&payload);
    let crc = crc32fast::hash(&record[LOG_MAGIC.len()..]);
    record.extend_from_slice(&crc.to_le_bytes());
    Ok(record)
}

/// Decode a whole log.
///
/// Returns the batches and the length of the intact prefix. A record cut
/// short at the end of the file is an interrupted append and ends the log;
/// damage anywhere before the last record is corruption.
fn decode_log(bytes: &[u8]) -> Result<(Vec<Vec<BatchOperation>>, usize), String> {
    let mut batches = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < LOG_HEADER {
            break;
        }
        if rest[..LOG_MAGIC.len()] != LOG_MAGIC {
            return Err(format!("bad record magic at offset {}", offset));
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&rest[LOG_MAGIC.len()..LOG_HEADER]);
        let payload_len = u32::from_le_bytes(len) as usize;
        let record_len = LOG_HEADER + payload_len + 4;
        if rest.len() < record_len {
            break;
        }

        let mut stored = [0u8; 4];
        stored.copy_from_slice(&rest[LOG_HEADER + payload_len..record_len]);
        if crc32fast::hash(&rest[LOG_MAGIC.len()..LOG_HEADER + payload_len])
            != u32::from_le_bytes(stored)
        {
            if offset + record_len == bytes.len() {
                break;
            }
            return Err(format!("checksum mismatch in record at offset {}", offset));
        }

        let batch: Vec<BatchOperation> =
            bincode::deserialize(&rest[LOG_HEADER..LOG_HEADER + payload_len])
                .map_err(|e| format!("undecodable record at offset {}: {}", offset, e))?;
        batches.push(batch);
        offset += record_len;
    }

    Ok((batches, offset))
}

fn io_err(e: std::io::Error) -> KVStoreError {
    KVStoreError::IOError {
        message: e.to_string(),
    }
}

/// File-backed key-value store.
///
/// The full map lives in memory. On disk it is a snapshot file plus an
/// append-only log next to it (`<name>.log`): every batch becomes one
/// checksummed log record, synced before the batch shows up in memory.
/// Once the log outgrows both the compaction threshold and the snapshot, the
/// map is written to a synced temp file, renamed over the snapshot and the
/// log is truncated. Replaying an already folded log is harmless because
/// records hold absolute puts and deletes.
pub struct FileBackedKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    path: PathBuf,
    log_path: PathBuf,
    log_bytes: u64,
    snapshot_bytes: u64,
    compaction_threshold: u64,
}

impl FileBackedKVStore {
    /// Open (or create) the store at `path`.
    ///
    /// A snapshot that cannot be decoded, or a log damaged before its last
    /// record, is reported as corruption rather than silently replaced.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KVStoreError> {
        let path = path.as_ref().to_path_buf();
        let log_path = path.with_extension("log");

        let (mut data, snapshot_bytes) = match std::fs::read(&path) {
            Ok(bytes) => {
                let data: BTreeMap<Vec<u8>, Vec<u8>> =
                    bincode::deserialize(&bytes).map_err(|e| KVStoreError::CorruptionError {
                        message: format!("{}: {}", path.display(), e),
                    })?;
                (data, bytes.len() as u64)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (BTreeMap::new(), 0),
            Err(e) => {
                return Err(KVStoreError::IOError {
                    message: format!("{}: {}", path.display(), e),
                })
            }
        };

        let log_bytes = match std::fs::read(&log_path) {
            Ok(bytes) => {
                let (batches, intact) =
                    decode_log(&bytes).map_err(|reason| KVStoreError::CorruptionError {
                        message: format!("{}: {}", log_path.display(), reason),
                    })?;
                let replayed = batches.len();
                for batch in batches {
                    apply_batch(&mut data, batch);
                }
                if intact < bytes.len() {
                    warn!(
                        "[csp-02] Dropping {} bytes of an interrupted append at the end of {}",
                        bytes.len() - intact,
                        log_path.display()
                    );
                    let file = std::fs::OpenOptions::new()
                        .write(true)
                        .open(&log_path)
                        .map_err(io_err)?;
                    file.set_len(intact as u64).map_err(io_err)?;
                    file.sync_all().map_err(io_err)?;
                }
                debug!(
                    "[csp-02] Replayed {} batches from {}",
                    replayed,
                    log_path.display()
                );
                intact as u64
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(KVStoreError::IOError {
                    message: format!("{}: {}", log_path.display(), e),
                })
            }
        };

        if snapshot_bytes == 0 && log_bytes == 0 {
            info!("[csp-02] No existing ledger file at {}", path.display());
        } else {
            info!(
                "[csp-02] Loaded {} keys from {} ({} snapshot bytes, {} log bytes)",
                data.len(),
                path.display(),
                snapshot_bytes,
                log_bytes
            );
        }

        let stale_temp = path.with_extension("tmp");
        if stale_temp.exists() {
            warn!(
                "[csp-02] Removing unfinished write {}",
                stale_temp.display()
            );
            let _ = std::fs::remove_file(&stale_temp);
        }

        Ok(Self {
            data,
            path,
            log_path,
            log_bytes,
            snapshot_bytes,
            compaction_threshold: DEFAULT_COMPACTION_BYTES,
        })
    }

    /// Fold the log into the snapshot once it exceeds `bytes`.
    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold = bytes;
        self
    }

    /// Location of the append-only log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn append(&self, record: &[u8]) -> Result<(), KVStoreError> {
        use std::io::Write;

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(io_err)?;
        if let Err(e) = file.write_all(record).and_then(|_| file.sync_data()) {
            // Cut a partial record so later appends stay readable.
            let _ = file.set_len(self.log_bytes);
            return Err(io_err(e));
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<(), KVStoreError> {
        let folded = self.log_bytes;
        let written = self.save_to_file(&self.data)?;
        self.snapshot_bytes = written;
        let log = std::fs::File::create(&self.log_path).map_err(io_err)?;
        self.log_bytes = 0;
        log.sync_all().map_err(io_err)?;

        info!(
            "[csp-02] Compacted {} log bytes into {} ({} bytes)",
            folded,
            self.path.display(),
            written
        );
        Ok(())
    }

    fn save_to_file(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<u64, KVStoreError> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let bytes = bincode::serialize(data).map_err(|e| KVStoreError::IOError {
            message: e.to_string(),
        })?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        std::fs::rename(&temp_path, &self.path).map_err(io_err)?;

        Ok(bytes.len() as u64)
    }
}

impl KeyValueStore for FileBackedKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        // Memory only changes once the record is durable.
        let record = encode_record(&operations)?;
        self.append(&record)?;
        self.log_bytes += record.len() as u64;
        apply_batch(&mut self.data, operations);

        if self.log_bytes > self.compaction_threshold.max(self.snapshot_bytes) {
            if let Err(e) = self.compact() {
                warn!("[csp-02] Log compaction failed, will retry: {}", e);
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(scan(&self.data, prefix))
    }
}
