//! # Ledger Storage Backends
//!
//! The ledger runs on [`FileBackedKVStore`] by default. Build with the
//! `rocksdb` feature to use [`RocksDbStore`] instead:
//!
//! ```toml
//! pool-runtime = { path = "...", features = ["rocksdb"] }
//! ```

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbStore};

pub use csp_02_participant_ledger::{FileBackedKVStore, InMemoryKVStore, KeyValueStore};

use csp_02_participant_ledger::KVStoreError;
use std::path::Path;

/// Ledger file name inside the pool directory.
pub const LEDGER_FILE: &str = "ledger.bin";
/// RocksDB directory inside the pool directory.
pub const LEDGER_DB_DIR: &str = "ledgerdb";

/// Open the ledger store for `pool_dir` with the compiled-in backend.
pub fn open_ledger_store(pool_dir: &Path) -> Result<Box<dyn KeyValueStore>, KVStoreError> {
    #[cfg(feature = "rocksdb")]
    {
        let store = RocksDbStore::open(RocksDbConfig::new(pool_dir.join(LEDGER_DB_DIR)))?;
        Ok(Box::new(store))
    }
    #[cfg(not(feature = "rocksdb"))]
    {
        let store = FileBackedKVStore::open(pool_dir.join(LEDGER_FILE))?;
        Ok(Box::new(store))
    }
}

/// Free bytes on the filesystem holding `path`.
pub fn available_space(path: &Path) -> Result<u64, KVStoreError> {
    fs2::available_space(path).map_err(|e| KVStoreError::IOError {
        message: format!("{}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_02_participant_ledger::BatchOperation;

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open_ledger_store(dir.path()).unwrap();
            store
                .atomic_batch_write(vec![BatchOperation::put(b"meta:fee".to_vec(), vec![1, 2])])
                .unwrap();
        }
        let store = open_ledger_store(dir.path()).unwrap();
        assert_eq!(store.get(b"meta:fee").unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn test_available_space_of_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(available_space(dir.path()).is_ok());
    }
}
