use std::path::Path;
use std::sync::Arc;

use crate::common::config::EngineConfig;
use crate::index::btree::{BTreeError, BTreeIndex};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::{LockManager, TransactionManager, TransactionRegistry};

/// Top-level context wiring the subsystems together: one disk manager
/// and buffer pool, the shared transaction registry, the lock manager
/// with its deadlock detector, and the transaction manager.
pub struct Database {
    config: EngineConfig,
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    transaction_manager: TransactionManager,
}

impl Database {
    /// Open (or create) the database file and bring up the engine with
    /// the given configuration.
    pub fn open(db_path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, DiskManagerError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let buffer_pool = Arc::new(BufferPoolManager::new(
            config.buffer_pool.clone(),
            disk_manager,
        ));
        let registry = Arc::new(TransactionRegistry::new());
        let lock_manager = Arc::new(LockManager::new(
            Arc::clone(&registry),
            config.cycle_detection_interval,
        ));
        let transaction_manager =
            TransactionManager::new(Arc::clone(&registry), Arc::clone(&lock_manager));

        Ok(Self {
            config,
            buffer_pool,
            lock_manager,
            transaction_manager,
        })
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    /// Open (or create) a named index using the configured fanouts.
    pub fn open_index(&self, name: &str) -> Result<BTreeIndex, BTreeError> {
        BTreeIndex::new(
            name,
            Arc::clone(&self.buffer_pool),
            self.config.leaf_max_size,
            self.config.internal_max_size,
        )
    }
}
