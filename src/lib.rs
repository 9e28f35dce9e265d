// Export public modules
pub mod common;
pub mod database;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::{BufferPoolConfig, EngineConfig};
pub use database::Database;
pub use index::btree::{BTreeError, BTreeIndex, BTreeIterator};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::{DiskManager, DiskManagerError};
pub use transaction::{
    IsolationLevel, LockManager, Transaction, TransactionError, TransactionManager,
    TransactionRegistry, TransactionState,
};
