pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::LockManager;
pub use transaction::{
    AbortReason, IndexWriteRecord, IsolationLevel, TableHeap, TableWriteRecord, Transaction,
    TransactionError, TransactionRef, TransactionRegistry, TransactionState, Tuple, WriteType,
};
pub use transaction_manager::TransactionManager;
