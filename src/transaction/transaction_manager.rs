use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::error;

use crate::common::rwlatch::ReaderWriterLatch;
use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionRef, TransactionRegistry, TransactionState, WriteType,
};

/// Drives the transaction lifecycle: id allocation, commit processing of
/// tentative deletes, abort-time rewind of table and index writes, and
/// lock release through the lock manager.
///
/// Every live transaction holds the global latch in shared mode;
/// `block_all_transactions` takes it exclusively to quiesce the system.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
    global_txn_latch: ReaderWriterLatch,
}

impl TransactionManager {
    pub fn new(registry: Arc<TransactionRegistry>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            registry,
            lock_manager,
            global_txn_latch: ReaderWriterLatch::new(),
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> TransactionRef {
        self.global_txn_latch.lock_shared();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.registry.insert(Arc::clone(&txn));
        txn
    }

    /// Commit: make tentative deletes final, release all locks.
    /// Inserts and updates need no post-commit action.
    pub fn commit(&self, txn: &TransactionRef) {
        txn.set_state(TransactionState::Committed);

        let mut table_writes = txn.take_table_writes();
        while let Some(record) = table_writes.pop() {
            if record.wtype == WriteType::Delete {
                record.table.apply_delete(record.rid, txn);
            }
        }
        txn.take_index_writes();

        self.release_locks(txn);
        self.global_txn_latch.unlock_shared();
    }

    /// Abort: rewind table writes, then index writes, each newest first,
    /// so the heap and its indexes return to their pre-transaction state.
    pub fn abort(&self, txn: &TransactionRef) {
        txn.set_state(TransactionState::Aborted);

        let mut table_writes = txn.take_table_writes();
        while let Some(record) = table_writes.pop() {
            match record.wtype {
                WriteType::Delete => record.table.rollback_delete(record.rid, txn),
                WriteType::Insert => record.table.apply_delete(record.rid, txn),
                WriteType::Update => {
                    record.table.update_tuple(&record.tuple, record.rid, txn);
                }
            }
        }

        let mut index_writes = txn.take_index_writes();
        while let Some(record) = index_writes.pop() {
            let outcome = match record.wtype {
                WriteType::Insert => record.index.remove(record.key),
                WriteType::Delete => record.index.insert(record.key, record.rid).map(|_| ()),
                WriteType::Update => record.index.remove(record.key).and_then(|()| {
                    let old_key = record.old_key.expect("update undo carries the old key");
                    record.index.insert(old_key, record.rid).map(|_| ())
                }),
            };
            if let Err(e) = outcome {
                error!("index rollback failed for transaction {}: {}", txn.id(), e);
            }
        }

        self.release_locks(txn);
        self.global_txn_latch.unlock_shared();
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<TransactionRef> {
        self.registry.get(txn_id)
    }

    /// Quiesce: block new and in-flight transactions from making
    /// progress past their next latch acquisition.
    pub fn block_all_transactions(&self) {
        self.global_txn_latch.lock_exclusive();
    }

    pub fn resume_transactions(&self) {
        self.global_txn_latch.unlock_exclusive();
    }

    fn release_locks(&self, txn: &TransactionRef) {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
