use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{IndexKey, Rid, TxnId};
use crate::index::btree::BTreeIndex;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager aborted a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockSharedOnReadUncommitted,
    LockOnShrinking,
    UpgradeConflict,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AbortReason::LockSharedOnReadUncommitted => {
                "shared locks are not taken under read-uncommitted"
            }
            AbortReason::LockOnShrinking => "lock acquired in the shrinking phase",
            AbortReason::UpgradeConflict => "another transaction is already upgrading",
            AbortReason::Deadlock => "chosen as deadlock victim",
        };
        f.write_str(reason)
    }
}

/// Errors surfaced by transactional components
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} aborted: {1}")]
    Abort(TxnId, AbortReason),
}

/// Kind of write captured in an undo log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// Opaque tuple payload as stored by a table heap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple(pub Vec<u8>);

/// Table heap seam consumed by the transaction manager when applying or
/// rewinding writes. Deletes are tentative until commit: `apply_delete`
/// makes one final, `rollback_delete` clears the mark.
pub trait TableHeap: Send + Sync {
    fn apply_delete(&self, rid: Rid, txn: &Transaction);
    fn rollback_delete(&self, rid: Rid, txn: &Transaction);
    fn update_tuple(&self, tuple: &Tuple, rid: Rid, txn: &Transaction) -> bool;
}

/// One table write captured for commit/abort processing.
/// `tuple` carries the pre-image for updates.
pub struct TableWriteRecord {
    pub rid: Rid,
    pub wtype: WriteType,
    pub tuple: Tuple,
    pub table: Arc<dyn TableHeap>,
}

impl TableWriteRecord {
    pub fn new(rid: Rid, wtype: WriteType, tuple: Tuple, table: Arc<dyn TableHeap>) -> Self {
        Self {
            rid,
            wtype,
            tuple,
            table,
        }
    }
}

/// One index write captured for abort processing.
/// `old_key` carries the pre-image key for updates.
pub struct IndexWriteRecord {
    pub rid: Rid,
    pub key: IndexKey,
    pub old_key: Option<IndexKey>,
    pub wtype: WriteType,
    pub index: Arc<BTreeIndex>,
}

impl IndexWriteRecord {
    pub fn new(rid: Rid, key: IndexKey, wtype: WriteType, index: Arc<BTreeIndex>) -> Self {
        Self {
            rid,
            key,
            old_key: None,
            wtype,
            index,
        }
    }

    pub fn for_update(
        rid: Rid,
        new_key: IndexKey,
        old_key: IndexKey,
        index: Arc<BTreeIndex>,
    ) -> Self {
        Self {
            rid,
            key: new_key,
            old_key: Some(old_key),
            wtype: WriteType::Update,
            index,
        }
    }
}

/// An active database transaction.
///
/// State and lock sets use interior mutability: the deadlock detector
/// aborts transactions from its own thread, and lock queues read holder
/// sets while the owner blocks.
pub struct Transaction {
    txn_id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

/// Shared handle to a transaction
pub type TransactionRef = Arc<Transaction>;

impl Transaction {
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            txn_id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn shared_lock_set(&self) -> HashSet<Rid> {
        self.shared_lock_set.lock().clone()
    }

    pub fn exclusive_lock_set(&self) -> HashSet<Rid> {
        self.exclusive_lock_set.lock().clone()
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Every rid this transaction currently holds a lock on.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    /// Record a table write for commit/abort processing.
    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push(record);
    }

    /// Record an index write for abort processing.
    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub(crate) fn take_table_writes(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut *self.table_write_set.lock())
    }

    pub(crate) fn take_index_writes(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }
}

/// Process-wide `txn_id -> Transaction` map, shared by the transaction
/// manager and the lock manager's deadlock detector.
pub struct TransactionRegistry {
    txns: Mutex<HashMap<TxnId, TransactionRef>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            txns: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, txn: TransactionRef) {
        self.txns.lock().insert(txn.id(), txn);
    }

    pub fn get(&self, txn_id: TxnId) -> Option<TransactionRef> {
        self.txns.lock().get(&txn_id).cloned()
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
