use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use karstdb::common::types::Rid;
use karstdb::transaction::{
    IndexWriteRecord, IsolationLevel, LockManager, TableHeap, TableWriteRecord, Transaction,
    TransactionManager, TransactionRegistry, TransactionState, Tuple, WriteType,
};

mod common;
use common::create_test_index;

const DETECTION_INTERVAL: Duration = Duration::from_millis(50);

fn setup() -> (Arc<TransactionRegistry>, Arc<LockManager>, TransactionManager) {
    let registry = Arc::new(TransactionRegistry::new());
    let lock_manager = Arc::new(LockManager::new(
        Arc::clone(&registry),
        DETECTION_INTERVAL,
    ));
    let txn_manager = TransactionManager::new(Arc::clone(&registry), Arc::clone(&lock_manager));
    (registry, lock_manager, txn_manager)
}

#[derive(Clone)]
struct Row {
    tuple: Tuple,
    delete_marked: bool,
}

/// In-memory stand-in for the executor-side table heap.
#[derive(Default)]
struct MockTableHeap {
    rows: Mutex<HashMap<Rid, Row>>,
}

impl MockTableHeap {
    fn insert_row(&self, rid: Rid, tuple: Tuple) {
        self.rows.lock().unwrap().insert(
            rid,
            Row {
                tuple,
                delete_marked: false,
            },
        );
    }

    fn mark_delete(&self, rid: Rid) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&rid) {
            row.delete_marked = true;
        }
    }

    fn visible_tuple(&self, rid: Rid) -> Option<Tuple> {
        self.rows
            .lock()
            .unwrap()
            .get(&rid)
            .filter(|row| !row.delete_marked)
            .map(|row| row.tuple.clone())
    }
}

impl TableHeap for MockTableHeap {
    fn apply_delete(&self, rid: Rid, _txn: &Transaction) {
        self.rows.lock().unwrap().remove(&rid);
    }

    fn rollback_delete(&self, rid: Rid, _txn: &Transaction) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&rid) {
            row.delete_marked = false;
        }
    }

    fn update_tuple(&self, tuple: &Tuple, rid: Rid, _txn: &Transaction) -> bool {
        match self.rows.lock().unwrap().get_mut(&rid) {
            Some(row) => {
                row.tuple = tuple.clone();
                true
            }
            None => false,
        }
    }
}

#[test]
fn transaction_ids_are_monotonic_and_registered() {
    let (_registry, _lock_manager, txn_manager) = setup();

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::ReadCommitted);
    assert!(t2.id() > t1.id());
    assert_eq!(t1.state(), TransactionState::Growing);

    let found = txn_manager.get_transaction(t1.id()).unwrap();
    assert_eq!(found.id(), t1.id());

    txn_manager.commit(&t1);
    txn_manager.commit(&t2);
}

#[test]
fn commit_applies_tentative_deletes() {
    let (_registry, _lock_manager, txn_manager) = setup();
    let heap = Arc::new(MockTableHeap::default());
    let rid = Rid::new(1, 1);
    heap.insert_row(rid, Tuple(b"bob".to_vec()));

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    // The executor marks the delete and logs it; commit makes it final.
    heap.mark_delete(rid);
    txn.append_table_write(TableWriteRecord::new(
        rid,
        WriteType::Delete,
        Tuple::default(),
        Arc::clone(&heap) as Arc<dyn TableHeap>,
    ));
    txn_manager.commit(&txn);

    assert_eq!(txn.state(), TransactionState::Committed);
    assert!(heap.rows.lock().unwrap().get(&rid).is_none());
}

#[test]
fn abort_rewinds_table_writes_in_reverse() {
    let (_registry, _lock_manager, txn_manager) = setup();
    let heap = Arc::new(MockTableHeap::default());
    let heap_dyn: Arc<dyn TableHeap> = Arc::clone(&heap) as Arc<dyn TableHeap>;

    let existing = Rid::new(1, 1);
    heap.insert_row(existing, Tuple(b"old".to_vec()));

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);

    // Insert a row.
    let inserted = Rid::new(1, 2);
    heap.insert_row(inserted, Tuple(b"new-row".to_vec()));
    txn.append_table_write(TableWriteRecord::new(
        inserted,
        WriteType::Insert,
        Tuple::default(),
        Arc::clone(&heap_dyn),
    ));

    // Update the existing row, remembering its pre-image.
    heap.update_tuple(&Tuple(b"new".to_vec()), existing, &txn);
    txn.append_table_write(TableWriteRecord::new(
        existing,
        WriteType::Update,
        Tuple(b"old".to_vec()),
        Arc::clone(&heap_dyn),
    ));

    // Mark the updated row deleted.
    heap.mark_delete(existing);
    txn.append_table_write(TableWriteRecord::new(
        existing,
        WriteType::Delete,
        Tuple::default(),
        Arc::clone(&heap_dyn),
    ));

    txn_manager.abort(&txn);
    assert_eq!(txn.state(), TransactionState::Aborted);

    // The tentative delete is unmarked, the update restored, the insert gone.
    assert_eq!(heap.visible_tuple(existing), Some(Tuple(b"old".to_vec())));
    assert_eq!(heap.visible_tuple(inserted), None);
}

#[test]
fn abort_restores_table_and_index_state() -> Result<()> {
    let (index, _pool, _file) = create_test_index(16, 4, 4)?;
    let (_registry, lock_manager, txn_manager) = setup();
    let heap = Arc::new(MockTableHeap::default());

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 7);

    lock_manager.lock_exclusive(&txn, rid).unwrap();
    heap.insert_row(rid, Tuple(b"alice".to_vec()));
    txn.append_table_write(TableWriteRecord::new(
        rid,
        WriteType::Insert,
        Tuple::default(),
        Arc::clone(&heap) as Arc<dyn TableHeap>,
    ));
    index.insert(42, rid)?;
    txn.append_index_write(IndexWriteRecord::new(
        rid,
        42,
        WriteType::Insert,
        Arc::clone(&index),
    ));

    txn_manager.abort(&txn);

    assert_eq!(heap.visible_tuple(rid), None);
    assert_eq!(index.get_value(42)?, None);
    assert!(!txn.is_exclusive_locked(rid));
    Ok(())
}

#[test]
fn abort_restores_an_updated_index_key() -> Result<()> {
    let (index, _pool, _file) = create_test_index(16, 4, 4)?;
    let (_registry, _lock_manager, txn_manager) = setup();

    let rid = Rid::new(2, 3);
    index.insert(10, rid)?;

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    // The executor moved the key from 10 to 20.
    index.remove(10)?;
    index.insert(20, rid)?;
    txn.append_index_write(IndexWriteRecord::for_update(
        rid,
        20,
        10,
        Arc::clone(&index),
    ));

    txn_manager.abort(&txn);

    assert_eq!(index.get_value(20)?, None);
    assert_eq!(index.get_value(10)?, Some(rid));
    Ok(())
}

#[test]
fn commit_releases_every_lock() {
    let (_registry, lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid_a = Rid::new(3, 1);
    let rid_b = Rid::new(3, 2);

    lock_manager.lock_shared(&txn, rid_a).unwrap();
    lock_manager.lock_exclusive(&txn, rid_b).unwrap();
    txn_manager.commit(&txn);

    assert!(txn.locked_rids().is_empty());

    // The rids are immediately available to a later transaction.
    let other = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_exclusive(&other, rid_a).unwrap();
    lock_manager.lock_exclusive(&other, rid_b).unwrap();
    txn_manager.commit(&other);
}

#[test]
fn block_all_transactions_quiesces_begin() {
    let (_registry, _lock_manager, txn_manager) = setup();
    let txn_manager = Arc::new(txn_manager);

    // No transaction is live, so the exclusive latch is free.
    txn_manager.block_all_transactions();

    let started = Arc::new(AtomicBool::new(false));
    let handle = {
        let txn_manager = Arc::clone(&txn_manager);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
            started.store(true, Ordering::SeqCst);
            txn_manager.commit(&txn);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!started.load(Ordering::SeqCst));

    txn_manager.resume_transactions();
    handle.join().unwrap();
    assert!(started.load(Ordering::SeqCst));
}
