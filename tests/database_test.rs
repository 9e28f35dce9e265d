use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use karstdb::common::types::Rid;
use karstdb::transaction::{IndexWriteRecord, IsolationLevel, WriteType};
use karstdb::{Database, EngineConfig};

#[test]
fn engine_round_trip_through_the_database_context() -> Result<()> {
    let file = NamedTempFile::new()?;
    let db = Database::open(file.path(), EngineConfig::default())?;
    let index = Arc::new(db.open_index("users_pk")?);

    let committed_rid = Rid::new(1, 0);
    let txn = db
        .transaction_manager()
        .begin(IsolationLevel::RepeatableRead);
    db.lock_manager().lock_exclusive(&txn, committed_rid).unwrap();
    index.insert(1001, committed_rid)?;
    txn.append_index_write(IndexWriteRecord::new(
        committed_rid,
        1001,
        WriteType::Insert,
        Arc::clone(&index),
    ));
    db.transaction_manager().commit(&txn);

    assert_eq!(index.get_value(1001)?, Some(committed_rid));
    assert!(txn.locked_rids().is_empty());

    // A second transaction aborts its insert and leaves no trace.
    let aborted_rid = Rid::new(1, 1);
    let txn = db
        .transaction_manager()
        .begin(IsolationLevel::RepeatableRead);
    db.lock_manager().lock_exclusive(&txn, aborted_rid).unwrap();
    index.insert(1002, aborted_rid)?;
    txn.append_index_write(IndexWriteRecord::new(
        aborted_rid,
        1002,
        WriteType::Insert,
        Arc::clone(&index),
    ));
    db.transaction_manager().abort(&txn);

    assert_eq!(index.get_value(1002)?, None);
    assert_eq!(index.get_value(1001)?, Some(committed_rid));
    Ok(())
}
