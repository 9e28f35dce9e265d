use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use tempfile::NamedTempFile;

use karstdb::common::config::BufferPoolConfig;
use karstdb::storage::disk::DiskManager;
use karstdb::{BTreeIndex, BufferPoolManager};

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

// Create a buffer pool backed by a temporary database file
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    Lazy::force(&LOGGER);
    let file = NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(
        BufferPoolConfig::new(pool_size),
        disk_manager,
    ));
    Ok((buffer_pool, file))
}

// Create a B+tree index with its own buffer pool and database file
#[allow(dead_code)]
pub fn create_test_index(
    pool_size: usize,
    leaf_max_size: u32,
    internal_max_size: u32,
) -> Result<(Arc<BTreeIndex>, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let index = Arc::new(BTreeIndex::new(
        "test_index",
        Arc::clone(&buffer_pool),
        leaf_max_size,
        internal_max_size,
    )?);
    Ok((index, buffer_pool, file))
}
