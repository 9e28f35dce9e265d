use anyhow::Result;
use std::sync::Arc;

use karstdb::common::config::BufferPoolConfig;
use karstdb::storage::disk::DiskManager;
use karstdb::{BufferPoolError, BufferPoolManager};

mod common;
use common::create_test_buffer_pool;

#[test]
fn new_page_never_allocates_the_header_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(4)?;

    let (_page, first) = buffer_pool.new_page()?;
    let (_page, second) = buffer_pool.new_page()?;
    assert_eq!(first, 1);
    assert_eq!(second, 2);

    buffer_pool.unpin_page(first, false);
    buffer_pool.unpin_page(second, false);
    Ok(())
}

#[test]
fn fetch_pins_and_unpin_releases() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(4)?;

    let _page = buffer_pool.fetch_page(10)?;
    let _again = buffer_pool.fetch_page(10)?;
    assert_eq!(buffer_pool.pin_count(10), Some(2));

    assert!(buffer_pool.unpin_page(10, false));
    assert_eq!(buffer_pool.pin_count(10), Some(1));
    assert!(buffer_pool.unpin_page(10, false));
    assert_eq!(buffer_pool.pin_count(10), Some(0));

    // The page is already unpinned: a further unpin signals a bug.
    assert!(!buffer_pool.unpin_page(10, false));
    Ok(())
}

#[test]
fn eviction_picks_the_unpinned_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(2)?;

    let _p10 = buffer_pool.fetch_page(10)?;
    let _p20 = buffer_pool.fetch_page(20)?;

    // Both frames pinned: no room for a third page.
    assert!(matches!(
        buffer_pool.fetch_page(30),
        Err(BufferPoolError::OutOfMemory)
    ));

    buffer_pool.unpin_page(10, false);
    let _p30 = buffer_pool.fetch_page(30)?;

    assert!(!buffer_pool.contains_page(10));
    assert!(buffer_pool.contains_page(20));
    assert!(buffer_pool.contains_page(30));
    Ok(())
}

#[test]
fn dirty_pages_survive_eviction() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(1)?;

    {
        let page = buffer_pool.fetch_page(5)?;
        page.write().data[0..4].copy_from_slice(b"karl");
        buffer_pool.unpin_page(5, true);
    }

    // A pool of one frame must evict page 5 to host page 6.
    let _other = buffer_pool.fetch_page(6)?;
    assert!(!buffer_pool.contains_page(5));
    buffer_pool.unpin_page(6, false);

    let page = buffer_pool.fetch_page(5)?;
    assert_eq!(&page.read().data[0..4], b"karl");
    buffer_pool.unpin_page(5, false);
    Ok(())
}

#[test]
fn delete_page_refuses_while_pinned() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(4)?;

    let _page = buffer_pool.fetch_page(7)?;
    assert!(!buffer_pool.delete_page(7));

    buffer_pool.unpin_page(7, false);
    assert!(buffer_pool.delete_page(7));
    assert!(!buffer_pool.contains_page(7));

    // Deleting a non-resident page only touches the disk side.
    assert!(buffer_pool.delete_page(99));
    Ok(())
}

#[test]
fn flush_page_writes_through() -> Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = BufferPoolManager::new(BufferPoolConfig::new(4), Arc::clone(&disk_manager));

    let page = buffer_pool.fetch_page(3)?;
    page.write().data[0] = 0x5A;
    buffer_pool.unpin_page(3, true);
    buffer_pool.flush_page(3)?;

    let mut on_disk = [0u8; karstdb::common::types::PAGE_SIZE];
    disk_manager.read_page(3, &mut on_disk)?;
    assert_eq!(on_disk[0], 0x5A);

    assert!(matches!(
        buffer_pool.flush_page(77),
        Err(BufferPoolError::PageNotFound(77))
    ));
    Ok(())
}

#[test]
fn flush_all_pages_covers_every_resident_page() -> Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = BufferPoolManager::new(BufferPoolConfig::new(4), Arc::clone(&disk_manager));

    for page_id in [2, 4, 6] {
        let page = buffer_pool.fetch_page(page_id)?;
        page.write().data[0] = page_id as u8;
        buffer_pool.unpin_page(page_id, true);
    }
    buffer_pool.flush_all_pages()?;

    for page_id in [2, 4, 6] {
        let mut on_disk = [0u8; karstdb::common::types::PAGE_SIZE];
        disk_manager.read_page(page_id, &mut on_disk)?;
        assert_eq!(on_disk[0], page_id as u8);
    }
    Ok(())
}

#[test]
fn sharded_instances_allocate_disjoint_ids() -> Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);

    let shard0 = BufferPoolManager::new(
        BufferPoolConfig::sharded(4, 2, 0),
        Arc::clone(&disk_manager),
    );
    let shard1 = BufferPoolManager::new(
        BufferPoolConfig::sharded(4, 2, 1),
        Arc::clone(&disk_manager),
    );

    let (_page, a) = shard0.new_page()?;
    let (_page, b) = shard0.new_page()?;
    let (_page, c) = shard1.new_page()?;
    let (_page, d) = shard1.new_page()?;

    // Instance 0 skips the header page id.
    assert_eq!((a, b), (2, 4));
    assert_eq!((c, d), (1, 3));
    Ok(())
}
