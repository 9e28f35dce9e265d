use std::fmt;
use std::sync::Arc;

use parking_lot::lock_api::{ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawMutex, RawRwLock, RwLock};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Well-known page holding the index-name to root-page-id records
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type (index into the frame array)
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Index key type stored by the B+tree
pub type IndexKey = i64;

/// Record identifier: names one tuple as (page, slot).
/// This is the unit of row-level locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Page structure: identifier plus the raw byte payload.
///
/// Pin count and dirty flag live in the buffer pool's frame metadata, so
/// the surrounding `RwLock` doubles as the page latch taken by the B+tree.
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Clear the payload and drop the identifier.
    pub fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read latch on a page
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch on a page
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// Owned guard over the B+tree's root page id
pub type RootGuard = ArcMutexGuard<RawMutex, PageId>;
