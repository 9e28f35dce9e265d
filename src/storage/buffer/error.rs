use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} is not resident in the buffer pool")]
    PageNotFound(PageId),

    #[error("Out of memory: all frames are pinned")]
    OutOfMemory,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
