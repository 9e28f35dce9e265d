use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Page {0} is not a B+tree node (page type {1})")]
    InvalidNodeFormat(PageId, u32),

    #[error("Node on page {0} does not fit the page")]
    NodeTooLarge(PageId),

    #[error("Header page has no room for another index")]
    HeaderFull,

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
