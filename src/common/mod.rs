pub mod config;
pub mod rwlatch;
pub mod types;

pub use config::{BufferPoolConfig, EngineConfig};
pub use rwlatch::ReaderWriterLatch;
pub use types::{
    FrameId, IndexKey, Page, PagePtr, PageId, Rid, TxnId, HEADER_PAGE_ID, INVALID_PAGE_ID,
    PAGE_SIZE,
};
