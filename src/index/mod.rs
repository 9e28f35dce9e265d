pub mod btree;

pub use btree::{BTreeError, BTreeIndex, BTreeIterator};
