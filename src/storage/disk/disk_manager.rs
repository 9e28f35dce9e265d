use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual disk I/O: reading and writing
/// fixed-size pages at offsets derived from their page id.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file backing this manager.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into `buffer`.
    ///
    /// Reading past the end of the file yields a zeroed page, so a page
    /// that was allocated but never written behaves as empty.
    pub fn read_page(
        &self,
        page_id: PageId,
        buffer: &mut [u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset + PAGE_SIZE as u64 > file_size {
            buffer.fill(0);
            // A partial tail page only occurs after a torn write; read what exists.
            if offset < file_size {
                file.seek(SeekFrom::Start(offset))?;
                let readable = (file_size - offset) as usize;
                file.read_exact(&mut buffer[..readable])?;
            }
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer)?;
        Ok(())
    }

    /// Write a page to disk at its offset, flushing to the OS.
    pub fn write_page(
        &self,
        page_id: PageId,
        buffer: &[u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)?;
        file.flush()?;
        Ok(())
    }

    /// Allocate a fresh page at the end of the file and return its id.
    ///
    /// Sharded buffer pool instances allocate ids themselves; this entry
    /// point serves single-instance setups and tooling.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Release a page id.
    ///
    /// Freed ids are not recycled; the slot simply stops being referenced.
    pub fn deallocate_page(&self, page_id: PageId) {
        debug!("deallocate page {}", page_id);
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;
    use tempfile::NamedTempFile;

    #[test]
    fn write_then_read_round_trips() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(3, &page).unwrap();

        let mut read_back = [0u8; PAGE_SIZE];
        disk.read_page(3, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0xAB);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn read_past_eof_is_zeroed() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut buffer = [0xFFu8; PAGE_SIZE];
        disk.read_page(42, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn invalid_page_id_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut buffer = [0u8; PAGE_SIZE];
        assert!(disk.read_page(INVALID_PAGE_ID, &mut buffer).is_err());
        assert!(disk.write_page(INVALID_PAGE_ID, &buffer).is_err());
    }

    #[test]
    fn allocate_extends_the_file() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let first = disk.allocate_page().unwrap();
        let second = disk.allocate_page().unwrap();
        assert_eq!(second, first + 1);
    }
}
