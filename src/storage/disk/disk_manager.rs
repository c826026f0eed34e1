use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
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

/// Byte-addressable page reader/writer indexed by page id.
///
/// The buffer pool is the only caller; it hands in the frame's byte array
/// directly. Unknown page ids read as all zeroes.
pub trait DiskManager: Send + Sync {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError>;
    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError>;
}

/// File-backed disk manager: one database file, pages at `page_id * PAGE_SIZE`.
pub struct FileDiskManager {
    db_file: Mutex<File>,
}

impl FileDiskManager {
    /// Open (or create) the database file at the given path.
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

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();

        // A page that has never been written reads as zeroes.
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}
