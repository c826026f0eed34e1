use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use varandb::storage::buffer::BufferPoolManager;
use varandb::storage::disk::FileDiskManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(FileDiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    Ok((buffer_pool, file))
}
