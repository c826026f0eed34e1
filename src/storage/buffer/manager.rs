use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;

/// Mapping state guarded by the pool's single latch. Every public operation
/// takes the latch for its whole duration; frame contents are reached through
/// the per-frame locks afterwards.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Fixed-capacity in-memory cache of disk pages.
///
/// The pool may be one shard of `num_instances` pools; page ids allocated by
/// shard `k` satisfy `id % num_instances == k`. Callers receive non-owning
/// `PagePtr`s that stay valid only while the page is pinned.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<FramePtr>,
    latch: Mutex<PoolInner>,
    replacer: LRUReplacer,
    disk_manager: Arc<dyn DiskManager>,
}

impl BufferPoolManager {
    /// Create a stand-alone buffer pool (a single instance).
    pub fn new(pool_size: usize, disk_manager: Arc<dyn DiskManager>) -> Self {
        Self::new_sharded(pool_size, 1, 0, disk_manager)
    }

    /// Create one shard of an array of `num_instances` buffer pools.
    pub fn new_sharded(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<dyn DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "buffer pool array must have at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index out of range for the buffer pool array"
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            latch: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index as PageId,
            }),
            replacer: LRUReplacer::new(pool_size),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it in a frame.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.latch.lock();
        let frame_id = self.find_victim(&mut inner)?;

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        self.evict(&mut inner, &mut frame_guard)?;

        let page_id = Self::allocate_page(&mut inner, self.num_instances);
        {
            let mut page_guard = frame_guard.page.write();
            page_guard.reset();
            page_guard.page_id = page_id;
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok((frame_guard.page.clone(), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    ///
    /// Fails with `BufferPoolFull` when the page is not resident and every
    /// frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.latch.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            let mut frame_guard = frame.write();
            frame_guard.pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(frame_guard.page.clone());
        }

        let frame_id = self.find_victim(&mut inner)?;
        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        self.evict(&mut inner, &mut frame_guard)?;

        {
            let mut page_guard = frame_guard.page.write();
            self.disk_manager.read_page(page_id, &mut page_guard.data)?;
            page_guard.page_id = page_id;
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(frame_guard.page.clone())
    }

    /// Drop one pin on a page, optionally marking it dirty.
    ///
    /// The dirty flag is sticky: `is_dirty = false` never clears it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let inner = self.latch.lock();
        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            frame_guard.is_dirty = true;
        }
        frame_guard.pin_count -= 1;
        if frame_guard.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag. The page stays
    /// resident; flushing never evicts.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let inner = self.latch.lock();
        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(page_id, &page_guard.data)?;
        }
        frame_guard.is_dirty = false;

        Ok(())
    }

    /// Write every resident page to disk, dirty or not.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let inner = self.latch.lock();
        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = &self.frames[frame_id];
            let mut frame_guard = frame.write();
            {
                let page_guard = frame_guard.page.read();
                self.disk_manager.write_page(page_id, &page_guard.data)?;
            }
            frame_guard.is_dirty = false;
        }
        Ok(())
    }

    /// Drop a page from the pool, returning its frame to the free list.
    ///
    /// Deleting a page that is not resident succeeds (the id is logically
    /// deallocated). Deleting a pinned page fails with `PagePinned`.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.latch.lock();
        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(page_id, &page_guard.data)?;
        }

        inner.page_table.remove(&page_id);
        frame_guard.page.write().reset();
        frame_guard.is_dirty = false;
        frame_guard.pin_count = 0;
        self.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    /// Pick a frame for a new occupant: free list first, then the replacer.
    fn find_victim(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }
        self.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)
    }

    /// Write out the frame's current page if dirty and drop its mapping.
    fn evict(
        &self,
        inner: &mut PoolInner,
        frame_guard: &mut Frame,
    ) -> Result<(), BufferPoolError> {
        let old_page_id = frame_guard.page.read().page_id;
        if old_page_id == INVALID_PAGE_ID {
            return Ok(());
        }
        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(old_page_id, &page_guard.data)?;
        }
        frame_guard.is_dirty = false;
        inner.page_table.remove(&old_page_id);
        Ok(())
    }

    /// Advance the shard's page id counter. Every id issued by instance `k`
    /// satisfies `id % num_instances == k`.
    fn allocate_page(inner: &mut PoolInner, num_instances: u32) -> PageId {
        let page_id = inner.next_page_id;
        inner.next_page_id += num_instances as PageId;
        page_id
    }
}
