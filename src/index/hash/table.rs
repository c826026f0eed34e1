use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::PageId;
use crate::index::hash::bucket_page::{BucketView, BucketViewMut};
use crate::index::hash::codec::SlotValue;
use crate::index::hash::directory_page::{DirectoryView, DirectoryViewMut, MAX_DIRECTORY_DEPTH};
use crate::index::hash::error::HashTableError;
use crate::storage::buffer::BufferPoolManager;

/// Disk-resident extendible hash table built on the buffer pool.
///
/// One directory page fans out to bucket pages; the directory doubles when a
/// bucket at full local depth splits and halves back when merges leave every
/// bucket below the global depth. The table latch serializes structural
/// changes against everything else; bucket page latches order concurrent
/// readers and writers of the same bucket.
pub struct ExtendibleHashTable<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: SlotValue + Hash,
    V: SlotValue,
{
    /// Create the table: one directory page pointing at one empty bucket with
    /// local depth zero.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, HashTableError> {
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        {
            let mut guard = directory_page.write();
            let mut dir = DirectoryViewMut::new(&mut guard.data);
            dir.init(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
        }

        buffer_pool.unpin_page(bucket_page_id, true)?;
        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    fn hash(key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    /// Collect every value stored under the key.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let _table_guard = self.table_latch.read();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let bucket_page_id = {
            let guard = directory_page.read();
            let dir = DirectoryView::new(&guard.data);
            dir.bucket_page_id(Self::hash(key) & dir.global_depth_mask())
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let values = {
            let guard = bucket_page.read();
            BucketView::<K, V>::new(&guard.data).get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(values)
    }

    /// Insert a pair, splitting the target bucket as often as needed.
    ///
    /// Returns false for a duplicate pair, and for a full bucket that can no
    /// longer split because it already distinguishes every directory bit.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        {
            let _table_guard = self.table_latch.read();

            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let bucket_page_id = {
                let guard = directory_page.read();
                let dir = DirectoryView::new(&guard.data);
                dir.bucket_page_id(Self::hash(key) & dir.global_depth_mask())
            };

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut guard = bucket_page.write();
            let mut bucket = BucketViewMut::<K, V>::new(&mut guard.data);
            if !bucket.view().is_full() {
                let inserted = bucket.insert(key, value);
                drop(guard);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(inserted);
            }

            // Full bucket: release everything before taking the write latch.
            drop(guard);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        }

        self.split_insert(key, value)
    }

    /// Split the key's bucket under the table write latch, then retry the
    /// insert. Each split raises the bucket's local depth, so the retry
    /// terminates.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        {
            let _table_guard = self.table_latch.write();

            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let mut directory_guard = directory_page.write();
            let mut dir = DirectoryViewMut::new(&mut directory_guard.data);

            let hash = Self::hash(key);
            let split_idx = hash & dir.global_depth_mask();
            let split_depth = dir.local_depth(split_idx);
            if split_depth >= MAX_DIRECTORY_DEPTH {
                drop(directory_guard);
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(false);
            }

            if split_depth == dir.global_depth() {
                dir.incr_global_depth();
            }

            // The bucket may have been re-pointed since the latches were
            // dropped; resolve it again under the grown mask.
            let split_idx = hash & dir.global_depth_mask();
            let split_page_id = dir.bucket_page_id(split_idx);

            let split_page = self.buffer_pool.fetch_page(split_page_id)?;
            let mut split_guard = split_page.write();
            let entries = BucketView::<K, V>::new(&split_guard.data).entries();
            let mut split_bucket = BucketViewMut::<K, V>::new(&mut split_guard.data);
            split_bucket.clear();

            let (image_page, image_page_id) = self.buffer_pool.new_page()?;
            let mut image_guard = image_page.write();
            let mut image_bucket = BucketViewMut::<K, V>::new(&mut image_guard.data);

            dir.incr_local_depth(split_idx);
            let new_depth = dir.local_depth(split_idx);
            let image_idx = dir.view().split_image_index(split_idx);
            debug!(
                "splitting bucket page {} (index {:#b}) into page {} at depth {}",
                split_page_id, split_idx, image_page_id, new_depth
            );

            // Re-point every live entry of each residue class. Entries agree
            // with their class anchor on the low `new_depth` bits.
            let stride = 1u32 << new_depth;
            let size = dir.size();
            let mut i = split_idx & (stride - 1);
            while i < size {
                dir.set_bucket_page_id(i, split_page_id);
                dir.set_local_depth(i, new_depth);
                i += stride;
            }
            let mut i = image_idx & (stride - 1);
            while i < size {
                dir.set_bucket_page_id(i, image_page_id);
                dir.set_local_depth(i, new_depth);
                i += stride;
            }

            // Rehash the old contents across the pair.
            let mask = dir.view().local_depth_mask(split_idx);
            for (k, v) in entries {
                let target_page_id = dir.bucket_page_id(Self::hash(&k) & mask);
                if target_page_id == split_page_id {
                    split_bucket.insert(&k, &v);
                } else {
                    image_bucket.insert(&k, &v);
                }
            }

            drop(image_guard);
            drop(split_guard);
            drop(directory_guard);
            self.buffer_pool.unpin_page(image_page_id, true)?;
            self.buffer_pool.unpin_page(split_page_id, true)?;
            self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        }

        self.insert(key, value)
    }

    /// Remove an exact pair. An emptied bucket is merged with its image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let removed;
        {
            let _table_guard = self.table_latch.read();

            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let bucket_page_id = {
                let guard = directory_page.read();
                let dir = DirectoryView::new(&guard.data);
                dir.bucket_page_id(Self::hash(key) & dir.global_depth_mask())
            };

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut guard = bucket_page.write();
            let mut bucket = BucketViewMut::<K, V>::new(&mut guard.data);
            removed = bucket.remove(key, value);
            let empty = bucket.view().is_empty();
            drop(guard);

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            if !empty {
                return Ok(removed);
            }
        }

        self.merge(key)?;
        Ok(removed)
    }

    /// Fold the key's emptied bucket into its split image under the table
    /// write latch, then shrink the directory as far as it goes.
    fn merge(&self, key: &K) -> Result<(), HashTableError> {
        let _table_guard = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut directory_guard = directory_page.write();
        let mut dir = DirectoryViewMut::new(&mut directory_guard.data);

        let merge_idx = Self::hash(key) & dir.global_depth_mask();
        let depth = dir.local_depth(merge_idx);
        if depth == 0 {
            drop(directory_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }

        let image_idx = dir.view().split_image_index(merge_idx);
        if dir.local_depth(image_idx) != depth {
            drop(directory_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }

        let merged_page_id = dir.bucket_page_id(merge_idx);
        let image_page_id = dir.bucket_page_id(image_idx);

        // The bucket may have been refilled between the remove dropping its
        // latches and this point.
        let bucket_page = self.buffer_pool.fetch_page(merged_page_id)?;
        let empty = {
            let guard = bucket_page.read();
            BucketView::<K, V>::new(&guard.data).is_empty()
        };
        self.buffer_pool.unpin_page(merged_page_id, false)?;
        if !empty {
            drop(directory_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }

        self.buffer_pool.delete_page(merged_page_id)?;
        debug!(
            "merging bucket page {} into page {} at depth {}",
            merged_page_id, image_page_id, depth
        );

        // Every referrer of the dead bucket joins the image's class, and the
        // whole class drops to the shallower depth.
        let new_depth = depth - 1;
        for i in 0..dir.size() {
            if dir.bucket_page_id(i) == merged_page_id {
                dir.set_bucket_page_id(i, image_page_id);
            }
            if dir.bucket_page_id(i) == image_page_id {
                dir.set_local_depth(i, new_depth);
            }
        }

        while dir.can_shrink() {
            dir.decr_global_depth();
        }

        drop(directory_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(())
    }

    /// Current number of hash bits indexing the directory.
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table_guard = self.table_latch.read();
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let depth = {
            let guard = directory_page.read();
            DirectoryView::new(&guard.data).global_depth()
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Check the directory's structural invariants, panicking on violation.
    /// Debugging and test aid.
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table_guard = self.table_latch.read();
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        {
            let guard = directory_page.read();
            DirectoryView::new(&guard.data).verify_integrity();
        }
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }
}
