use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::common::types::{Lsn, PageId};

/// Deepest directory the page can hold: the header plus `2^10` four-byte
/// bucket page ids plus `2^10` one-byte local depths fit in one 8KB page.
pub const MAX_DIRECTORY_DEPTH: u32 = 10;

/// Number of directory entry slots (only the first `2^global_depth` are live).
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DIRECTORY_DEPTH;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const BUCKET_PAGE_IDS_OFFSET: usize = 12;
const LOCAL_DEPTHS_OFFSET: usize = BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;

/// Read-only view of a directory page over a frame's byte array.
pub struct DirectoryView<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data[PAGE_ID_OFFSET..])
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_u32(&self.data[LSN_OFFSET..]) as Lsn
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data[GLOBAL_DEPTH_OFFSET..])
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    /// Number of live directory entries.
    pub fn size(&self) -> u32 {
        1 << self.global_depth()
    }

    pub fn bucket_page_id(&self, bucket_idx: u32) -> PageId {
        let offset = BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx as usize;
        LittleEndian::read_i32(&self.data[offset..])
    }

    pub fn local_depth(&self, bucket_idx: u32) -> u32 {
        self.data[LOCAL_DEPTHS_OFFSET + bucket_idx as usize] as u32
    }

    pub fn local_depth_mask(&self, bucket_idx: u32) -> u32 {
        (1 << self.local_depth(bucket_idx)) - 1
    }

    /// Index of the bucket sharing all but the highest distinguished hash bit.
    pub fn split_image_index(&self, bucket_idx: u32) -> u32 {
        bucket_idx ^ (1 << (self.local_depth(bucket_idx) - 1))
    }

    /// The directory can halve only when every live entry distinguishes fewer
    /// bits than the directory does.
    pub fn can_shrink(&self) -> bool {
        for i in 0..self.size() {
            if self.local_depth(i) == self.global_depth() {
                return false;
            }
        }
        true
    }

    /// Check the structural invariants, panicking on violation:
    /// every local depth is at most the global depth; entries sharing a bucket
    /// page share a local depth; a depth-`d` bucket has exactly
    /// `2^(global_depth - d)` referrers.
    pub fn verify_integrity(&self) {
        let mut page_id_to_count: HashMap<PageId, u32> = HashMap::new();
        let mut page_id_to_ld: HashMap<PageId, u32> = HashMap::new();

        for idx in 0..self.size() {
            let page_id = self.bucket_page_id(idx);
            let ld = self.local_depth(idx);
            assert!(
                ld <= self.global_depth(),
                "local depth {} exceeds global depth {} at index {}",
                ld,
                self.global_depth(),
                idx
            );

            *page_id_to_count.entry(page_id).or_insert(0) += 1;

            if let Some(&known_ld) = page_id_to_ld.get(&page_id) {
                if known_ld != ld {
                    warn!(
                        "directory integrity: local depth {} != {} for bucket page {}",
                        ld, known_ld, page_id
                    );
                }
                assert_eq!(known_ld, ld, "inconsistent local depth for page {}", page_id);
            } else {
                page_id_to_ld.insert(page_id, ld);
            }
        }

        for (page_id, count) in page_id_to_count {
            let ld = page_id_to_ld[&page_id];
            let required = 1u32 << (self.global_depth() - ld);
            if count != required {
                warn!(
                    "directory integrity: bucket page {} has {} referrers, expected {}",
                    page_id, count, required
                );
            }
            assert_eq!(count, required, "wrong referrer count for page {}", page_id);
        }
    }
}

/// Mutable view of a directory page over a frame's byte array.
pub struct DirectoryViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryViewMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn view(&self) -> DirectoryView<'_> {
        DirectoryView::new(self.data)
    }

    pub fn global_depth(&self) -> u32 {
        self.view().global_depth()
    }

    pub fn global_depth_mask(&self) -> u32 {
        self.view().global_depth_mask()
    }

    pub fn size(&self) -> u32 {
        self.view().size()
    }

    pub fn bucket_page_id(&self, bucket_idx: u32) -> PageId {
        self.view().bucket_page_id(bucket_idx)
    }

    pub fn local_depth(&self, bucket_idx: u32) -> u32 {
        self.view().local_depth(bucket_idx)
    }

    pub fn can_shrink(&self) -> bool {
        self.view().can_shrink()
    }

    /// Set up an empty depth-zero directory owned by `page_id`.
    pub fn init(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.data[PAGE_ID_OFFSET..], page_id);
        LittleEndian::write_u32(&mut self.data[LSN_OFFSET..], 0);
        LittleEndian::write_u32(&mut self.data[GLOBAL_DEPTH_OFFSET..], 0);
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, bucket_page_id: PageId) {
        let offset = BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx as usize;
        LittleEndian::write_i32(&mut self.data[offset..], bucket_page_id);
    }

    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u32) {
        debug_assert!(local_depth <= MAX_DIRECTORY_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + bucket_idx as usize] = local_depth as u8;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: u32) {
        let depth = self.local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, depth + 1);
    }

    pub fn decr_local_depth(&mut self, bucket_idx: u32) {
        let depth = self.local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, depth - 1);
    }

    /// Double the directory: the new upper half mirrors the lower half so
    /// every existing bucket is reachable through both of its new indexes.
    pub fn incr_global_depth(&mut self) {
        let old_size = self.size();
        debug_assert!(old_size as usize * 2 <= DIRECTORY_ARRAY_SIZE);
        for i in 0..old_size {
            let page_id = self.bucket_page_id(i);
            let depth = self.local_depth(i);
            self.set_bucket_page_id(old_size + i, page_id);
            self.set_local_depth(old_size + i, depth);
        }
        let depth = self.global_depth();
        LittleEndian::write_u32(&mut self.data[GLOBAL_DEPTH_OFFSET..], depth + 1);
    }

    pub fn decr_global_depth(&mut self) {
        let depth = self.global_depth();
        debug_assert!(depth > 0);
        LittleEndian::write_u32(&mut self.data[GLOBAL_DEPTH_OFFSET..], depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    #[test]
    fn test_layout_fits_in_page() {
        assert!(LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE <= PAGE_SIZE);
    }

    #[test]
    fn test_global_depth_growth_mirrors_entries() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut dir = DirectoryViewMut::new(&mut data);
        dir.init(3);
        dir.set_bucket_page_id(0, 7);

        assert_eq!(dir.global_depth(), 0);
        assert_eq!(dir.size(), 1);

        dir.incr_global_depth();
        assert_eq!(dir.global_depth(), 1);
        assert_eq!(dir.size(), 2);
        assert_eq!(dir.bucket_page_id(1), 7);
        assert_eq!(dir.local_depth(1), 0);

        dir.view().verify_integrity();
    }

    #[test]
    fn test_masks_and_split_image() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut dir = DirectoryViewMut::new(&mut data);
        dir.init(1);
        dir.incr_global_depth();
        dir.incr_global_depth();
        dir.set_local_depth(2, 2);

        let view = dir.view();
        assert_eq!(view.global_depth_mask(), 0b11);
        assert_eq!(view.local_depth_mask(2), 0b11);
        // The image of 0b10 at depth 2 flips bit 1.
        assert_eq!(view.split_image_index(2), 0);
    }
}
