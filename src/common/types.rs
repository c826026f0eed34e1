use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Page ID type. Negative ids are never allocated.
pub type PageId = i32;

/// Sentinel for a frame that holds no page.
pub const INVALID_PAGE_ID: PageId = -1;

/// Transaction ID type. Allocated monotonically; a smaller id is an older
/// transaction.
pub type TxnId = u32;

/// Record ID type
pub type Rid = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the page content and drop its identity.
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

/// Smart pointer to a page. The page's RwLock doubles as the per-page latch:
/// index code takes `read()` for lookups and `write()` for mutations.
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
