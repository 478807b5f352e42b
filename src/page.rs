use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk::Disk;
use crate::error::Result;

/// 32-bit page identifier. The sentinel [`NULL_PAGE`] means "no page"; the
/// high bit ([`LEAF_TAG`]) marks "this id lives in the leaf file" when a
/// page id must be disambiguated between the leaf and internal files (as
/// happens for children of an internal node, and for the `roof` file).
pub type PageId = u32;

pub const NULL_PAGE: PageId = 0xFFFF_FFFF;
pub const LEAF_TAG: PageId = 0x8000_0000;

pub fn is_leaf_tagged(id: PageId) -> bool {
    id & LEAF_TAG != 0
}

pub fn tag_leaf(id: PageId) -> PageId {
    id | LEAF_TAG
}

pub fn untag(id: PageId) -> PageId {
    id & !LEAF_TAG
}

/// The guarded contents of a [`Page`]: its current id (a frame is reused
/// for different ids across its lifetime as pages are evicted and loaded)
/// and its raw bytes.
pub struct PageInner {
    pub id: PageId,
    pub data: Vec<u8>,
}

/// A fixed-size byte buffer occupying one cache frame. `dirty` lives
/// outside the page lock so the pager can inspect it without contending on
/// the data itself; every write-lock acquisition marks the page dirty,
/// since the only reason to take a write lock is to mutate the node.
pub struct Page {
    dirty: AtomicBool,
    inner: RwLock<PageInner>,
}

impl Page {
    pub fn init(id: PageId, page_size: usize) -> Self {
        Self {
            dirty: AtomicBool::new(false),
            inner: RwLock::new(PageInner { id, data: vec![0u8; page_size] }),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PageInner> {
        self.inner.read().expect("page lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, PageInner> {
        self.dirty.store(true, Relaxed);
        self.inner.write().expect("page lock poisoned")
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Relaxed)
    }

    /// Replace this frame's content in place, as happens when a frame is
    /// reused for a freshly loaded page. Only safe to call while the frame
    /// is exclusively reserved (pinned, unpublished in the page table).
    pub fn reset(&self, id: PageId, data: Vec<u8>) {
        let mut w = self.inner.write().expect("page lock poisoned");
        w.id = id;
        w.data = data;
        self.dirty.store(false, Relaxed);
    }

    /// Write this frame's current bytes through to `disk` and clear dirty.
    pub fn flush(&self, disk: &dyn Disk) -> Result<()> {
        let r = self.inner.read().expect("page lock poisoned");
        disk.write_page(r.id, &r.data)?;
        drop(r);
        self.dirty.store(false, Relaxed);
        Ok(())
    }
}
