use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering::Relaxed};
use std::sync::{Mutex, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, trace, warn};

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::page::{Page, PageId, PageInner};
use crate::replacer::{FrameId, Replacer};

/// Bookkeeping guarded by the pager's single short-term latch: the page
/// table, the free-frame list, and the recency replacer. Held only for
/// O(1) operations, per `spec.md` §4.2/§5 — never across a page lock or a
/// disk read/write for an already-resident page.
struct Latch {
    page_table: std::collections::HashMap<PageId, FrameId>,
    free: Vec<FrameId>,
    replacer: Replacer,
}

/// One pager per backing file. Owns a bounded cache of at most `max_pages`
/// frames, keyed by page id, evicting the least-recently-used unpinned
/// entry when full. Grounded on the teacher's `page_cache.rs`
/// (`PageCache`/`FreeList`/`Pin`), generalized from a const-generic cache
/// size to the config's runtime `leafCacheSize`/`intCacheSize`.
pub struct Pager {
    disk: Box<dyn Disk>,
    page_size: usize,
    frames: Vec<Page>,
    pins: Vec<AtomicI32>,
    latch: Mutex<Latch>,
}

/// A pinned, read-locked handle to a cached page. The lock is acquired
/// once, at construction, and held for as long as this value lives — the
/// crabbing discipline in `tree.rs` relies on that to keep a node's
/// content stable across a multi-step traversal instead of re-locking
/// per access. Unpins (and, first, unlocks) on `Drop`.
pub struct ReadPin<'a> {
    pager: &'a Pager,
    frame: FrameId,
    pub id: PageId,
    guard: Option<RwLockReadGuard<'a, PageInner>>,
}

/// The write-locked counterpart of [`ReadPin`].
pub struct WritePin<'a> {
    pager: &'a Pager,
    frame: FrameId,
    pub id: PageId,
    guard: Option<RwLockWriteGuard<'a, PageInner>>,
}

impl Deref for ReadPin<'_> {
    type Target = PageInner;
    fn deref(&self) -> &PageInner {
        self.guard.as_deref().expect("guard taken before drop")
    }
}

impl Deref for WritePin<'_> {
    type Target = PageInner;
    fn deref(&self) -> &PageInner {
        self.guard.as_deref().expect("guard taken before drop")
    }
}

impl DerefMut for WritePin<'_> {
    fn deref_mut(&mut self) -> &mut PageInner {
        self.guard.as_deref_mut().expect("guard taken before drop")
    }
}

impl Drop for ReadPin<'_> {
    fn drop(&mut self) {
        // Drop the guard (releasing the page lock) before unpinning, so
        // the frame is never marked evictable while still locked.
        self.guard.take();
        self.pager.unpin(self.frame);
    }
}

impl Drop for WritePin<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.pager.unpin(self.frame);
    }
}

impl Pager {
    pub fn new(disk: Box<dyn Disk>, page_size: usize, max_pages: usize) -> Self {
        let frames = (0..max_pages).map(|_| Page::init(0, page_size)).collect();
        let pins = (0..max_pages).map(|_| AtomicI32::new(0)).collect();
        let latch = Mutex::new(Latch {
            page_table: std::collections::HashMap::new(),
            free: (0..max_pages).collect(),
            replacer: Replacer::new(),
        });

        Self { disk, page_size, frames, pins, latch }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn unpin(&self, frame: FrameId) {
        if self.pins[frame].fetch_sub(1, Relaxed) == 1 {
            let mut latch = self.latch.lock().expect("pager latch poisoned");
            latch.replacer.set_evictable(frame, true);
        }
    }

    fn pin(&self, latch: &mut Latch, frame: FrameId) {
        if self.pins[frame].fetch_add(1, Relaxed) == 0 {
            latch.replacer.set_evictable(frame, false);
        }
        latch.replacer.record_access(frame);
    }

    /// Pin the frame holding `page_id`, loading it from disk first if it
    /// isn't already cached. Shared by `fetch_read`/`fetch_write`, which
    /// differ only in which lock they take on the returned frame.
    fn checkout(&self, page_id: PageId) -> Result<FrameId> {
        {
            let mut latch = self.latch.lock().expect("pager latch poisoned");
            if let Some(&frame) = latch.page_table.get(&page_id) {
                self.pin(&mut latch, frame);
                trace!("pager: cache hit for page {page_id}");
                return Ok(frame);
            }
        }

        self.load(page_id)
    }

    /// Pin and read-lock the page for `page_id`, loading it from disk if
    /// it is not already cached. The lock is held for the life of the
    /// returned [`ReadPin`].
    pub fn fetch_read(&self, page_id: PageId) -> Result<ReadPin<'_>> {
        let frame = self.checkout(page_id)?;
        let guard = self.frames[frame].read();
        Ok(ReadPin { pager: self, frame, id: page_id, guard: Some(guard) })
    }

    /// Pin and write-lock the page for `page_id`, loading it from disk if
    /// it is not already cached. The lock is held for the life of the
    /// returned [`WritePin`].
    pub fn fetch_write(&self, page_id: PageId) -> Result<WritePin<'_>> {
        let frame = self.checkout(page_id)?;
        let guard = self.frames[frame].write();
        Ok(WritePin { pager: self, frame, id: page_id, guard: Some(guard) })
    }

    /// Extend the backing file by one page and return it write-locked,
    /// zero-filled.
    pub fn allocate(&self) -> Result<WritePin<'_>> {
        let page_id = self.disk.extend(self.page_size)?;
        let frame = self.load_zeroed(page_id)?;
        let guard = self.frames[frame].write();
        Ok(WritePin { pager: self, frame, id: page_id, guard: Some(guard) })
    }

    fn reserve_frame(&self) -> Result<(FrameId, Option<PageId>)> {
        let mut latch = self.latch.lock().expect("pager latch poisoned");

        if let Some(frame) = latch.free.pop() {
            self.pin(&mut latch, frame);
            return Ok((frame, None));
        }

        let frame = match latch.replacer.evict() {
            Some(frame) => frame,
            None => {
                warn!("pager: cache exhausted, no evictable frame");
                return Err(Error::NoResource);
            }
        };

        let old_id = self.frames[frame].read().id;
        latch.page_table.remove(&old_id);
        debug!("pager: evicted page {old_id} from frame {frame}");

        self.pin(&mut latch, frame);
        Ok((frame, Some(old_id)))
    }

    fn publish(&self, frame: FrameId, page_id: PageId) {
        let mut latch = self.latch.lock().expect("pager latch poisoned");
        latch.page_table.insert(page_id, frame);
    }

    /// Reserve a frame for `page_id`, reading its bytes in from disk, and
    /// leave it pinned-but-unlocked for the caller to lock.
    fn load(&self, page_id: PageId) -> Result<FrameId> {
        let (frame, evicted) = self.reserve_frame()?;

        if let Some(old_id) = evicted {
            if self.frames[frame].is_dirty() {
                self.frames[frame].flush(self.disk.as_ref())?;
            }
            let _ = old_id;
        }

        let data = self.disk.read_page(page_id, self.page_size)?;
        self.frames[frame].reset(page_id, data);
        self.publish(frame, page_id);

        Ok(frame)
    }

    /// Reserve a frame for `page_id`, zero-filled, leaving it
    /// pinned-but-unlocked for the caller to lock.
    fn load_zeroed(&self, page_id: PageId) -> Result<FrameId> {
        let (frame, evicted) = self.reserve_frame()?;

        if let Some(old_id) = evicted {
            if self.frames[frame].is_dirty() {
                self.frames[frame].flush(self.disk.as_ref())?;
            }
            let _ = old_id;
        }

        self.frames[frame].reset(page_id, vec![0u8; self.page_size]);
        self.publish(frame, page_id);

        Ok(frame)
    }

    pub fn flush_all(&self) -> Result<()> {
        let latch = self.latch.lock().expect("pager latch poisoned");
        for &frame in latch.page_table.values() {
            if self.frames[frame].is_dirty() {
                self.frames[frame].flush(self.disk.as_ref())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::Memory;

    fn pager(max_pages: usize, page_size: usize) -> Pager {
        Pager::new(Box::new(Memory::new()), page_size, max_pages)
    }

    #[test]
    fn test_allocate_and_fetch() -> Result<()> {
        let pc = pager(4, 64);

        let id;
        {
            let mut pin = pc.allocate()?;
            id = pin.id;
            pin.data[0..4].copy_from_slice(b"test");
        }

        let pin = pc.fetch_read(id)?;
        assert_eq!(&pin.data[0..4], b"test");

        Ok(())
    }

    #[test]
    fn test_cache_exhaustion_returns_no_resource() -> Result<()> {
        let pc = pager(2, 64);

        let _a = pc.allocate()?;
        let _b = pc.allocate()?;

        match pc.allocate() {
            Err(Error::NoResource) => {}
            other => panic!("expected NoResource, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_eviction_reuses_frame_once_unpinned() -> Result<()> {
        let pc = pager(1, 64);

        let first_id;
        {
            let pin = pc.allocate()?;
            first_id = pin.id;
        }

        let pin = pc.allocate()?;
        assert_ne!(pin.id, first_id);

        Ok(())
    }
}
