use std::cell::UnsafeCell;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

use nix::sys::uio;

use crate::error::Result;
use crate::page::PageId;

/// Position-addressed page I/O. Implementations must not rely on the
/// file's stream cursor: concurrent reads/writes on different pages of the
/// same file must not interfere with one another.
pub trait Disk: Send + Sync {
    fn read_page(&self, page_id: PageId, page_size: usize) -> Result<Vec<u8>>;
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;
    /// Current file size in bytes, used by the pager to compute the next
    /// page id on allocation.
    fn size(&self) -> Result<u64>;
    /// Extend the file by `page_size` zero bytes, returning the new page's
    /// id (`old_size / page_size`).
    fn extend(&self, page_size: usize) -> Result<PageId>;
}

pub struct FileSystem {
    file: File,
    // serializes `extend`'s read-size/grow sequence; pread/pwrite at known
    // offsets need no lock of their own.
    grow: Mutex<()>,
}

impl Disk for FileSystem {
    fn read_page(&self, page_id: PageId, page_size: usize) -> Result<Vec<u8>> {
        let offset = page_size as i64 * i64::from(page_id);
        let fd = self.file.as_raw_fd();

        let mut buf = vec![0u8; page_size];
        uio::pread(fd, &mut buf, offset)?;

        Ok(buf)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = data.len() as i64 * i64::from(page_id);
        let fd = self.file.as_raw_fd();

        uio::pwrite(fd, data, offset)?;

        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn extend(&self, page_size: usize) -> Result<PageId> {
        let _guard = self.grow.lock().expect("disk lock poisoned");

        let len = self.file.metadata()?.len();
        let page_id = (len / page_size as u64) as PageId;

        let fd = self.file.as_raw_fd();
        let zeros = vec![0u8; page_size];
        uio::pwrite(fd, &zeros, len as i64)?;

        Ok(page_id)
    }
}

impl FileSystem {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;

        Ok(Self { file, grow: Mutex::new(()) })
    }
}

/// In-memory [`Disk`] used by tests, backed by a growable byte buffer.
pub struct Memory {
    buf: UnsafeCell<Vec<u8>>,
    size: Mutex<usize>,
}

unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Disk for Memory {
    fn read_page(&self, page_id: PageId, page_size: usize) -> Result<Vec<u8>> {
        let offset = page_size * page_id as usize;
        let buf = unsafe { &*self.buf.get() };
        let mut ret = vec![0u8; page_size];
        ret.copy_from_slice(&buf[offset..offset + page_size]);

        Ok(ret)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = data.len() * page_id as usize;
        let buf = unsafe { &mut *self.buf.get() };
        buf[offset..offset + data.len()].copy_from_slice(data);

        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(*self.size.lock().expect("memory lock poisoned") as u64)
    }

    fn extend(&self, page_size: usize) -> Result<PageId> {
        let mut size = self.size.lock().expect("memory lock poisoned");
        let page_id = (*size / page_size) as PageId;

        let buf = unsafe { &mut *self.buf.get() };
        buf.resize(*size + page_size, 0);
        *size += page_size;

        Ok(page_id)
    }
}

impl Memory {
    pub fn new() -> Self {
        Self { buf: UnsafeCell::new(Vec::new()), size: Mutex::new(0) }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
