// storage/src/file/mod.rs

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

/// Positioned access to a file of fixed-size blocks.
///
/// Offsets are absolute from the start of the file and 32 bits wide, matching
/// the on-disk format. Writes are not guaranteed durable until
/// [`commit_write`](BlockFile::commit_write) returns.
pub trait BlockFile {
    /// Fill as much of `buf` as the file holds at `offset`, returning the
    /// number of bytes read. A short count means end of file.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<usize>;

    fn write_at(&mut self, offset: u32, buf: &[u8]) -> io::Result<()>;

    fn commit_write(&mut self) -> io::Result<()>;

    /// Current physical length of the file.
    fn len(&mut self) -> io::Result<u32>;

    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A [`BlockFile`] on the local filesystem.
pub struct DiskFile {
    file: File,
    sync: bool,
}

impl DiskFile {
    /// Open `path` for reading and writing, creating it empty if missing.
    pub fn open_or_create(path: &Path, sync: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self { file, sync })
    }

    pub fn open(path: &Path, sync: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, sync })
    }
}

impl BlockFile for DiskFile {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(u64::from(offset)))?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }

    fn write_at(&mut self, offset: u32, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(u64::from(offset)))?;
        self.file.write_all(buf)
    }

    fn commit_write(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn len(&mut self) -> io::Result<u32> {
        let len = self.file.metadata()?.len();
        u32::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file length {len} exceeds 32-bit offsets"),
            )
        })
    }
}

/// An in-memory [`BlockFile`].
///
/// Clones share the same buffer, so dropping one handle and "reopening" from
/// another sees everything written so far. Single-threaded by construction.
#[derive(Debug, Clone, Default)]
pub struct MemFile {
    data: Rc<RefCell<Vec<u8>>>,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Rc::new(RefCell::new(bytes)),
        }
    }

    /// Snapshot of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// Cut the buffer down to `len` bytes, as a torn append would.
    pub fn truncate(&self, len: usize) {
        self.data.borrow_mut().truncate(len);
    }
}

impl BlockFile for MemFile {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }

        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u32, buf: &[u8]) -> io::Result<()> {
        let mut data = self.data.borrow_mut();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn commit_write(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn len(&mut self) -> io::Result<u32> {
        let len = self.data.borrow().len();
        u32::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "buffer exceeds 4 GiB"))
    }
}
