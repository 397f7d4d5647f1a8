use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::types::checksum::image_crc32;
use crate::types::{ArborError, PageAddr, Result};

/// Magic written at the start of every file-backed store.
pub const STORE_MAGIC: [u8; 8] = *b"ARBRSTOR";

/// Append-only home for durable page images.
///
/// Images are immutable once written; the returned [`PageAddr`] is the only
/// way to find them again. Nothing is ever overwritten, so images orphaned by
/// a failed load simply stay behind until the store is rebuilt.
pub trait PageStore: Send + Sync + 'static {
    /// Appends `image` and returns where it landed.
    fn write_image(&self, image: &[u8]) -> Result<PageAddr>;
    /// Reads the image at `addr`, verifying its checksum when enabled.
    fn read_image(&self, addr: PageAddr) -> Result<Bytes>;
    /// Flushes written images to durable storage.
    fn sync(&self) -> Result<()>;
    /// Returns a snapshot of store statistics.
    fn stats(&self) -> StoreStats;

    /// Enables or disables checksum verification on image reads.
    fn set_checksum_verification(&self, enabled: bool) {
        let _ = enabled;
    }

    /// Returns whether checksum verification is enabled.
    fn checksum_verification_enabled(&self) -> bool {
        true
    }
}

/// Point-in-time store counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreStats {
    /// Images appended to the store.
    pub images_written: u64,
    /// Bytes appended to the store.
    pub bytes_written: u64,
    /// Images read back.
    pub images_read: u64,
    /// Reads rejected because the checksum did not match.
    pub checksum_failures: u64,
}

#[derive(Default)]
struct StoreCounters {
    images_written: AtomicU64,
    bytes_written: AtomicU64,
    images_read: AtomicU64,
    checksum_failures: AtomicU64,
}

impl StoreCounters {
    fn record_write(&self, len: usize) {
        self.images_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            images_written: self.images_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            images_read: self.images_read.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
        }
    }
}

fn image_addr(offset: u64, image: &[u8]) -> Result<PageAddr> {
    let size = u32::try_from(image.len()).map_err(|_| ArborError::Invalid("page image exceeds u32"))?;
    Ok(PageAddr {
        offset,
        size,
        checksum: image_crc32(offset, image),
    })
}

fn verify_image(counters: &StoreCounters, verify: bool, addr: PageAddr, image: &[u8]) -> Result<()> {
    counters.images_read.fetch_add(1, Ordering::Relaxed);
    if verify && image_crc32(addr.offset, image) != addr.checksum {
        counters.checksum_failures.fetch_add(1, Ordering::Relaxed);
        warn!(offset = addr.offset, size = addr.size, "page image checksum mismatch");
        return Err(ArborError::Corruption("page image checksum mismatch"));
    }
    Ok(())
}

/// In-memory page store, for tests and ephemeral trees.
pub struct MemStore {
    data: Mutex<Vec<u8>>,
    verify: AtomicBool,
    counters: StoreCounters,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            verify: AtomicBool::new(true),
            counters: StoreCounters::default(),
        }
    }

    /// Total bytes held by the store.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flips one byte of the stored data; used to exercise checksum failures.
    #[cfg(test)]
    pub(crate) fn corrupt_byte(&self, offset: usize) {
        let mut data = self.data.lock();
        if let Some(byte) = data.get_mut(offset) {
            *byte ^= 0xFF;
        }
    }
}

impl PageStore for MemStore {
    fn write_image(&self, image: &[u8]) -> Result<PageAddr> {
        let mut data = self.data.lock();
        let addr = image_addr(data.len() as u64, image)?;
        data.extend_from_slice(image);
        self.counters.record_write(image.len());
        trace!(offset = addr.offset, size = addr.size, "mem store image written");
        Ok(addr)
    }

    fn read_image(&self, addr: PageAddr) -> Result<Bytes> {
        let data = self.data.lock();
        let start = usize::try_from(addr.offset).map_err(|_| ArborError::Invalid("offset exceeds usize"))?;
        let end = start
            .checked_add(addr.size as usize)
            .ok_or(ArborError::Invalid("page address overflows"))?;
        let image = data
            .get(start..end)
            .ok_or(ArborError::Corruption("page address beyond store"))?;
        verify_image(&self.counters, self.verify.load(Ordering::Relaxed), addr, image)?;
        Ok(Bytes::copy_from_slice(image))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    fn set_checksum_verification(&self, enabled: bool) {
        self.verify.store(enabled, Ordering::Relaxed);
    }

    fn checksum_verification_enabled(&self) -> bool {
        self.verify.load(Ordering::Relaxed)
    }
}

struct FileState {
    file: File,
    len: u64,
}

/// Page store backed by a single append-only file.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
    verify: AtomicBool,
    counters: StoreCounters,
}

impl FileStore {
    /// Creates a new store at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&STORE_MAGIC)?;
        Ok(Self::from_parts(path, file, STORE_MAGIC.len() as u64))
    }

    /// Opens an existing store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        let mut magic = [0u8; STORE_MAGIC.len()];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut magic).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => ArborError::Corruption("store file shorter than header"),
            _ => ArborError::Io(err),
        })?;
        if magic != STORE_MAGIC {
            return Err(ArborError::Corruption("invalid store magic"));
        }
        Ok(Self::from_parts(path, file, len))
    }

    fn from_parts(path: PathBuf, file: File, len: u64) -> Self {
        Self {
            path,
            state: Mutex::new(FileState { file, len }),
            verify: AtomicBool::new(true),
            counters: StoreCounters::default(),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the backing file in bytes.
    pub fn len(&self) -> u64 {
        self.state.lock().len
    }

    /// True if the store holds no images.
    pub fn is_empty(&self) -> bool {
        self.len() <= STORE_MAGIC.len() as u64
    }
}

impl PageStore for FileStore {
    fn write_image(&self, image: &[u8]) -> Result<PageAddr> {
        let mut state = self.state.lock();
        let addr = image_addr(state.len, image)?;
        state.file.seek(SeekFrom::Start(addr.offset))?;
        state.file.write_all(image)?;
        state.len += image.len() as u64;
        self.counters.record_write(image.len());
        trace!(offset = addr.offset, size = addr.size, path = %self.path.display(), "file store image written");
        Ok(addr)
    }

    fn read_image(&self, addr: PageAddr) -> Result<Bytes> {
        let mut state = self.state.lock();
        let end = addr
            .offset
            .checked_add(addr.size as u64)
            .ok_or(ArborError::Invalid("page address overflows"))?;
        if addr.offset < STORE_MAGIC.len() as u64 || end > state.len {
            return Err(ArborError::Corruption("page address beyond store"));
        }
        let mut image = vec![0u8; addr.size as usize];
        state.file.seek(SeekFrom::Start(addr.offset))?;
        state.file.read_exact(&mut image)?;
        drop(state);
        verify_image(&self.counters, self.verify.load(Ordering::Relaxed), addr, &image)?;
        Ok(Bytes::from(image))
    }

    fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        state.file.sync_data()?;
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    fn set_checksum_verification(&self, enabled: bool) {
        self.verify.store(enabled, Ordering::Relaxed);
    }

    fn checksum_verification_enabled(&self) -> bool {
        self.verify.load(Ordering::Relaxed)
    }
}
