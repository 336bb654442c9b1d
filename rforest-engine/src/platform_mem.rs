//! An in-memory [`Platform`] used by the integration test suite so the same
//! `SampleStore`/`ResourceBase`/`PendingBuffer` code paths that drive
//! `StdPlatform` in production also run hermetically and fast, with no
//! temp-directory cleanup required.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use embedded_rforest::error::Error;
use embedded_rforest::platform::{
    FileHandle, FileMode, MemoryStatus, Platform, SeekFrom, StorageType,
};

#[derive(Default)]
struct MemFs {
    files: HashMap<String, Vec<u8>>,
}

pub struct MemPlatform {
    fs: Rc<RefCell<MemFs>>,
    clock_millis: AtomicU64,
    entropy: AtomicU64,
    dataset_cap: u64,
    infer_log_cap: u64,
    free_heap: AtomicU64,
}

impl MemPlatform {
    pub fn new() -> Self {
        MemPlatform {
            fs: Rc::new(RefCell::new(MemFs::default())),
            clock_millis: AtomicU64::new(0),
            entropy: AtomicU64::new(0xcafef00dd15ea5e5),
            dataset_cap: 64 * 1024 * 1024,
            infer_log_cap: 2 * 1024,
            free_heap: AtomicU64::new(256 * 1024),
        }
    }

    /// Flash-like profile: small on-device size caps, used by the inference
    /// log trim test scenario.
    pub fn new_flash() -> Self {
        let mut p = MemPlatform::new();
        p.infer_log_cap = 2 * 1024;
        p
    }

    pub fn new_sd() -> Self {
        let mut p = MemPlatform::new();
        p.infer_log_cap = 20 * 1024;
        p
    }

    /// Advance the simulated wall clock; used by pending-buffer timeout tests.
    pub fn advance_millis(&self, ms: u64) {
        self.clock_millis.fetch_add(ms, Ordering::Relaxed);
    }

    /// Simulate memory pressure for the low-heap forest-release abort path.
    pub fn set_free_heap(&self, bytes: u64) {
        self.free_heap.store(bytes, Ordering::Relaxed);
    }

    fn key(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }
}

impl Default for MemPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemPlatform {
    /// Shares the underlying in-memory filesystem (same `Rc`) so a second
    /// handle can scan/load whatever a first handle persisted — used by
    /// tests that construct a fresh `RandomForest` against files an earlier
    /// one wrote, the way a real process restart would reopen the same
    /// on-disk model directory.
    fn clone(&self) -> Self {
        MemPlatform {
            fs: self.fs.clone(),
            clock_millis: AtomicU64::new(self.clock_millis.load(Ordering::Relaxed)),
            entropy: AtomicU64::new(self.entropy.load(Ordering::Relaxed)),
            dataset_cap: self.dataset_cap,
            infer_log_cap: self.infer_log_cap,
            free_heap: AtomicU64::new(self.free_heap.load(Ordering::Relaxed)),
        }
    }
}

pub struct MemFileHandle {
    key: String,
    pos: u64,
    fs: Rc<RefCell<MemFs>>,
}

impl MemFileHandle {
    fn fs(&self) -> &RefCell<MemFs> {
        &self.fs
    }
}

impl FileHandle for MemFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let fs = self.fs().borrow();
        let data = fs.files.get(&self.key).ok_or(Error::Corrupt)?;
        let start = self.pos as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let mut fs = self.fs().borrow_mut();
        let data = fs.files.entry(self.key.clone()).or_default();
        let start = self.pos as usize;
        if start + buf.len() > data.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        let len = self.fs().borrow().files.get(&self.key).map(|d| d.len()).unwrap_or(0) as u64;
        let new_pos = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(n) => (self.pos as i64 + n).max(0) as u64,
            SeekFrom::End(n) => (len as i64 + n).max(0) as u64,
        };
        self.pos = new_pos;
        Ok(self.pos)
    }

    fn tell(&mut self) -> Result<u64, Error> {
        Ok(self.pos)
    }

    fn size(&mut self) -> Result<u64, Error> {
        Ok(self
            .fs()
            .borrow()
            .files
            .get(&self.key)
            .map(|d| d.len())
            .unwrap_or(0) as u64)
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl Platform for MemPlatform {
    type File = MemFileHandle;

    fn storage_type(&self) -> StorageType {
        StorageType::InternalFlash
    }

    fn exists(&self, path: &str) -> bool {
        self.fs.borrow().files.contains_key(&Self::key(path))
    }

    fn open(&self, path: &str, mode: FileMode) -> Result<Self::File, Error> {
        let key = Self::key(path);
        match mode {
            FileMode::Read => {
                if !self.fs.borrow().files.contains_key(&key) {
                    return Err(Error::Corrupt);
                }
                Ok(MemFileHandle {
                    key,
                    pos: 0,
                    fs: self.fs.clone(),
                })
            }
            FileMode::Write => {
                self.fs.borrow_mut().files.insert(key.clone(), Vec::new());
                Ok(MemFileHandle {
                    key,
                    pos: 0,
                    fs: self.fs.clone(),
                })
            }
            FileMode::Append => {
                let pos = {
                    let mut fs = self.fs.borrow_mut();
                    let data = fs.files.entry(key.clone()).or_default();
                    data.len() as u64
                };
                Ok(MemFileHandle {
                    key,
                    pos,
                    fs: self.fs.clone(),
                })
            }
            FileMode::ReadWrite => {
                self.fs.borrow_mut().files.entry(key.clone()).or_default();
                Ok(MemFileHandle {
                    key,
                    pos: 0,
                    fs: self.fs.clone(),
                })
            }
        }
    }

    fn remove(&self, path: &str) -> Result<(), Error> {
        self.fs
            .borrow_mut()
            .files
            .remove(&Self::key(path))
            .map(|_| ())
            .ok_or(Error::Corrupt)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let mut fs = self.fs.borrow_mut();
        let data = fs.files.remove(&Self::key(old_path)).ok_or(Error::Corrupt)?;
        fs.files.insert(Self::key(new_path), data);
        Ok(())
    }

    fn mkdir(&self, _path: &str) -> Result<(), Error> {
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, Error> {
        let prefix = Self::key(path);
        let prefix = if prefix.is_empty() {
            prefix
        } else {
            format!("{prefix}/")
        };
        Ok(self
            .fs
            .borrow()
            .files
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    fn total_bytes(&self) -> u64 {
        self.dataset_cap + self.infer_log_cap
    }

    fn used_bytes(&self) -> u64 {
        self.fs.borrow().files.values().map(|d| d.len() as u64).sum()
    }

    fn max_dataset_bytes(&self) -> u64 {
        self.dataset_cap
    }

    fn max_infer_log_bytes(&self) -> u64 {
        self.infer_log_cap
    }

    fn is_sd_based(&self) -> bool {
        self.infer_log_cap > 2 * 1024
    }

    fn millis(&self) -> u64 {
        self.clock_millis.load(Ordering::Relaxed)
    }

    fn micros(&self) -> u64 {
        self.millis() * 1000
    }

    fn random_entropy(&self) -> u64 {
        self.entropy.fetch_add(0x9e3779b97f4a7c15, Ordering::Relaxed)
    }

    fn cpu_cycles(&self) -> u64 {
        self.millis()
    }

    fn memory_status(&self) -> MemoryStatus {
        let free = self.free_heap.load(Ordering::Relaxed);
        MemoryStatus {
            free_heap: free,
            largest_block: free,
            total_heap: 512 * 1024,
        }
    }
}
