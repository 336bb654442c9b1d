//! The capability set the engine needs from its host: a filesystem, a
//! clock, and entropy sources. Ported from the PAL headers
//! (`eml_fs.h`/`eml_time.h`/`eml_random.h`/`eml_memory.h`) as a single trait
//! rather than free functions bound to a global instance — callers pass a
//! `&P: Platform` explicitly, so nothing here depends on a process-wide
//! singleton.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageType {
    InternalFlash,
    InternalFat,
    SdSpi,
    SdMmc1Bit,
    SdMmc4Bit,
    HostFs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryStatus {
    pub free_heap: u64,
    pub largest_block: u64,
    pub total_heap: u64,
}

/// A handle to an open file. Implementations may wrap a real `std::fs::File`
/// (host/`StdPlatform`) or a flash/SD driver handle.
pub trait FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error>;
    fn tell(&mut self) -> Result<u64, Error>;
    fn size(&mut self) -> Result<u64, Error>;
    fn flush(&mut self) -> Result<(), Error>;

    /// Read exactly `buf.len()` bytes or fail; the binary formats in this
    /// crate never tolerate a short read.
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<(), Error> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(Error::Corrupt);
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), Error> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(Error::Corrupt);
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// Filesystem, clock, and entropy capabilities. One concrete implementation
/// is provided by `rforest-engine::platform_std::StdPlatform`; tests use an
/// in-memory implementation so the same code path runs hermetically.
pub trait Platform {
    type File: FileHandle;

    fn storage_type(&self) -> StorageType;
    fn exists(&self, path: &str) -> bool;
    fn open(&self, path: &str, mode: FileMode) -> Result<Self::File, Error>;
    fn remove(&self, path: &str) -> Result<(), Error>;
    fn rename(&self, old_path: &str, new_path: &str) -> Result<(), Error>;
    fn mkdir(&self, path: &str) -> Result<(), Error>;
    fn list_dir(&self, path: &str) -> Result<Vec<String>, Error>;

    fn total_bytes(&self) -> u64;
    fn used_bytes(&self) -> u64;
    fn max_dataset_bytes(&self) -> u64;
    fn max_infer_log_bytes(&self) -> u64;
    fn is_sd_based(&self) -> bool;

    fn millis(&self) -> u64;
    fn micros(&self) -> u64;

    fn random_entropy(&self) -> u64;
    fn cpu_cycles(&self) -> u64;

    fn memory_status(&self) -> MemoryStatus;
}
