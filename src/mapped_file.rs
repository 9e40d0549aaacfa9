//! Portable file-backed shared memory mappings
//!
//! A [`MappedRegion`] is the transport medium between the driver and client
//! processes: the file at an agreed path is the handle, its length decides
//! what later `map_existing` calls see, and new regions always read as zero.

use crate::error::{DriverError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate, open, Mode, OFlags};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Platform page size, queried once per process
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(rustix::param::page_size)
}

/// Size of the file at `path` without mapping it
pub fn file_size(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let stat = rustix::fs::stat(path).map_err(|e| DriverError::io(path, e))?;
    Ok(stat.st_size as u64)
}

/// Handle to a mapped window of a file
///
/// Not `Clone`: two owners would unmap the same range twice. Moving the
/// handle transfers ownership of the mapping.
pub struct MappedRegion {
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    offset: u64,
    read_only: bool,
    path: PathBuf,
}

// SAFETY: the region is plain shared memory; concurrent access to its bytes
// is coordinated by the layout that lives inside it, not by this handle
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Create (or truncate) the file at `path` and map `length` bytes at `offset`
    ///
    /// The file is resized to exactly `offset + length` bytes and the mapped
    /// window is explicitly zero-filled before mapping. The file is left on
    /// disk if a later step fails.
    pub fn create_new(path: impl AsRef<Path>, offset: u64, length: usize) -> Result<Self> {
        let path = path.as_ref();
        check_alignment(offset)?;
        if length == 0 {
            return Err(DriverError::EmptyMapping {
                path: path.to_path_buf(),
            });
        }

        let fd = open(
            path,
            OFlags::CREATE | OFlags::RDWR | OFlags::CLOEXEC,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH,
        )
        .map_err(|e| DriverError::io(path, e))?;

        // Grow to the full extent, never shrink what other mappings may use
        let end = offset + length as u64;
        let file_len = fstat(&fd).map_err(|e| DriverError::io(path, e))?.st_size as u64;
        if file_len < end {
            ftruncate(&fd, end).map_err(|e| DriverError::io(path, e))?;
        }
        zero_fill(&fd, offset, length).map_err(|e| DriverError::io(path, e))?;

        Self::map(fd, path, offset, length, false)
    }

    /// Map an existing file
    ///
    /// A `length` of zero maps everything from `offset` to the end of the file.
    pub fn map_existing(
        path: impl AsRef<Path>,
        offset: u64,
        length: usize,
        read_only: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        check_alignment(offset)?;

        let flags = if read_only { OFlags::RDONLY } else { OFlags::RDWR };
        let fd = open(path, flags | OFlags::CLOEXEC, Mode::empty())
            .map_err(|e| DriverError::io(path, e))?;

        let file_len = fstat(&fd).map_err(|e| DriverError::io(path, e))?.st_size as u64;
        let length = if length == 0 {
            if offset >= file_len {
                return Err(DriverError::OffsetOutOfRange {
                    path: path.to_path_buf(),
                    offset,
                    file_len,
                });
            }
            (file_len - offset) as usize
        } else if offset.saturating_add(length as u64) > file_len {
            return Err(DriverError::OffsetOutOfRange {
                path: path.to_path_buf(),
                offset: offset.saturating_add(length as u64),
                file_len,
            });
        } else {
            length
        };

        if length == 0 {
            return Err(DriverError::EmptyMapping {
                path: path.to_path_buf(),
            });
        }

        Self::map(fd, path, offset, length, read_only)
    }

    /// Map the whole of an existing file read-only
    pub fn map_existing_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::map_existing(path, 0, 0, true)
    }

    fn map(fd: OwnedFd, path: &Path, offset: u64, length: usize, read_only: bool) -> Result<Self> {
        let prot = if read_only {
            ProtFlags::READ
        } else {
            ProtFlags::READ | ProtFlags::WRITE
        };

        // SAFETY: a fresh shared mapping chosen by the kernel aliases no Rust object
        let addr = unsafe {
            mmap(std::ptr::null_mut(), length, prot, MapFlags::SHARED, &fd, offset).map_err(
                |e| DriverError::Mmap {
                    path: path.to_path_buf(),
                    source: e.into(),
                },
            )?
        };

        let addr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| DriverError::Mmap {
            path: path.to_path_buf(),
            source: Errno::NOMEM.into(),
        })?;

        Ok(Self {
            fd,
            addr,
            size: length,
            offset,
            read_only,
            path: path.to_path_buf(),
        })
    }

    /// Base address of the mapping
    ///
    /// Writing through the pointer of a read-only region faults.
    #[inline(always)]
    pub fn memory_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Number of mapped bytes
    #[inline(always)]
    pub fn memory_size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[inline(always)]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the region
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: range checked above; the mapping outlives this borrow
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.addr.as_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `data` into the region starting at `offset`
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(DriverError::ReadOnly {
                path: self.path.clone(),
            });
        }
        self.check_range(offset, data.len())?;
        // SAFETY: range checked above and the mapping is writable
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.addr.as_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    pub fn get_i32(&self, offset: usize) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn put_i32(&self, offset: usize, value: i32) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub fn get_i64(&self, offset: usize) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn put_i64(&self, offset: usize, value: i64) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// View an aligned 8-byte field as an atomic shared with other mappings
    ///
    /// Stores through the returned reference fault on a read-only region.
    pub fn atomic_i64(&self, offset: usize) -> Result<&AtomicI64> {
        self.check_range(offset, 8)?;
        if offset % std::mem::align_of::<AtomicI64>() != 0 {
            return Err(DriverError::OutOfBounds {
                offset,
                len: 8,
                size: self.size,
            });
        }
        // SAFETY: in range, 8-byte aligned (the base is page aligned), and
        // the reference cannot outlive the mapping
        Ok(unsafe { &*(self.addr.as_ptr().add(offset) as *const AtomicI64) })
    }

    /// Ordered store of an i64 field, for values other mappings poll
    pub fn put_i64_ordered(&self, offset: usize, value: i64) -> Result<()> {
        if self.read_only {
            return Err(DriverError::ReadOnly {
                path: self.path.clone(),
            });
        }
        self.atomic_i64(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(DriverError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // Unmap before the fd field closes
        // SAFETY: addr/size came from a successful mmap owned by this handle
        if let Err(e) = unsafe { munmap(self.addr.as_ptr().cast(), self.size) } {
            tracing::warn!(path = %self.path.display(), error = %e, "munmap failed");
        }
    }
}

fn check_alignment(offset: u64) -> Result<()> {
    let page_size = page_size();
    if offset % page_size as u64 != 0 {
        return Err(DriverError::Alignment { offset, page_size });
    }
    Ok(())
}

/// Write zeros over `[offset, offset + length)` so the pages are allocated now
fn zero_fill(fd: &OwnedFd, offset: u64, length: usize) -> std::io::Result<()> {
    let zeros = vec![0u8; page_size().min(length)];
    let end = offset + length as u64;
    let mut pos = offset;

    while pos < end {
        let chunk = zeros.len().min((end - pos) as usize);
        match rustix::io::pwrite(fd, &zeros[..chunk], pos) {
            Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Ok(n) => pos += n as u64,
            Err(Errno::INTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
