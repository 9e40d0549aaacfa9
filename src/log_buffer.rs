//! Log buffers: the shared-memory transport between a publisher and its subscribers
//!
//! # Layout
//!
//! ```text
//! +----------------+----------------+----------------+-----------+
//! | term 0         | term 1         | term 2         | meta data |
//! +----------------+----------------+----------------+-----------+
//!  term_length      term_length      term_length      4096
//! ```
//!
//! The file length is rounded up to the page size. The term length is
//! recovered from the file length when a client maps an existing log.

use crate::error::{DriverError, Result};
use crate::mapped_file::{page_size, MappedRegion};
use std::path::Path;
use std::sync::atomic::Ordering;

pub const PARTITION_COUNT: usize = 3;
pub const TERM_MIN_LENGTH: usize = 64 * 1024;
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;
pub const FRAME_ALIGNMENT: usize = 32;
pub const MAX_UDP_PAYLOAD_LENGTH: usize = 65504;
pub const LOG_META_DATA_LENGTH: usize = 4096;

// Meta data field offsets, relative to the start of the meta data section
const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
const ACTIVE_TERM_COUNT_OFFSET: usize = 24;
const CORRELATION_ID_OFFSET: usize = 256;
const INITIAL_TERM_ID_OFFSET: usize = 264;
const MTU_LENGTH_OFFSET: usize = 272;
const TERM_LENGTH_OFFSET: usize = 276;
const PAGE_SIZE_OFFSET: usize = 280;

/// Parameters for a new log buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogBufferParams {
    pub correlation_id: i64,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub term_offset: i32,
    pub term_length: usize,
    pub mtu_length: usize,
}

impl LogBufferParams {
    pub fn validate(&self) -> Result<()> {
        check_term_length(self.term_length)?;
        check_mtu_length(self.mtu_length, self.term_length)?;
        check_term_offset(self.term_offset, self.term_length)
    }
}

pub fn check_term_length(term_length: usize) -> Result<()> {
    if !term_length.is_power_of_two()
        || !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length)
    {
        return Err(DriverError::InvalidTermLength(term_length));
    }
    Ok(())
}

pub fn check_mtu_length(mtu: usize, term_length: usize) -> Result<()> {
    if mtu < FRAME_ALIGNMENT
        || mtu > MAX_UDP_PAYLOAD_LENGTH
        || mtu % FRAME_ALIGNMENT != 0
        || mtu > term_length
    {
        return Err(DriverError::InvalidMtu { mtu, term_length });
    }
    Ok(())
}

pub fn check_term_offset(offset: i32, term_length: usize) -> Result<()> {
    let invalid = DriverError::InvalidTermOffset {
        offset: offset.max(0) as usize,
        term_length,
    };
    if offset < 0 {
        return Err(invalid);
    }
    let offset = offset as usize;
    if offset >= term_length || offset % FRAME_ALIGNMENT != 0 {
        return Err(invalid);
    }
    Ok(())
}

/// Total file length for a log with the given term length
pub fn compute_log_length(term_length: usize) -> usize {
    let length = PARTITION_COUNT * term_length + LOG_META_DATA_LENGTH;
    let page = page_size();
    (length + page - 1) & !(page - 1)
}

/// Term length implied by a log file length
fn term_length_from_log_length(log_length: usize) -> usize {
    let upper = log_length.saturating_sub(LOG_META_DATA_LENGTH) / PARTITION_COUNT;
    if upper == 0 {
        return 0;
    }
    // Page padding never reaches a whole term, so the term is the largest
    // power of two that fits
    1 << (usize::BITS - 1 - upper.leading_zeros())
}

#[inline]
fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as u32 as i64)
}

/// A mapped log buffer
pub struct LogBuffer {
    region: std::mem::ManuallyDrop<MappedRegion>,
    term_length: usize,
    delete_on_drop: bool,
}

impl LogBuffer {
    /// Create and initialise a log buffer file at `path`
    ///
    /// The file is removed again when the returned buffer is dropped.
    pub fn create(path: impl AsRef<Path>, params: LogBufferParams) -> Result<Self> {
        params.validate()?;
        let term_length = params.term_length;
        let region = MappedRegion::create_new(path, 0, compute_log_length(term_length))?;

        let log = Self {
            region: std::mem::ManuallyDrop::new(region),
            term_length,
            delete_on_drop: true,
        };

        let meta = log.meta_data_offset();
        let region = &*log.region;
        region.put_i64(meta + CORRELATION_ID_OFFSET, params.correlation_id)?;
        region.put_i32(meta + INITIAL_TERM_ID_OFFSET, params.initial_term_id)?;
        region.put_i32(meta + MTU_LENGTH_OFFSET, params.mtu_length as i32)?;
        region.put_i32(meta + TERM_LENGTH_OFFSET, term_length as i32)?;
        region.put_i32(meta + PAGE_SIZE_OFFSET, page_size() as i32)?;

        let term_count = params.active_term_id.wrapping_sub(params.initial_term_id);
        let active_index = term_count.rem_euclid(PARTITION_COUNT as i32) as usize;
        for partition in 0..PARTITION_COUNT {
            let behind = (active_index + PARTITION_COUNT - partition) % PARTITION_COUNT;
            let tail = if behind == 0 {
                pack_tail(params.active_term_id, params.term_offset)
            } else {
                // Older terms, already rotated past
                let term_id = params
                    .active_term_id
                    .wrapping_sub(PARTITION_COUNT as i32)
                    .wrapping_add((PARTITION_COUNT - behind) as i32);
                pack_tail(term_id, 0)
            };
            region.put_i64(meta + TERM_TAIL_COUNTERS_OFFSET + partition * 8, tail)?;
        }
        region.put_i32(meta + ACTIVE_TERM_COUNT_OFFSET, term_count)?;

        Ok(log)
    }

    /// Map an existing log buffer created by a driver
    pub fn map_existing(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let region = MappedRegion::map_existing(path, 0, 0, read_only)?;
        let term_length = term_length_from_log_length(region.memory_size());
        check_term_length(term_length)?;

        let log = Self {
            region: std::mem::ManuallyDrop::new(region),
            term_length,
            delete_on_drop: false,
        };

        let stored = log.region.get_i32(log.meta_data_offset() + TERM_LENGTH_OFFSET)?;
        if stored as usize != term_length {
            return Err(DriverError::InvalidTermLength(stored.max(0) as usize));
        }
        Ok(log)
    }

    #[inline]
    fn meta_data_offset(&self) -> usize {
        PARTITION_COUNT * self.term_length
    }

    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    pub fn path(&self) -> &Path {
        self.region.path()
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn correlation_id(&self) -> Result<i64> {
        self.region
            .get_i64(self.meta_data_offset() + CORRELATION_ID_OFFSET)
    }

    pub fn initial_term_id(&self) -> Result<i32> {
        self.region
            .get_i32(self.meta_data_offset() + INITIAL_TERM_ID_OFFSET)
    }

    pub fn mtu_length(&self) -> Result<usize> {
        let mtu = self.region.get_i32(self.meta_data_offset() + MTU_LENGTH_OFFSET)?;
        Ok(mtu.max(0) as usize)
    }

    pub fn page_size(&self) -> Result<usize> {
        let page = self.region.get_i32(self.meta_data_offset() + PAGE_SIZE_OFFSET)?;
        Ok(page.max(0) as usize)
    }

    pub fn active_term_count(&self) -> Result<i32> {
        self.region
            .get_i32(self.meta_data_offset() + ACTIVE_TERM_COUNT_OFFSET)
    }

    pub fn active_partition_index(&self) -> Result<usize> {
        Ok(self
            .active_term_count()?
            .rem_euclid(PARTITION_COUNT as i32) as usize)
    }

    /// Packed `(term_id << 32) | term_offset` tail of a partition
    pub fn raw_tail(&self, partition: usize) -> Result<i64> {
        if partition >= PARTITION_COUNT {
            return Err(DriverError::OutOfBounds {
                offset: partition,
                len: 1,
                size: PARTITION_COUNT,
            });
        }
        let offset = self.meta_data_offset() + TERM_TAIL_COUNTERS_OFFSET + partition * 8;
        Ok(self.region.atomic_i64(offset)?.load(Ordering::Acquire))
    }

    /// Pointer/length snapshot for I/O threads
    pub fn view(&self) -> LogBufferView {
        LogBufferView {
            base: self.region.memory_ptr(),
            length: self.region.memory_size(),
            term_length: self.term_length,
        }
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffer")
            .field("path", &self.region.path())
            .field("term_length", &self.term_length)
            .finish()
    }
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        let path = self.region.path().to_path_buf();
        // SAFETY: the region is dropped exactly once, here
        unsafe { std::mem::ManuallyDrop::drop(&mut self.region) };

        if self.delete_on_drop {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete log buffer file");
            }
        }
    }
}

/// Raw view of a log buffer held by an I/O thread
///
/// Valid until the conductor reclaims the buffer, which happens no sooner
/// than the linger timeout after the buffer was retired. Holders must drop
/// the view within one of their own duty cycles of observing the retirement.
#[derive(Debug, Clone, Copy)]
pub struct LogBufferView {
    base: *mut u8,
    length: usize,
    term_length: usize,
}

// SAFETY: the view is a plain address range; lifetime is governed by lingering
unsafe impl Send for LogBufferView {}
unsafe impl Sync for LogBufferView {}

impl LogBufferView {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// Start of a term buffer
    pub fn term_ptr(&self, partition: usize) -> Option<*mut u8> {
        if partition >= PARTITION_COUNT {
            return None;
        }
        // SAFETY: partition < PARTITION_COUNT keeps the offset inside the mapping
        Some(unsafe { self.base.add(partition * self.term_length) })
    }

    pub fn meta_data_ptr(&self) -> *mut u8 {
        // SAFETY: the meta data section always follows the terms
        unsafe { self.base.add(PARTITION_COUNT * self.term_length) }
    }
}
