//! Error types for the driver core

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur in driver operations
///
/// A full command queue is deliberately absent: `offer` reports it through
/// its return value and the proxy's failure counter.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Failed to create, open or resize a backing file
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map '{}': {source}", path.display())]
    Mmap {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Backing file does not exist
    #[error("File not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// Mapping offset is not a multiple of the page size
    #[error("Offset {offset} is not aligned to page size {page_size}")]
    Alignment { offset: u64, page_size: usize },

    /// Mapping would cover zero bytes
    #[error("Cannot map zero bytes of '{}'", path.display())]
    EmptyMapping { path: PathBuf },

    /// Mapping window starts or ends beyond the end of the file
    #[error("Offset {offset} is beyond the end of '{}' ({file_len} bytes)", path.display())]
    OffsetOutOfRange {
        path: PathBuf,
        offset: u64,
        file_len: u64,
    },

    /// Accessor reached outside the mapped range
    #[error("Access out of bounds: offset {offset} + {len} > {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Write attempted through a read-only mapping
    #[error("Region '{}' is mapped read-only", path.display())]
    ReadOnly { path: PathBuf },

    /// Term length is not a power of two within bounds
    #[error("Invalid term length: {0}")]
    InvalidTermLength(usize),

    /// MTU is not frame aligned or out of bounds
    #[error("Invalid MTU length {mtu} for term length {term_length}")]
    InvalidMtu { mtu: usize, term_length: usize },

    /// Term offset is not frame aligned or beyond the term
    #[error("Invalid term offset {offset} for term length {term_length}")]
    InvalidTermOffset { offset: usize, term_length: usize },

    /// Conductor rejected a command whose referenced state is missing or inconsistent
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to spawn an agent thread
    #[error("Failed to spawn agent thread: {0}")]
    AgentSpawn(#[source] io::Error),

    /// Agent thread panicked
    #[error("Agent '{0}' panicked")]
    AgentPanicked(String),
}

impl DriverError {
    /// Wrap a syscall error for `path`, mapping `ENOENT` to [`DriverError::NotFound`]
    pub(crate) fn io(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        let source = source.into();
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            DriverError::NotFound { path }
        } else {
            DriverError::Io { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enoent_maps_to_not_found() {
        let err = DriverError::io("/nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, DriverError::NotFound { .. }));

        let err = DriverError::io("/nope", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, DriverError::Io { .. }));
    }
}
