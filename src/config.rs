//! Driver configuration

use crate::error::{DriverError, Result};
use crate::idle::IdleStrategy;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of command queue slots
const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Default number of commands applied per duty cycle
const DEFAULT_COMMAND_DRAIN_LIMIT: usize = 10;

/// Default grace period before a retired resource is unmapped
const DEFAULT_LINGER_TIMEOUT: Duration = Duration::from_secs(5);

/// How the conductor duty cycle is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// Conductor owns a thread; every other thread goes through the queue
    Dedicated,
    /// Conductor runs on the caller's thread and proxies may invoke it directly
    Shared,
}

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Directory holding log buffer files
    pub dir: PathBuf,
    /// Number of command queue slots (rounded up to a power of two)
    pub command_queue_capacity: usize,
    /// Maximum commands applied per duty cycle
    pub command_drain_limit: usize,
    /// Grace period between retiring a resource and unmapping it.
    ///
    /// Must exceed the longest duty cycle of any thread that may still hold
    /// a pointer into the resource.
    pub linger_timeout: Duration,
    pub dir_delete_on_start: bool,
    pub dir_delete_on_shutdown: bool,
    pub idle_strategy: IdleStrategy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            command_drain_limit: DEFAULT_COMMAND_DRAIN_LIMIT,
            linger_timeout: DEFAULT_LINGER_TIMEOUT,
            dir_delete_on_start: false,
            dir_delete_on_shutdown: false,
            idle_strategy: IdleStrategy::default(),
        }
    }
}

impl DriverConfig {
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    pub fn with_command_drain_limit(mut self, limit: usize) -> Self {
        self.command_drain_limit = limit;
        self
    }

    pub fn with_linger_timeout(mut self, timeout: Duration) -> Self {
        self.linger_timeout = timeout;
        self
    }

    pub fn with_dir_delete_on_start(mut self, delete: bool) -> Self {
        self.dir_delete_on_start = delete;
        self
    }

    pub fn with_dir_delete_on_shutdown(mut self, delete: bool) -> Self {
        self.dir_delete_on_shutdown = delete;
        self
    }

    pub fn with_idle_strategy(mut self, strategy: IdleStrategy) -> Self {
        self.idle_strategy = strategy;
        self
    }

    /// Directory holding publication image log buffers
    pub fn images_dir(&self) -> PathBuf {
        self.dir.join("images")
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_queue_capacity == 0 {
            return Err(DriverError::InvalidConfig(
                "command_queue_capacity must be non-zero".into(),
            ));
        }
        if self.command_drain_limit == 0 {
            return Err(DriverError::InvalidConfig(
                "command_drain_limit must be non-zero".into(),
            ));
        }
        if self.linger_timeout.is_zero() {
            return Err(DriverError::InvalidConfig(
                "linger_timeout must be non-zero".into(),
            ));
        }
        if self.linger_timeout <= self.idle_strategy.max_pause() {
            return Err(DriverError::InvalidConfig(format!(
                "linger_timeout {:?} must exceed the idle pause {:?}",
                self.linger_timeout,
                self.idle_strategy.max_pause()
            )));
        }
        if self.dir.as_os_str().is_empty() {
            return Err(DriverError::InvalidConfig("dir must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn default_dir() -> PathBuf {
    PathBuf::from("/dev/shm/venom-driver")
}

#[cfg(not(target_os = "linux"))]
fn default_dir() -> PathBuf {
    std::env::temp_dir().join("venom-driver")
}
