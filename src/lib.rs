//! VenomDriver - single-writer media driver core
//!
//! A background driver multiplexes I/O for many publishers and subscribers
//! living in other processes. The payload travels through memory-mapped log
//! buffers; this crate owns how those buffers are created, handed out and
//! reclaimed, and how every thread asks for driver state to change.
//!
//! # Architecture
//!
//! - **Single Writer (Conductor)**: owns all driver state, drains commands,
//!   creates log buffers and unmaps them once lingering has expired
//! - **Many Producers (I/O and client threads)**: never touch driver state,
//!   they offer self-contained commands through a [`ConductorProxy`]
//! - **Command Queue**: bounded lock-free MPSC ring; a full queue drops the
//!   command and bumps a failure counter instead of blocking
//!
//! # Example
//!
//! ```no_run
//! use venom_driver::{Driver, DriverConfig};
//!
//! let driver = Driver::launch(DriverConfig::default())?;
//! let proxy = driver.proxy();
//! std::thread::spawn(move || {
//!     proxy.on_remove_publication_image(42);
//! });
//! let _conductor = driver.close()?;
//! # Ok::<(), venom_driver::DriverError>(())
//! ```

pub mod agent;
pub mod clock;
pub mod command;
pub mod conductor;
pub mod conductor_proxy;
pub mod config;
pub mod counters;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod idle;
pub mod image;
pub mod log_buffer;
pub mod mapped_file;
pub mod mpsc_queue;

pub use command::{DriverCommand, LogBufferId, Resource};
pub use conductor::{ConductorState, DriverConductor};
pub use conductor_proxy::{CommandSink, ConductorProxy, SharedConductor};
pub use config::{DriverConfig, ThreadingMode};
pub use counters::SystemCounters;
pub use driver::{Driver, SharedDriver};
pub use endpoint::EndpointId;
pub use error::{DriverError, Result};
pub use log_buffer::LogBuffer;
pub use mapped_file::MappedRegion;
