//! Channel endpoints and name resolution

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};

/// Conductor-assigned endpoint handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Sends to a destination address
    Send,
    /// Receives data and sends control messages to a control address
    Receive,
}

/// Endpoint state owned by the conductor
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) id: EndpointId,
    pub(crate) kind: EndpointKind,
    pub(crate) name: String,
    pub(crate) address: SocketAddr,
}

impl Endpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Name the address was resolved from, e.g. `"host:40123"`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destination for send endpoints, control address for receive endpoints
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

/// Turns an endpoint name into an address
///
/// Resolution runs on the conductor thread inside its duty cycle, so an
/// implementation must answer without blocking. Deployments that resolve
/// host names should plug in a cache refreshed off-thread.
pub trait NameResolver: Send {
    fn resolve(&self, name: &str) -> io::Result<SocketAddr>;
}

/// Resolver backed by the system's `host:port` lookup
///
/// Literal `ip:port` names never touch the network. Any other name goes
/// through a blocking DNS query, which stalls the conductor for its duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl NameResolver for SystemResolver {
    fn resolve(&self, name: &str) -> io::Result<SocketAddr> {
        if let Ok(address) = name.parse::<SocketAddr>() {
            return Ok(address);
        }
        name.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address for '{name}'"),
            )
        })
    }
}

/// Fixed name table; clones share entries so a test can change them later
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, addr: SocketAddr) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(name.into(), addr);
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(name);
        }
    }
}

impl NameResolver for StaticResolver {
    fn resolve(&self, name: &str) -> io::Result<SocketAddr> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "resolver table poisoned"))?;
        entries.get(name).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address for '{name}'"),
            )
        })
    }
}
