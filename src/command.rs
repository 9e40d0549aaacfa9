//! Command records carried from producer threads to the conductor
//!
//! Every record is a self-contained snapshot: the producer may change or
//! exit right after the offer, so nothing here borrows producer state.

use crate::endpoint::EndpointId;
use crate::mapped_file::MappedRegion;
use std::net::SocketAddr;

/// Conductor-assigned log buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogBufferId(pub i64);

impl std::fmt::Display for LogBufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log-buffer-{}", self.0)
    }
}

/// A new inbound stream was seen by a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePublicationImage {
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub term_offset: i32,
    pub term_length: usize,
    pub mtu_length: usize,
    pub control_address: SocketAddr,
    pub source_address: SocketAddr,
    pub endpoint: EndpointId,
}

/// An endpoint's peer address may have changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReResolve {
    pub endpoint_name: String,
    pub endpoint: EndpointId,
    pub existing_addr: SocketAddr,
}

/// Something to retire through the lingering list
#[derive(Debug)]
pub enum Resource {
    /// Log buffer owned by the conductor
    LogBuffer(LogBufferId),
    /// Mapping handed over by a raw mapping client
    Region(MappedRegion),
}

/// State mutation requested of the conductor
#[derive(Debug)]
pub enum DriverCommand {
    CreatePublicationImage(CreatePublicationImage),
    RemovePublicationImage { correlation_id: i64 },
    /// Re-resolve a send endpoint's destination
    ReResolveEndpoint(ReResolve),
    /// Re-resolve a receive endpoint's control address
    ReResolveControl(ReResolve),
    DeleteResource(Resource),
}

impl DriverCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DriverCommand::CreatePublicationImage(_) => "create_publication_image",
            DriverCommand::RemovePublicationImage { .. } => "remove_publication_image",
            DriverCommand::ReResolveEndpoint(_) => "re_resolve_endpoint",
            DriverCommand::ReResolveControl(_) => "re_resolve_control",
            DriverCommand::DeleteResource(_) => "delete_resource",
        }
    }
}
