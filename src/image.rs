//! Publication images: inbound streams being received for subscribers

use crate::command::LogBufferId;
use crate::endpoint::EndpointId;
use std::net::SocketAddr;

/// Driver-side state of one inbound stream
#[derive(Debug, Clone)]
pub struct PublicationImage {
    pub(crate) correlation_id: i64,
    pub(crate) session_id: i32,
    pub(crate) stream_id: i32,
    pub(crate) initial_term_id: i32,
    pub(crate) active_term_id: i32,
    pub(crate) term_offset: i32,
    pub(crate) term_length: usize,
    pub(crate) mtu_length: usize,
    pub(crate) control_address: SocketAddr,
    pub(crate) source_address: SocketAddr,
    pub(crate) endpoint: EndpointId,
    pub(crate) log_buffer: LogBufferId,
    pub(crate) created_ns: u64,
}

impl PublicationImage {
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn active_term_id(&self) -> i32 {
        self.active_term_id
    }

    pub fn term_offset(&self) -> i32 {
        self.term_offset
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn mtu_length(&self) -> usize {
        self.mtu_length
    }

    pub fn control_address(&self) -> SocketAddr {
        self.control_address
    }

    pub fn source_address(&self) -> SocketAddr {
        self.source_address
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn log_buffer(&self) -> LogBufferId {
        self.log_buffer
    }

    pub fn created_ns(&self) -> u64 {
        self.created_ns
    }

    /// Whether this image carries the given stream on the given endpoint
    pub fn matches(&self, endpoint: EndpointId, session_id: i32, stream_id: i32) -> bool {
        self.endpoint == endpoint && self.session_id == session_id && self.stream_id == stream_id
    }
}
