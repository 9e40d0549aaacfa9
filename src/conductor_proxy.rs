//! Producer-side façade for requesting conductor state changes
//!
//! Receiver, sender and client-facing threads never touch conductor state.
//! They build a [`DriverCommand`] through a [`ConductorProxy`], which hands
//! it to a [`CommandSink`]. A failed hand-off drops the request and bumps
//! `conductor_proxy_fails`; re-driving it is the caller's business.

use crate::command::{CreatePublicationImage, DriverCommand, LogBufferId, ReResolve, Resource};
use crate::conductor::DriverConductor;
use crate::config::ThreadingMode;
use crate::counters::SystemCounters;
use crate::endpoint::EndpointId;
use crate::mpsc_queue::MpscProducer;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Where a proxy delivers commands
pub trait CommandSink {
    fn threading_mode(&self) -> ThreadingMode;

    /// Deliver a command, handing it back if it could not be accepted
    fn dispatch(&self, command: DriverCommand) -> Result<(), DriverCommand>;
}

impl CommandSink for MpscProducer<DriverCommand> {
    fn threading_mode(&self) -> ThreadingMode {
        ThreadingMode::Dedicated
    }

    #[inline]
    fn dispatch(&self, command: DriverCommand) -> Result<(), DriverCommand> {
        self.try_offer(command)
    }
}

/// Sink for a conductor running on the caller's own thread
///
/// Commands are applied immediately. If the conductor is already borrowed
/// (a proxy call made from inside its duty cycle) the command goes through
/// the queue and is applied on the next cycle.
#[derive(Clone)]
pub struct SharedConductor {
    conductor: Rc<RefCell<DriverConductor>>,
    fallback: MpscProducer<DriverCommand>,
}

impl SharedConductor {
    pub fn new(conductor: Rc<RefCell<DriverConductor>>) -> Self {
        let fallback = conductor.borrow().command_producer();
        Self {
            conductor,
            fallback,
        }
    }
}

impl CommandSink for SharedConductor {
    fn threading_mode(&self) -> ThreadingMode {
        ThreadingMode::Shared
    }

    fn dispatch(&self, command: DriverCommand) -> Result<(), DriverCommand> {
        match self.conductor.try_borrow_mut() {
            Ok(mut conductor) => {
                conductor.on_command(command);
                Ok(())
            }
            Err(_) => self.fallback.try_offer(command),
        }
    }
}

/// Builds command records and submits them to the conductor
pub struct ConductorProxy<S: CommandSink = MpscProducer<DriverCommand>> {
    sink: S,
    counters: Arc<SystemCounters>,
}

impl<S: CommandSink + Clone> Clone for ConductorProxy<S> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<S: CommandSink> ConductorProxy<S> {
    pub fn new(sink: S, counters: Arc<SystemCounters>) -> Self {
        Self { sink, counters }
    }

    pub fn threading_mode(&self) -> ThreadingMode {
        self.sink.threading_mode()
    }

    /// Commands dropped so far by every proxy sharing these counters
    pub fn fail_count(&self) -> i64 {
        self.counters.conductor_proxy_fails.load(Ordering::Acquire)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_create_publication_image(
        &self,
        session_id: i32,
        stream_id: i32,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: i32,
        term_length: usize,
        mtu_length: usize,
        control_address: SocketAddr,
        source_address: SocketAddr,
        endpoint: EndpointId,
    ) -> bool {
        self.submit(DriverCommand::CreatePublicationImage(CreatePublicationImage {
            session_id,
            stream_id,
            initial_term_id,
            active_term_id,
            term_offset,
            term_length,
            mtu_length,
            control_address,
            source_address,
            endpoint,
        }))
    }

    pub fn on_remove_publication_image(&self, correlation_id: i64) -> bool {
        self.submit(DriverCommand::RemovePublicationImage { correlation_id })
    }

    pub fn on_re_resolve_endpoint(
        &self,
        endpoint_name: &str,
        endpoint: EndpointId,
        existing_addr: SocketAddr,
    ) -> bool {
        self.submit(DriverCommand::ReResolveEndpoint(ReResolve {
            endpoint_name: endpoint_name.to_owned(),
            endpoint,
            existing_addr,
        }))
    }

    pub fn on_re_resolve_control(
        &self,
        endpoint_name: &str,
        endpoint: EndpointId,
        existing_addr: SocketAddr,
    ) -> bool {
        self.submit(DriverCommand::ReResolveControl(ReResolve {
            endpoint_name: endpoint_name.to_owned(),
            endpoint,
            existing_addr,
        }))
    }

    /// Retire a resource through the lingering list
    ///
    /// On failure the resource is handed back so an owned region is not
    /// unmapped on this thread.
    pub fn on_delete_cmd(&self, resource: Resource) -> Result<(), Resource> {
        match self.dispatch(DriverCommand::DeleteResource(resource)) {
            Err(DriverCommand::DeleteResource(resource)) => Err(resource),
            // Sinks hand back the command they were given
            _ => Ok(()),
        }
    }

    pub fn on_linger_buffer(&self, log_buffer: LogBufferId) -> bool {
        self.on_delete_cmd(Resource::LogBuffer(log_buffer)).is_ok()
    }

    fn submit(&self, command: DriverCommand) -> bool {
        self.dispatch(command).is_ok()
    }

    fn dispatch(&self, command: DriverCommand) -> Result<(), DriverCommand> {
        self.sink.dispatch(command).map_err(|command| {
            self.counters
                .conductor_proxy_fails
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(command = command.name(), "conductor command dropped, queue full");
            command
        })
    }
}
