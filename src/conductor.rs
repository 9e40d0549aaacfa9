//! The driver conductor: sole owner and writer of driver state
//!
//! Every other thread reaches this state only through the command queue.
//! Each duty cycle drains a bounded batch of commands, applies them, then
//! sweeps the lingering list, unmapping resources whose grace period has
//! passed. Nothing in a cycle blocks.
//!
//! # Reclamation
//!
//! A retired log buffer or region is never unmapped on the spot: I/O threads
//! may still hold a [`LogBufferView`](crate::log_buffer::LogBufferView) into
//! it. It is parked with a deadline of `now + linger_timeout` and unmapped by
//! the first sweep at or after that deadline. Only this thread unmaps.

use crate::agent::Agent;
use crate::clock::{Clock, MonotonicClock};
use crate::command::{CreatePublicationImage, DriverCommand, LogBufferId, ReResolve, Resource};
use crate::conductor_proxy::ConductorProxy;
use crate::config::DriverConfig;
use crate::counters::SystemCounters;
use crate::endpoint::{Endpoint, EndpointId, EndpointKind, NameResolver, SystemResolver};
use crate::error::{DriverError, Result};
use crate::image::PublicationImage;
use crate::log_buffer::{LogBuffer, LogBufferParams};
use crate::mapped_file::MappedRegion;
use crate::mpsc_queue::{self, MpscConsumer, MpscProducer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Conductor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConductorState {
    Running,
    /// Terminal
    Stopped,
}

enum Lingering {
    LogBuffer(LogBufferId, LogBuffer),
    Region(MappedRegion),
}

struct LingerEntry {
    resource: Lingering,
    deadline_ns: u64,
}

/// Owner of all driver state
pub struct DriverConductor {
    state: ConductorState,
    config: DriverConfig,
    command_queue: MpscConsumer<DriverCommand>,
    /// Reused between cycles so draining does not allocate
    pending: Vec<DriverCommand>,
    clock: Box<dyn Clock>,
    resolver: Box<dyn NameResolver>,
    counters: Arc<SystemCounters>,
    endpoints: HashMap<EndpointId, Endpoint>,
    images: HashMap<i64, PublicationImage>,
    log_buffers: HashMap<LogBufferId, LogBuffer>,
    lingering: Vec<LingerEntry>,
    next_correlation_id: i64,
    next_endpoint_id: u64,
}

impl DriverConductor {
    /// Validate `config`, prepare the driver directory and enter `Running`
    pub fn new(config: DriverConfig, counters: Arc<SystemCounters>) -> Result<Self> {
        config.validate()?;

        if config.dir_delete_on_start && config.dir.exists() {
            std::fs::remove_dir_all(&config.dir).map_err(|e| DriverError::io(&config.dir, e))?;
        }
        let images_dir = config.images_dir();
        std::fs::create_dir_all(&images_dir).map_err(|e| DriverError::io(&images_dir, e))?;

        let (_, command_queue) = mpsc_queue::channel(config.command_queue_capacity);

        info!(
            dir = %config.dir.display(),
            queue_capacity = command_queue.capacity(),
            linger_ms = config.linger_timeout.as_millis() as u64,
            "conductor started"
        );

        Ok(Self {
            state: ConductorState::Running,
            pending: Vec::with_capacity(config.command_drain_limit),
            config,
            command_queue,
            clock: Box::new(MonotonicClock::new()),
            resolver: Box::new(SystemResolver),
            counters,
            endpoints: HashMap::new(),
            images: HashMap::new(),
            log_buffers: HashMap::new(),
            lingering: Vec::new(),
            next_correlation_id: 1,
            next_endpoint_id: 1,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_resolver(mut self, resolver: impl NameResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Proxy delivering to this conductor's queue
    pub fn proxy(&self) -> ConductorProxy {
        ConductorProxy::new(self.command_producer(), Arc::clone(&self.counters))
    }

    pub(crate) fn command_producer(&self) -> MpscProducer<DriverCommand> {
        self.command_queue.producer()
    }

    pub fn state(&self) -> ConductorState {
        self.state
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn counters(&self) -> &Arc<SystemCounters> {
        &self.counters
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn image(&self, correlation_id: i64) -> Option<&PublicationImage> {
        self.images.get(&correlation_id)
    }

    pub fn images(&self) -> impl Iterator<Item = &PublicationImage> {
        self.images.values()
    }

    pub fn log_buffer(&self, id: LogBufferId) -> Option<&LogBuffer> {
        self.log_buffers.get(&id)
    }

    pub fn lingering_count(&self) -> usize {
        self.lingering.len()
    }

    pub fn is_lingering(&self, id: LogBufferId) -> bool {
        self.lingering
            .iter()
            .any(|entry| matches!(entry.resource, Lingering::LogBuffer(lingering, _) if lingering == id))
    }

    pub fn add_send_endpoint(&mut self, name: impl Into<String>, destination: SocketAddr) -> EndpointId {
        self.add_endpoint(EndpointKind::Send, name.into(), destination)
    }

    pub fn add_receive_endpoint(&mut self, name: impl Into<String>, control: SocketAddr) -> EndpointId {
        self.add_endpoint(EndpointKind::Receive, name.into(), control)
    }

    fn add_endpoint(&mut self, kind: EndpointKind, name: String, address: SocketAddr) -> EndpointId {
        let id = EndpointId(self.next_endpoint_id);
        self.next_endpoint_id += 1;
        debug!(endpoint = %id, ?kind, %name, %address, "endpoint added");
        self.endpoints.insert(
            id,
            Endpoint {
                id,
                kind,
                name,
                address,
            },
        );
        id
    }

    /// Remove an endpoint, retiring the log buffers of its images
    pub fn remove_endpoint(&mut self, id: EndpointId) -> Result<()> {
        self.endpoints
            .remove(&id)
            .ok_or_else(|| DriverError::InvalidCommand(format!("unknown {id}")))?;

        let orphaned: Vec<i64> = self
            .images
            .values()
            .filter(|image| image.endpoint == id)
            .map(|image| image.correlation_id)
            .collect();
        for correlation_id in orphaned {
            self.retire_image(correlation_id)?;
        }
        debug!(endpoint = %id, "endpoint removed");
        Ok(())
    }

    /// One duty cycle; returns the amount of work done
    pub fn do_work(&mut self) -> usize {
        if self.state == ConductorState::Stopped {
            return 0;
        }

        let mut pending = std::mem::take(&mut self.pending);
        let mut work = self
            .command_queue
            .drain(|command| pending.push(command), self.config.command_drain_limit);
        for command in pending.drain(..) {
            self.on_command(command);
        }
        self.pending = pending;

        let now_ns = self.clock.now_ns();
        work += self.sweep_lingering(now_ns);
        work
    }

    /// Apply one command; failures are logged and counted, never propagated
    pub fn on_command(&mut self, command: DriverCommand) {
        let name = command.name();
        match self.apply(command) {
            Ok(()) => SystemCounters::incr(&self.counters.commands_applied),
            Err(e @ (DriverError::Io { .. } | DriverError::Mmap { .. } | DriverError::NotFound { .. })) => {
                SystemCounters::incr(&self.counters.commands_rejected);
                SystemCounters::incr(&self.counters.errors);
                error!(command = name, error = %e, "command failed");
            }
            Err(e) => {
                SystemCounters::incr(&self.counters.commands_rejected);
                warn!(command = name, error = %e, "command rejected");
            }
        }
    }

    fn apply(&mut self, command: DriverCommand) -> Result<()> {
        match command {
            DriverCommand::CreatePublicationImage(cmd) => self.on_create_publication_image(cmd),
            DriverCommand::RemovePublicationImage { correlation_id } => {
                self.retire_image(correlation_id)
            }
            DriverCommand::ReResolveEndpoint(cmd) => self.on_re_resolve(cmd, EndpointKind::Send),
            DriverCommand::ReResolveControl(cmd) => self.on_re_resolve(cmd, EndpointKind::Receive),
            DriverCommand::DeleteResource(resource) => self.on_delete_resource(resource),
        }
    }

    fn on_create_publication_image(&mut self, cmd: CreatePublicationImage) -> Result<()> {
        let endpoint = self
            .endpoints
            .get(&cmd.endpoint)
            .ok_or_else(|| DriverError::InvalidCommand(format!("unknown {}", cmd.endpoint)))?;
        if endpoint.kind != EndpointKind::Receive {
            return Err(DriverError::InvalidCommand(format!(
                "{} is not a receive endpoint",
                cmd.endpoint
            )));
        }
        if self
            .images
            .values()
            .any(|image| image.matches(cmd.endpoint, cmd.session_id, cmd.stream_id))
        {
            return Err(DriverError::InvalidCommand(format!(
                "image already exists for session {} stream {} on {}",
                cmd.session_id, cmd.stream_id, cmd.endpoint
            )));
        }

        let correlation_id = self.next_correlation_id;
        let params = LogBufferParams {
            correlation_id,
            initial_term_id: cmd.initial_term_id,
            active_term_id: cmd.active_term_id,
            term_offset: cmd.term_offset,
            term_length: cmd.term_length,
            mtu_length: cmd.mtu_length,
        };
        params.validate()?;

        let path = self
            .config
            .images_dir()
            .join(format!("{correlation_id}.logbuffer"));
        let log = LogBuffer::create(&path, params)?;
        self.next_correlation_id += 1;

        let log_buffer = LogBufferId(correlation_id);
        self.log_buffers.insert(log_buffer, log);
        self.images.insert(
            correlation_id,
            PublicationImage {
                correlation_id,
                session_id: cmd.session_id,
                stream_id: cmd.stream_id,
                initial_term_id: cmd.initial_term_id,
                active_term_id: cmd.active_term_id,
                term_offset: cmd.term_offset,
                term_length: cmd.term_length,
                mtu_length: cmd.mtu_length,
                control_address: cmd.control_address,
                source_address: cmd.source_address,
                endpoint: cmd.endpoint,
                log_buffer,
                created_ns: self.clock.now_ns(),
            },
        );
        SystemCounters::incr(&self.counters.images_created);

        info!(
            correlation_id,
            session_id = cmd.session_id,
            stream_id = cmd.stream_id,
            source = %cmd.source_address,
            path = %path.display(),
            "publication image created"
        );
        Ok(())
    }

    fn on_re_resolve(&mut self, cmd: ReResolve, kind: EndpointKind) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(&cmd.endpoint)
            .ok_or_else(|| DriverError::InvalidCommand(format!("unknown {}", cmd.endpoint)))?;
        if endpoint.kind != kind {
            return Err(DriverError::InvalidCommand(format!(
                "{} is not a {kind:?} endpoint",
                cmd.endpoint
            )));
        }

        match self.resolver.resolve(&cmd.endpoint_name) {
            Ok(resolved) if resolved != cmd.existing_addr => {
                info!(
                    endpoint = %cmd.endpoint,
                    name = %cmd.endpoint_name,
                    old = %cmd.existing_addr,
                    new = %resolved,
                    "endpoint address changed"
                );
                endpoint.address = resolved;
                endpoint.name = cmd.endpoint_name;
                SystemCounters::incr(&self.counters.resolution_changes);
            }
            Ok(_) => {
                debug!(endpoint = %cmd.endpoint, name = %cmd.endpoint_name, "endpoint address unchanged");
            }
            Err(e) => {
                SystemCounters::incr(&self.counters.errors);
                warn!(endpoint = %cmd.endpoint, name = %cmd.endpoint_name, error = %e, "re-resolution failed");
            }
        }
        Ok(())
    }

    fn on_delete_resource(&mut self, resource: Resource) -> Result<()> {
        match resource {
            Resource::Region(region) => {
                debug!(path = %region.path().display(), "region retired");
                self.linger(Lingering::Region(region));
                Ok(())
            }
            Resource::LogBuffer(id) => {
                let owner = self
                    .images
                    .values()
                    .find(|image| image.log_buffer == id)
                    .map(|image| image.correlation_id);
                match owner {
                    Some(correlation_id) => self.retire_image(correlation_id),
                    None => {
                        let log = self.log_buffers.remove(&id).ok_or_else(|| {
                            DriverError::InvalidCommand(format!("unknown or already deleted {id}"))
                        })?;
                        self.linger(Lingering::LogBuffer(id, log));
                        Ok(())
                    }
                }
            }
        }
    }

    /// Drop an image and move its log buffer onto the lingering list
    fn retire_image(&mut self, correlation_id: i64) -> Result<()> {
        let image = self.images.remove(&correlation_id).ok_or_else(|| {
            DriverError::InvalidCommand(format!("unknown image {correlation_id}"))
        })?;

        if let Some(log) = self.log_buffers.remove(&image.log_buffer) {
            self.linger(Lingering::LogBuffer(image.log_buffer, log));
        }
        info!(correlation_id, session_id = image.session_id, stream_id = image.stream_id, "publication image removed");
        Ok(())
    }

    fn linger(&mut self, resource: Lingering) {
        let timeout_ns = u64::try_from(self.config.linger_timeout.as_nanos()).unwrap_or(u64::MAX);
        let deadline_ns = self.clock.now_ns().saturating_add(timeout_ns);
        self.lingering.push(LingerEntry {
            resource,
            deadline_ns,
        });
        SystemCounters::incr(&self.counters.resources_lingered);
    }

    /// Unmap every lingering resource whose deadline is at or before `now_ns`
    pub fn sweep_lingering(&mut self, now_ns: u64) -> usize {
        let before = self.lingering.len();
        self.lingering.retain(|entry| {
            if entry.deadline_ns > now_ns {
                return true;
            }
            match &entry.resource {
                Lingering::LogBuffer(id, log) => {
                    debug!(log_buffer = %id, path = %log.path().display(), "log buffer reclaimed")
                }
                Lingering::Region(region) => {
                    debug!(path = %region.path().display(), "region reclaimed")
                }
            }
            false
        });

        let reclaimed = before - self.lingering.len();
        if reclaimed > 0 {
            self.counters
                .resources_reclaimed
                .fetch_add(reclaimed as u64, std::sync::atomic::Ordering::Relaxed);
        }
        reclaimed
    }

    /// Stop the conductor and release everything at once
    ///
    /// Only valid once no I/O thread can touch driver resources any more.
    pub fn close(&mut self) {
        if self.state == ConductorState::Stopped {
            return;
        }
        self.state = ConductorState::Stopped;

        let dropped = self.command_queue.drain_all(drop);
        self.images.clear();
        self.log_buffers.clear();
        self.lingering.clear();
        self.endpoints.clear();

        if self.config.dir_delete_on_shutdown {
            if let Err(e) = std::fs::remove_dir_all(&self.config.dir) {
                warn!(dir = %self.config.dir.display(), error = %e, "failed to delete driver directory");
            }
        }
        info!(dropped_commands = dropped, "conductor stopped");
    }
}

impl Agent for DriverConductor {
    fn role_name(&self) -> &str {
        "driver-conductor"
    }

    fn do_work(&mut self) -> usize {
        DriverConductor::do_work(self)
    }

    fn on_close(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::endpoint::StaticResolver;
    use crate::log_buffer::TERM_MIN_LENGTH;
    use std::time::Duration;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        conductor: DriverConductor,
        clock: ManualClock,
        resolver: StaticResolver,
        receive: EndpointId,
        send: EndpointId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let resolver = StaticResolver::new();
        let config = DriverConfig::default()
            .with_dir(dir.path())
            .with_linger_timeout(Duration::from_millis(50))
            .with_command_queue_capacity(16);
        let mut conductor = DriverConductor::new(config, Arc::new(SystemCounters::new()))
            .unwrap()
            .with_clock(clock.clone())
            .with_resolver(resolver.clone());
        let receive = conductor.add_receive_endpoint("rcv:4000", addr("127.0.0.1:4000"));
        let send = conductor.add_send_endpoint("peer:5000", addr("127.0.0.1:5000"));
        Fixture {
            _dir: dir,
            conductor,
            clock,
            resolver,
            receive,
            send,
        }
    }

    fn create_image(proxy: &ConductorProxy, endpoint: EndpointId, session_id: i32) -> bool {
        proxy.on_create_publication_image(
            session_id,
            10,
            0,
            0,
            0,
            TERM_MIN_LENGTH,
            1408,
            addr("127.0.0.1:4000"),
            addr("10.1.1.1:7000"),
            endpoint,
        )
    }

    #[test]
    fn test_create_publication_image() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();

        assert!(create_image(&proxy, f.receive, 42));
        assert_eq!(f.conductor.do_work(), 1);

        let image = f.conductor.images().next().unwrap();
        assert_eq!(image.session_id(), 42);
        assert_eq!(image.source_address(), addr("10.1.1.1:7000"));
        let log = f.conductor.log_buffer(image.log_buffer()).unwrap();
        assert!(log.path().exists());
        assert_eq!(log.correlation_id().unwrap(), image.correlation_id());
        assert_eq!(f.conductor.counters().snapshot().images_created, 1);
    }

    #[test]
    fn test_invalid_image_commands_rejected_without_stopping() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();

        assert!(create_image(&proxy, f.receive, 1));
        assert!(create_image(&proxy, f.receive, 1)); // duplicate
        assert!(create_image(&proxy, f.send, 2)); // wrong kind
        assert!(create_image(&proxy, EndpointId(99), 3)); // unknown
        assert!(proxy.on_create_publication_image(
            4,
            10,
            0,
            0,
            0,
            1000,
            1408,
            addr("127.0.0.1:1"),
            addr("127.0.0.1:2"),
            f.receive,
        ));
        assert!(create_image(&proxy, f.receive, 5));

        f.conductor.do_work();
        assert_eq!(f.conductor.state(), ConductorState::Running);
        assert_eq!(f.conductor.images().count(), 2);

        let snap = f.conductor.counters().snapshot();
        assert_eq!(snap.commands_applied, 2);
        assert_eq!(snap.commands_rejected, 4);
        assert_eq!(snap.errors, 0);
    }

    #[test]
    fn test_drain_limit_bounds_each_cycle() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        for i in 0..12 {
            proxy.on_remove_publication_image(i);
        }

        let limit = f.conductor.config().command_drain_limit;
        assert_eq!(f.conductor.do_work(), limit);
        assert_eq!(f.conductor.do_work(), 12 - limit);
        assert_eq!(f.conductor.do_work(), 0);
    }

    #[test]
    fn test_remove_image_lingers_then_reclaims() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        create_image(&proxy, f.receive, 7);
        f.conductor.do_work();

        let image = f.conductor.images().next().unwrap().clone();
        let path = f.conductor.log_buffer(image.log_buffer()).unwrap().path().to_path_buf();

        f.clock.set_ns(1_000);
        proxy.on_remove_publication_image(image.correlation_id());
        f.conductor.do_work();
        assert!(f.conductor.image(image.correlation_id()).is_none());
        assert!(f.conductor.is_lingering(image.log_buffer()));
        assert!(path.exists());

        f.clock.set_ns(1_000 + 50_000_000 - 1);
        f.conductor.do_work();
        assert!(f.conductor.is_lingering(image.log_buffer()));

        f.clock.set_ns(1_000 + 50_000_000);
        assert_eq!(f.conductor.do_work(), 1);
        assert_eq!(f.conductor.lingering_count(), 0);
        assert!(!path.exists());

        let snap = f.conductor.counters().snapshot();
        assert_eq!(snap.resources_lingered, 1);
        assert_eq!(snap.resources_reclaimed, 1);
    }

    #[test]
    fn test_delete_resource_twice_is_invalid() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        create_image(&proxy, f.receive, 7);
        f.conductor.do_work();
        let log_buffer = f.conductor.images().next().unwrap().log_buffer();

        assert!(proxy.on_linger_buffer(log_buffer));
        assert!(proxy.on_linger_buffer(log_buffer));
        f.conductor.do_work();

        assert_eq!(f.conductor.images().count(), 0);
        assert_eq!(f.conductor.lingering_count(), 1);
        assert_eq!(f.conductor.counters().snapshot().commands_rejected, 1);
    }

    #[test]
    fn test_delete_region_lingers() {
        let mut f = fixture();
        let region =
            MappedRegion::create_new(f._dir.path().join("raw"), 0, 4096).unwrap();

        f.conductor.proxy().on_delete_cmd(Resource::Region(region)).unwrap();
        f.conductor.do_work();
        assert_eq!(f.conductor.lingering_count(), 1);

        f.clock.advance(Duration::from_millis(50));
        f.conductor.do_work();
        assert_eq!(f.conductor.lingering_count(), 0);
    }

    #[test]
    fn test_oversized_linger_timeout_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let config = DriverConfig::default()
            .with_dir(dir.path())
            .with_linger_timeout(Duration::MAX);
        let mut conductor = DriverConductor::new(config, Arc::new(SystemCounters::new()))
            .unwrap()
            .with_clock(clock.clone());

        let region = MappedRegion::create_new(dir.path().join("raw"), 0, 4096).unwrap();
        clock.set_ns(1_000);
        conductor.proxy().on_delete_cmd(Resource::Region(region)).unwrap();
        conductor.do_work();

        clock.set_ns(u64::MAX - 1);
        conductor.do_work();
        assert_eq!(conductor.lingering_count(), 1);
    }

    #[test]
    fn test_re_resolve_endpoint_updates_address() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        let moved = addr("127.0.0.2:5000");
        f.resolver.insert("peer:5000", moved);

        proxy.on_re_resolve_endpoint("peer:5000", f.send, addr("127.0.0.1:5000"));
        f.conductor.do_work();
        assert_eq!(f.conductor.endpoint(f.send).unwrap().address(), moved);

        // Same address again: nothing changes
        proxy.on_re_resolve_endpoint("peer:5000", f.send, moved);
        // Unresolvable name: counted as an error, command still applied
        proxy.on_re_resolve_endpoint("gone:1", f.send, moved);
        // Control re-resolution aimed at a send endpoint
        proxy.on_re_resolve_control("peer:5000", f.send, moved);
        f.conductor.do_work();

        let snap = f.conductor.counters().snapshot();
        assert_eq!(snap.resolution_changes, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.commands_applied, 3);
        assert_eq!(snap.commands_rejected, 1);
    }

    #[test]
    fn test_re_resolve_control_on_receive_endpoint() {
        let mut f = fixture();
        let moved = addr("127.0.0.9:4000");
        f.resolver.insert("rcv:4000", moved);

        f.conductor
            .proxy()
            .on_re_resolve_control("rcv:4000", f.receive, addr("127.0.0.1:4000"));
        f.conductor.do_work();
        assert_eq!(f.conductor.endpoint(f.receive).unwrap().address(), moved);
    }

    #[test]
    fn test_remove_endpoint_retires_images() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        create_image(&proxy, f.receive, 1);
        create_image(&proxy, f.receive, 2);
        f.conductor.do_work();

        f.conductor.remove_endpoint(f.receive).unwrap();
        assert_eq!(f.conductor.images().count(), 0);
        assert_eq!(f.conductor.lingering_count(), 2);
        assert!(f.conductor.remove_endpoint(f.receive).is_err());
    }

    #[test]
    fn test_close_is_terminal() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        create_image(&proxy, f.receive, 1);
        f.conductor.do_work();
        proxy.on_remove_publication_image(1);
        f.conductor.do_work();
        proxy.on_remove_publication_image(2);

        f.conductor.close();
        assert_eq!(f.conductor.state(), ConductorState::Stopped);
        assert_eq!(f.conductor.lingering_count(), 0);
        assert!(f.conductor.command_queue.is_empty());

        proxy.on_remove_publication_image(3);
        assert_eq!(f.conductor.do_work(), 0);
    }

    #[test]
    fn test_image_creation_failure_is_contained() {
        let mut f = fixture();
        let proxy = f.conductor.proxy();
        std::fs::remove_dir_all(f.conductor.config().images_dir()).unwrap();

        create_image(&proxy, f.receive, 1);
        f.conductor.do_work();

        assert_eq!(f.conductor.state(), ConductorState::Running);
        assert_eq!(f.conductor.images().count(), 0);
        let snap = f.conductor.counters().snapshot();
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.commands_rejected, 1);
    }
}
