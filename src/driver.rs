//! High-level driver API
//!
//! [`Driver`] runs the conductor on its own thread; every other thread talks
//! to it through [`ConductorProxy`] handles. [`SharedDriver`] keeps the
//! conductor on the caller's thread for low-resource deployments.

use crate::agent::AgentRunner;
use crate::conductor::DriverConductor;
use crate::conductor_proxy::{ConductorProxy, SharedConductor};
use crate::config::DriverConfig;
use crate::counters::SystemCounters;
use crate::error::Result;
use crate::idle::Idler;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Driver with a dedicated conductor thread
pub struct Driver {
    runner: AgentRunner<DriverConductor>,
    proxy: ConductorProxy,
    counters: Arc<SystemCounters>,
}

impl Driver {
    /// Build a conductor from `config` and start it
    pub fn launch(config: DriverConfig) -> Result<Self> {
        let conductor = DriverConductor::new(config, Arc::new(SystemCounters::new()))?;
        Self::start(conductor)
    }

    /// Start an already configured conductor, e.g. one with endpoints registered
    pub fn start(conductor: DriverConductor) -> Result<Self> {
        let proxy = conductor.proxy();
        let counters = Arc::clone(conductor.counters());
        let idle_strategy = conductor.config().idle_strategy;
        let runner = AgentRunner::start(conductor, idle_strategy)?;

        Ok(Self {
            runner,
            proxy,
            counters,
        })
    }

    /// A proxy for another thread
    pub fn proxy(&self) -> ConductorProxy {
        self.proxy.clone()
    }

    pub fn counters(&self) -> &Arc<SystemCounters> {
        &self.counters
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Stop the conductor thread and return the closed conductor
    pub fn close(self) -> Result<DriverConductor> {
        self.runner.close()
    }
}

/// Driver whose conductor runs on the caller's thread
pub struct SharedDriver {
    conductor: Rc<RefCell<DriverConductor>>,
    proxy: ConductorProxy<SharedConductor>,
    idler: Idler,
}

impl SharedDriver {
    pub fn new(config: DriverConfig) -> Result<Self> {
        let conductor = DriverConductor::new(config, Arc::new(SystemCounters::new()))?;
        Ok(Self::from_conductor(conductor))
    }

    pub fn from_conductor(conductor: DriverConductor) -> Self {
        let counters = Arc::clone(conductor.counters());
        let idler = conductor.config().idle_strategy.idler();
        let conductor = Rc::new(RefCell::new(conductor));
        let proxy = ConductorProxy::new(SharedConductor::new(Rc::clone(&conductor)), counters);

        Self {
            conductor,
            proxy,
            idler,
        }
    }

    pub fn proxy(&self) -> ConductorProxy<SharedConductor> {
        self.proxy.clone()
    }

    /// Run one conductor duty cycle
    pub fn do_work(&self) -> usize {
        self.conductor.borrow_mut().do_work()
    }

    /// Run one duty cycle and idle if it found nothing to do
    pub fn duty_cycle(&mut self) -> usize {
        let work = self.do_work();
        self.idler.idle(work);
        work
    }

    /// Access the conductor between duty cycles
    pub fn with_conductor<R>(&self, f: impl FnOnce(&mut DriverConductor) -> R) -> R {
        f(&mut self.conductor.borrow_mut())
    }

    pub fn close(&self) {
        self.conductor.borrow_mut().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadingMode;
    use std::time::{Duration, Instant};

    fn config(dir: &std::path::Path) -> DriverConfig {
        DriverConfig::default()
            .with_dir(dir)
            .with_linger_timeout(Duration::from_millis(20))
    }

    #[test]
    fn test_dedicated_driver_applies_commands() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::launch(config(dir.path())).unwrap();
        let proxy = driver.proxy();
        assert_eq!(proxy.threading_mode(), ThreadingMode::Dedicated);

        assert!(proxy.on_remove_publication_image(1));

        let deadline = Instant::now() + Duration::from_secs(5);
        while driver.counters().snapshot().commands_rejected == 0 {
            assert!(Instant::now() < deadline, "conductor never applied the command");
            std::thread::sleep(Duration::from_millis(1));
        }

        let conductor = driver.close().unwrap();
        assert_eq!(
            conductor.state(),
            crate::conductor::ConductorState::Stopped
        );
    }

    #[test]
    fn test_shared_driver_applies_commands_inline() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = SharedDriver::new(config(dir.path())).unwrap();
        let control = "127.0.0.1:4000".parse().unwrap();
        let endpoint = driver.with_conductor(|c| c.add_receive_endpoint("rcv", control));

        let proxy = driver.proxy();
        assert_eq!(proxy.threading_mode(), ThreadingMode::Shared);
        assert!(proxy.on_create_publication_image(
            5,
            6,
            0,
            0,
            0,
            crate::log_buffer::TERM_MIN_LENGTH,
            1408,
            control,
            "127.0.0.1:9000".parse().unwrap(),
            endpoint,
        ));

        // Applied without a duty cycle
        assert_eq!(driver.with_conductor(|c| c.images().count()), 1);
        assert_eq!(driver.duty_cycle(), 0);

        driver.close();
        assert_eq!(driver.do_work(), 0);
    }

    #[test]
    fn test_shared_proxy_falls_back_to_queue_when_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SharedDriver::new(config(dir.path())).unwrap();
        let proxy = driver.proxy();

        driver.with_conductor(|_| {
            assert!(proxy.on_remove_publication_image(9));
        });
        assert_eq!(driver.with_conductor(|c| c.counters().snapshot().commands_rejected), 0);

        assert_eq!(driver.do_work(), 1);
        assert_eq!(driver.with_conductor(|c| c.counters().snapshot().commands_rejected), 1);
    }
}
