//! Duty-cycle agents and the thread that runs them

use crate::error::{DriverError, Result};
use crate::idle::IdleStrategy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A unit of non-blocking work polled in a loop
pub trait Agent: Send + 'static {
    fn role_name(&self) -> &str;

    /// Do one cycle of work and report how much was done
    fn do_work(&mut self) -> usize;

    /// Called once on the agent's thread after the loop exits
    fn on_close(&mut self) {}
}

/// Runs an [`Agent`] on a dedicated, named thread
pub struct AgentRunner<A: Agent> {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<A>>,
}

impl<A: Agent> AgentRunner<A> {
    pub fn start(mut agent: A, idle_strategy: IdleStrategy) -> Result<Self> {
        let name = agent.role_name().to_owned();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(agent = agent.role_name(), "agent started");
                let mut idler = idle_strategy.idler();
                // At least one duty cycle runs even if closed straight away
                loop {
                    let work = agent.do_work();
                    if !flag.load(Ordering::Acquire) {
                        break;
                    }
                    idler.idle(work);
                }
                agent.on_close();
                tracing::debug!(agent = agent.role_name(), "agent closed");
                agent
            })
            .map_err(DriverError::AgentSpawn)?;

        Ok(Self {
            name,
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the loop, wait for the thread and hand back the agent
    pub fn close(mut self) -> Result<A> {
        self.running.store(false, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DriverError::AgentPanicked(self.name.clone())),
            None => Err(DriverError::AgentPanicked(self.name.clone())),
        }
    }
}

impl<A: Agent> Drop for AgentRunner<A> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(agent = %self.name, "agent panicked");
            }
        }
    }
}
