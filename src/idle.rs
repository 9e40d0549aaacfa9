//! Idle strategies for duty-cycle loops
//!
//! An agent calls [`Idler::idle`] with the work count of each cycle. Work
//! resets any backoff; no work escalates it.

use std::time::Duration;

/// How an agent waits when a duty cycle found nothing to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStrategy {
    /// Spin with `spin_loop` hints
    BusySpin,
    /// Yield the thread
    Yielding,
    /// Sleep a fixed period
    Sleeping(Duration),
    /// Spin, then yield, then park with exponentially growing sleeps
    Backoff {
        max_spins: u32,
        max_yields: u32,
        min_park: Duration,
        max_park: Duration,
    },
}

impl Default for IdleStrategy {
    fn default() -> Self {
        IdleStrategy::Backoff {
            max_spins: 10,
            max_yields: 20,
            min_park: Duration::from_micros(1),
            max_park: Duration::from_millis(1),
        }
    }
}

impl IdleStrategy {
    /// Longest single pause this strategy can take
    pub fn max_pause(&self) -> Duration {
        match *self {
            IdleStrategy::BusySpin | IdleStrategy::Yielding => Duration::ZERO,
            IdleStrategy::Sleeping(period) => period,
            IdleStrategy::Backoff { max_park, .. } => max_park,
        }
    }

    pub fn idler(&self) -> Idler {
        Idler {
            strategy: *self,
            spins: 0,
            yields: 0,
            park: Duration::ZERO,
        }
    }
}

/// Stateful idler built from an [`IdleStrategy`]
#[derive(Debug)]
pub struct Idler {
    strategy: IdleStrategy,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl Idler {
    #[inline]
    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        match self.strategy {
            IdleStrategy::BusySpin => std::hint::spin_loop(),
            IdleStrategy::Yielding => std::thread::yield_now(),
            IdleStrategy::Sleeping(period) => std::thread::sleep(period),
            IdleStrategy::Backoff {
                max_spins,
                max_yields,
                min_park,
                max_park,
            } => {
                if self.spins < max_spins {
                    self.spins += 1;
                    std::hint::spin_loop();
                } else if self.yields < max_yields {
                    self.yields += 1;
                    std::thread::yield_now();
                } else {
                    self.park = if self.park.is_zero() {
                        min_park
                    } else {
                        (self.park * 2).min(max_park)
                    };
                    std::thread::sleep(self.park);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park = Duration::ZERO;
    }
}
