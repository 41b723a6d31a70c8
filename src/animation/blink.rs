// Blink module - random-cadence eye state machine
//
// Two states with randomized holds:
//   open   --(hold uniform in [open_min, open_max])-->   closed
//   closed --(hold uniform in [closed_min, closed_max])--> open
//
// `BlinkMachine` is the pure state machine driven by an injected RNG.
// `BlinkScheduler` runs a machine on a tokio task and publishes the latest
// state through a watch channel for the renderers to sample.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::telemetry;

/// Eye state published by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeState {
    Open,
    Closed,
}

impl EyeState {
    pub const ALL: [EyeState; 2] = [EyeState::Open, EyeState::Closed];

    pub fn toggled(self) -> Self {
        match self {
            EyeState::Open => EyeState::Closed,
            EyeState::Closed => EyeState::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EyeState::Open => "open",
            EyeState::Closed => "closed",
        }
    }
}

/// Hold ranges for each eye state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkTimings {
    open_min: Duration,
    open_max: Duration,
    closed_min: Duration,
    closed_max: Duration,
}

impl BlinkTimings {
    /// Swapped bounds are reordered rather than rejected.
    pub fn new(open_min: Duration, open_max: Duration, closed_min: Duration, closed_max: Duration) -> Self {
        Self {
            open_min: open_min.min(open_max),
            open_max: open_max.max(open_min),
            closed_min: closed_min.min(closed_max),
            closed_max: closed_max.max(closed_min),
        }
    }

    /// Draw how long `state` is held before the next transition.
    pub fn hold_for<R: Rng + ?Sized>(&self, state: EyeState, rng: &mut R) -> Duration {
        let (min, max) = match state {
            EyeState::Open => (self.open_min, self.open_max),
            EyeState::Closed => (self.closed_min, self.closed_max),
        };
        let min_ms = min.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        // Never zero, a zero hold would spin the timer task
        Duration::from_millis(rng.gen_range(min_ms..=max_ms).max(1))
    }
}

impl Default for BlinkTimings {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(2000),
            Duration::from_millis(6000),
            Duration::from_millis(100),
            Duration::from_millis(180),
        )
    }
}

/// Pure two-state machine
pub struct BlinkMachine<R: Rng> {
    timings: BlinkTimings,
    rng: R,
    state: EyeState,
}

impl<R: Rng> BlinkMachine<R> {
    /// Starts with eyes open.
    pub fn new(timings: BlinkTimings, rng: R) -> Self {
        Self {
            timings,
            rng,
            state: EyeState::Open,
        }
    }

    pub fn state(&self) -> EyeState {
        self.state
    }

    /// Draw the hold for the current state.
    pub fn next_hold(&mut self) -> Duration {
        self.timings.hold_for(self.state, &mut self.rng)
    }

    /// Flip to the other state and return it.
    pub fn advance(&mut self) -> EyeState {
        self.state = self.state.toggled();
        self.state
    }
}

impl BlinkMachine<StdRng> {
    pub fn seeded(timings: BlinkTimings, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(timings, rng)
    }
}

/// One contiguous span of a single eye state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkInterval {
    pub state: EyeState,
    pub start: Duration,
    pub end: Duration,
}

/// Simulate a machine offline over `total`, clipping the last interval.
pub fn timeline<R: Rng>(machine: &mut BlinkMachine<R>, total: Duration) -> Vec<BlinkInterval> {
    let mut intervals = Vec::new();
    let mut at = Duration::ZERO;
    while at < total {
        let end = (at + machine.next_hold()).min(total);
        intervals.push(BlinkInterval {
            state: machine.state(),
            start: at,
            end,
        });
        at = end;
        machine.advance();
    }
    intervals
}

/// Blink state machine running on its own tokio task
///
/// Dropping the scheduler cancels it.
pub struct BlinkScheduler {
    state_rx: watch::Receiver<EyeState>,
    cancelled: Arc<Mutex<bool>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BlinkScheduler {
    /// Spawn the scheduler on the current tokio runtime.
    pub fn spawn(timings: BlinkTimings, seed: Option<u64>) -> Self {
        let mut machine = BlinkMachine::seeded(timings, seed);
        let (state_tx, state_rx) = watch::channel(machine.state());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let cancelled = Arc::new(Mutex::new(false));
        let task_cancelled = Arc::clone(&cancelled);

        let handle = tokio::spawn(async move {
            log::debug!("[BlinkScheduler] started");
            loop {
                let hold = machine.next_hold();
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(hold) => {
                        // Holding the flag lock across the publish means a
                        // returned `cancel()` can never be followed by a send
                        let flag = task_cancelled
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        if *flag {
                            break;
                        }
                        let next = machine.advance();
                        state_tx.send_replace(next);
                        drop(flag);
                        log::trace!("[BlinkScheduler] eyes {}", next.as_str());
                        telemetry::hub().record_blink(next);
                    }
                }
            }
            log::debug!("[BlinkScheduler] stopped");
        });

        Self {
            state_rx,
            cancelled,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn current(&self) -> EyeState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EyeState> {
        self.state_rx.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop scheduling transitions. Idempotent.
    pub fn cancel(&mut self) {
        *self
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for BlinkScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
