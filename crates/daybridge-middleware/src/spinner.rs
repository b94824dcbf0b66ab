//! Polling driver ("spinner").
//!
//! The pub/sub engine exposes a synchronous polling entry point
//! ([`Transport::spin_once`]) rather than interrupt-driven I/O. The
//! [`Spinner`] drives it from a dedicated thread: *advance* one quantum,
//! *idle* for a short fixed interval, then check the node's run flag and
//! either go around again or terminate.
//!
//! ```text
//! Scheduled ──► Running ──► Scheduled   (flag still set)
//!                  └──────► Terminated  (flag cleared)
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::transport::Transport;

/// Idle time between two polling cycles.
pub const DEFAULT_SPIN_INTERVAL: Duration = Duration::from_millis(1);

const THREAD_NAME: &str = "daybridge-spinner";

/// Lifecycle of the polling driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinnerState {
    /// Waiting for its next cycle.
    Scheduled,
    /// Inside a cycle (advance + idle).
    Running,
    /// Observed a cleared run flag and exited. Terminal.
    Terminated,
}

impl SpinnerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SpinnerState::Scheduled,
            1 => SpinnerState::Running,
            _ => SpinnerState::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SpinnerState::Scheduled => 0,
            SpinnerState::Running => 1,
            SpinnerState::Terminated => 2,
        }
    }
}

/// Handle to a running polling thread.
pub struct Spinner {
    state: Arc<AtomicU8>,
    cycles: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Spawn the polling thread. It keeps cycling while `running` is `true`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn launch(
        transport: Arc<dyn Transport>,
        running: Arc<AtomicBool>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let state = Arc::new(AtomicU8::new(SpinnerState::Scheduled.as_u8()));
        let cycles = Arc::new(AtomicU64::new(0));

        let thread_state = Arc::clone(&state);
        let thread_cycles = Arc::clone(&cycles);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                debug!(interval_us = interval.as_micros() as u64, "spinner started");
                loop {
                    thread_state.store(SpinnerState::Running.as_u8(), Ordering::SeqCst);

                    // A misbehaving engine must not take the polling loop down.
                    if catch_unwind(AssertUnwindSafe(|| transport.spin_once())).is_err() {
                        error!("transport panicked during spin_once; continuing");
                    }
                    thread::sleep(interval);
                    thread_cycles.fetch_add(1, Ordering::Relaxed);

                    if running.load(Ordering::SeqCst) {
                        thread_state.store(SpinnerState::Scheduled.as_u8(), Ordering::SeqCst);
                    } else {
                        thread_state.store(SpinnerState::Terminated.as_u8(), Ordering::SeqCst);
                        break;
                    }
                }
                debug!("spinner terminated");
            })?;

        Ok(Self {
            state,
            cycles,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> SpinnerState {
        SpinnerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Completed polling cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Wait for the thread to exit. The run flag must already be cleared,
    /// otherwise this blocks until it is.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("spinner thread panicked");
        }
    }
}
