//! Liveness watchdog
//!
//! The control loop must call [`Watchdog::refresh`] at least once per timeout
//! window. Missing the window resets the device; on a host,
//! [`SoftwareWatchdog`] terminates the process so its supervisor restarts it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Exit status used when the watchdog fires
pub const WATCHDOG_EXIT_CODE: i32 = 75;

/// Hardware-style liveness watchdog
pub trait Watchdog {
    /// Arm the watchdog. With `pause_on_debug`, it does not fire while a debugger is attached.
    fn enable(&mut self, timeout: Duration, pause_on_debug: bool);

    /// Restart the countdown
    fn refresh(&mut self);
}

impl<W: Watchdog + ?Sized> Watchdog for Box<W> {
    fn enable(&mut self, timeout: Duration, pause_on_debug: bool) {
        (**self).enable(timeout, pause_on_debug)
    }

    fn refresh(&mut self) {
        (**self).refresh()
    }
}

struct Shared {
    origin: Instant,
    last_refresh_ms: AtomicU64,
    timeout_ms: AtomicU64,
    pause_on_debug: AtomicBool,
}

impl Shared {
    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Watchdog backed by a supervisor thread
///
/// The supervisor only reads timestamps; it never touches agent state.
pub struct SoftwareWatchdog {
    shared: Arc<Shared>,
    supervisor: Option<JoinHandle<()>>,
}

impl SoftwareWatchdog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                origin: Instant::now(),
                last_refresh_ms: AtomicU64::new(0),
                timeout_ms: AtomicU64::new(0),
                pause_on_debug: AtomicBool::new(false),
            }),
            supervisor: None,
        }
    }

    /// Time since the last refresh
    pub fn since_refresh(&self) -> Duration {
        let last = self.shared.last_refresh_ms.load(Ordering::Acquire);
        Duration::from_millis(self.shared.elapsed_ms().saturating_sub(last))
    }

    pub fn is_enabled(&self) -> bool {
        self.supervisor.is_some()
    }

    fn supervise(shared: Arc<Shared>) {
        loop {
            let timeout_ms = shared.timeout_ms.load(Ordering::Acquire);
            thread::sleep(Duration::from_millis((timeout_ms / 10).clamp(10, 250)));

            let last = shared.last_refresh_ms.load(Ordering::Acquire);
            let stalled_for = shared.elapsed_ms().saturating_sub(last);
            if stalled_for < timeout_ms {
                continue;
            }
            if shared.pause_on_debug.load(Ordering::Acquire) && debugger_attached() {
                continue;
            }

            error!(
                stalled_ms = stalled_for,
                timeout_ms, "Watchdog expired: control loop stalled, forcing restart"
            );
            std::process::exit(WATCHDOG_EXIT_CODE);
        }
    }
}

impl Default for SoftwareWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for SoftwareWatchdog {
    fn enable(&mut self, timeout: Duration, pause_on_debug: bool) {
        self.shared
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Release);
        self.shared
            .pause_on_debug
            .store(pause_on_debug, Ordering::Release);
        self.refresh();

        if self.supervisor.is_some() {
            warn!("Watchdog already enabled, updated timeout only");
            return;
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || Self::supervise(shared));
        match spawned {
            Ok(handle) => {
                info!(
                    timeout_ms = timeout.as_millis() as u64,
                    pause_on_debug, "Watchdog enabled"
                );
                self.supervisor = Some(handle);
            }
            // Without a supervisor the process simply loses its stall detector
            Err(e) => error!("Failed to start watchdog supervisor: {}", e),
        }
    }

    fn refresh(&mut self) {
        self.shared
            .last_refresh_ms
            .store(self.shared.elapsed_ms(), Ordering::Release);
    }
}

/// Linux reports the tracing process in /proc/self/status
fn debugger_attached() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .map(|pid| pid.trim() != "0")
        })
        .unwrap_or(false)
}
