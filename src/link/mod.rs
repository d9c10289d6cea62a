//! Wireless link supervision
//!
//! The [`RadioDriver`] trait is the seam to the radio firmware. [`LinkMonitor`]
//! owns the driver, reports the live association status and performs the
//! blocking reconnect when the scheduler admits one.

pub mod host;

pub use host::HostRadio;

use crate::config::WifiCredentials;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Association state of the station interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up,
}

/// Radio driver errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Radio initialization failed: {0}")]
    InitFailed(String),
    #[error("Association with '{ssid}' timed out after {timeout_ms}ms")]
    Timeout { ssid: String, timeout_ms: u64 },
    #[error("Association with '{ssid}' failed: {reason}")]
    ConnectFailed { ssid: String, reason: String },
    #[error("Radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Primitives exposed by the wireless radio driver
pub trait RadioDriver {
    /// Bring up the radio firmware
    fn init(&mut self) -> Result<(), LinkError>;

    /// Switch the radio into station (client) mode
    fn enable_station_mode(&mut self);

    /// Associate with the network, blocking for at most `timeout`
    fn connect_with_timeout(
        &mut self,
        credentials: &WifiCredentials,
        timeout: Duration,
    ) -> Result<(), LinkError>;

    /// Service the driver's internal work queue
    fn poll(&mut self);

    /// Live association status as reported by the driver
    fn link_status(&self) -> LinkState;

    /// Drive the board's link indicator, if it has one
    fn set_indicator(&mut self, _on: bool) {}
}

/// Tracks the wireless link and performs reconnects
pub struct LinkMonitor<R: RadioDriver> {
    radio: R,
    credentials: WifiCredentials,
    connect_timeout: Duration,
    observed: LinkState,
    reconnect_attempts: u64,
}

impl<R: RadioDriver> LinkMonitor<R> {
    pub fn new(radio: R, credentials: WifiCredentials, connect_timeout: Duration) -> Self {
        Self {
            radio,
            credentials,
            connect_timeout,
            observed: LinkState::Down,
            reconnect_attempts: 0,
        }
    }

    /// Initialize the radio and enter station mode
    pub fn init(&mut self) -> Result<(), LinkError> {
        self.radio.init()?;
        self.radio.enable_station_mode();
        info!(ssid = %self.credentials.ssid, "Radio initialized in station mode");
        Ok(())
    }

    /// Query the driver for the live status. Never cached.
    pub fn is_link_up(&mut self) -> bool {
        let status = self.radio.link_status();
        self.observe(status);
        status == LinkState::Up
    }

    /// Last status seen by [`is_link_up`](Self::is_link_up) or [`reconnect`](Self::reconnect)
    pub fn state(&self) -> LinkState {
        self.observed
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Run one blocking association attempt. Failures are returned for the
    /// caller to log; retrying is left to the reconnection scheduler.
    pub fn reconnect(&mut self) -> Result<(), LinkError> {
        self.reconnect_attempts += 1;
        info!(
            ssid = %self.credentials.ssid,
            attempt = self.reconnect_attempts,
            timeout_ms = self.connect_timeout.as_millis() as u64,
            "Connecting to wireless network"
        );

        match self
            .radio
            .connect_with_timeout(&self.credentials, self.connect_timeout)
        {
            Ok(()) => {
                self.radio.set_indicator(true);
                let status = self.radio.link_status();
                self.observe(status);
                Ok(())
            }
            Err(e) => {
                warn!(ssid = %self.credentials.ssid, error = %e, "Wireless connect failed");
                Err(e)
            }
        }
    }

    /// Service the radio driver
    pub fn poll(&mut self) {
        self.radio.poll();
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    fn observe(&mut self, status: LinkState) {
        if status == self.observed {
            return;
        }
        match status {
            LinkState::Up => info!(ssid = %self.credentials.ssid, "Wireless link up"),
            LinkState::Down => error!(ssid = %self.credentials.ssid, "Wireless link lost"),
        }
        self.observed = status;
    }
}
