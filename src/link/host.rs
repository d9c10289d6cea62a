//! Radio driver for hosts whose network is managed by the operating system
//!
//! There is no radio to command here. The link is considered up when the
//! routing table yields a non-loopback source address for the probe
//! destination; connecting simply waits for that to become true.

use super::{LinkError, LinkState, RadioDriver};
use crate::config::WifiCredentials;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROBE_INTERVAL: Duration = Duration::from_millis(250);

pub struct HostRadio {
    route_probe: SocketAddr,
    station_mode: bool,
    indicator: bool,
}

impl HostRadio {
    pub fn new(route_probe: SocketAddr) -> Self {
        Self {
            route_probe,
            station_mode: false,
            indicator: false,
        }
    }

    /// Ask the kernel which source address it would use for the probe.
    /// Connecting a UDP socket sends nothing on the wire.
    fn probe_route(&self) -> Option<SocketAddr> {
        let bind_addr: SocketAddr = if self.route_probe.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).ok()?;
        socket.connect(self.route_probe).ok()?;
        let local = socket.local_addr().ok()?;
        (!local.ip().is_unspecified() && !local.ip().is_loopback()).then_some(local)
    }

    pub fn indicator(&self) -> bool {
        self.indicator
    }
}

impl RadioDriver for HostRadio {
    fn init(&mut self) -> Result<(), LinkError> {
        // Confirms the host lets us open sockets at all
        UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
            .map_err(|e| LinkError::InitFailed(format!("cannot open probe socket: {e}")))?;
        Ok(())
    }

    fn enable_station_mode(&mut self) {
        self.station_mode = true;
        debug!("Host radio: station mode is managed by the operating system");
    }

    fn connect_with_timeout(
        &mut self,
        credentials: &WifiCredentials,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        if !self.station_mode {
            return Err(LinkError::ConnectFailed {
                ssid: credentials.ssid.clone(),
                reason: "station mode not enabled".to_string(),
            });
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(local) = self.probe_route() {
                info!(local_addr = %local, "Host network route available");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LinkError::Timeout {
                    ssid: credentials.ssid.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(PROBE_INTERVAL.min(deadline - now));
        }
    }

    fn poll(&mut self) {}

    fn link_status(&self) -> LinkState {
        if self.station_mode && self.probe_route().is_some() {
            LinkState::Up
        } else {
            LinkState::Down
        }
    }

    fn set_indicator(&mut self, on: bool) {
        if self.indicator != on {
            debug!(on, "Link indicator");
        }
        self.indicator = on;
    }
}
