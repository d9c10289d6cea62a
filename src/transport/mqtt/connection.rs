//! Pure connection state management for the broker session
//!
//! Session states, transport errors, reconnection timers and client option
//! construction. Nothing in here performs I/O.

use crate::transport::SessionOptions;
use rumqttc::v5::MqttOptions;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle of the broker session
///
/// The only path to `Subscribed` is
/// `Disconnected → Resolving → Connecting → Connected → Subscribed`;
/// every failure leads straight back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session and no attempt in flight
    Disconnected,
    /// Broker hostname resolution in flight
    Resolving,
    /// Waiting for the broker's CONNACK
    Connecting,
    /// CONNACK accepted, subscription not yet issued
    Connected,
    /// Subscribed to the topic, ready to publish
    Subscribed,
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Resolution of '{0}' already in progress")]
    ResolveInProgress(String),
    #[error("Resolver error: {0}")]
    ResolveFailed(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },
    #[error("Network stack unavailable: {0}")]
    StackUnavailable(String),
}

/// Admission gate for one recoverable resource
///
/// Remembers when the last attempt started. An attempt is admitted once at
/// least `interval` has passed since then. There is no attempt counter and
/// no backoff: the gate only spaces attempts out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectTimer {
    interval: Duration,
    last_attempt: Duration,
}

impl ReconnectTimer {
    /// Create a timer whose window starts at `now`
    pub fn new(interval: Duration, now: Duration) -> Self {
        Self {
            interval,
            last_attempt: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_attempt(&self) -> Duration {
        self.last_attempt
    }

    /// Time elapsed since the last attempt started
    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_attempt)
    }

    /// Time left before the window opens (zero when already open)
    pub fn remaining(&self, now: Duration) -> Duration {
        self.interval.saturating_sub(self.elapsed(now))
    }

    pub fn window_open(&self, now: Duration) -> bool {
        self.elapsed(now) >= self.interval
    }

    /// Record an attempt starting at `now`
    pub fn record_attempt(&mut self, now: Duration) {
        self.last_attempt = now;
    }
}

/// Build rumqttc options for a session to an already-resolved address
///
/// The address is passed as a literal so rumqttc never resolves on its own;
/// resolution belongs to the session state machine.
pub fn configure_mqtt_options(addr: SocketAddr, options: &SessionOptions) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(options.client_id.clone(), addr.ip().to_string(), addr.port());
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(true);
    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_window_opens_after_interval() {
        let start = Duration::from_secs(100);
        let timer = ReconnectTimer::new(Duration::from_millis(5000), start);

        assert!(!timer.window_open(start));
        assert!(!timer.window_open(start + Duration::from_millis(4999)));
        assert!(timer.window_open(start + Duration::from_millis(5000)));
        assert_eq!(
            timer.remaining(start + Duration::from_millis(1000)),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_timer_record_restarts_window() {
        let mut timer = ReconnectTimer::new(Duration::from_millis(5000), Duration::ZERO);
        let now = Duration::from_millis(6000);
        assert!(timer.window_open(now));

        timer.record_attempt(now);
        assert_eq!(timer.last_attempt(), now);
        assert!(!timer.window_open(now));
        assert_eq!(timer.remaining(now), Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_interval_is_always_open() {
        let mut timer = ReconnectTimer::new(Duration::ZERO, Duration::from_secs(1));
        assert!(timer.window_open(Duration::from_secs(1)));
        timer.record_attempt(Duration::from_secs(2));
        assert!(timer.window_open(Duration::from_secs(2)));
    }

    #[test]
    fn test_clock_going_backwards_does_not_underflow() {
        let timer = ReconnectTimer::new(Duration::from_millis(5000), Duration::from_secs(10));
        assert_eq!(timer.elapsed(Duration::from_secs(5)), Duration::ZERO);
        assert!(!timer.window_open(Duration::from_secs(5)));
    }

    #[test]
    fn test_configure_mqtt_options_uses_literal_address() {
        let addr: SocketAddr = "192.0.2.10:1883".parse().unwrap();
        let options = SessionOptions {
            client_id: "pico-client".to_string(),
            keep_alive: Duration::from_secs(60),
        };

        let mqtt_options = configure_mqtt_options(addr, &options);
        assert_eq!(mqtt_options.client_id(), "pico-client");
        assert_eq!(
            mqtt_options.broker_address(),
            ("192.0.2.10".to_string(), 1883)
        );
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::ResolveInProgress("broker".to_string()),
            MqttError::ResolveFailed("nxdomain".to_string()),
            MqttError::NotConnected {
                state: SessionState::Disconnected,
            },
            MqttError::StackUnavailable("test".to_string()),
        ];

        for error in errors {
            let error_string = error.to_string();
            assert!(!error_string.is_empty());
        }
    }
}
