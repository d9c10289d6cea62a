//! MQTT broker session
//!
//! Split the same way as the rest of the transport layer: pure logic apart
//! from I/O.
//!
//! - [`connection`] - session state, errors, reconnect timers, client options
//! - [`health_monitor`] - pure state transitions and admission decisions
//! - [`message_handler`] - pure event routing, command decoding, payload formatting
//! - [`session`] - the broker session state machine
//! - [`client`] - rumqttc-backed [`NetworkStack`](crate::transport::NetworkStack)
//!
//! # Usage
//!
//! ```rust,no_run
//! use luxagent::transport::mqtt::{BrokerSession, RumqttcStack, SessionSettings};
//! use luxagent::transport::SessionOptions;
//! use std::time::Duration;
//!
//! let mut stack = RumqttcStack::new()?;
//! let mut session = BrokerSession::new(SessionSettings {
//!     hostname: "broker.hivemq.com".to_string(),
//!     port: 1883,
//!     topic: "implementation/bh1750".to_string(),
//!     options: SessionOptions {
//!         client_id: "pico-client".to_string(),
//!         keep_alive: Duration::from_secs(60),
//!     },
//! });
//! session.begin_attempt(&mut stack)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod session;

pub use client::RumqttcStack;
pub use connection::{configure_mqtt_options, MqttError, ReconnectTimer, SessionState};
pub use health_monitor::{HealthMonitor, ReconnectionDecision, SessionEvent, SessionStats};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::{BrokerSession, PublishOutcome, SessionSettings};
