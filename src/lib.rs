//! luxagent - light sensor telemetry agent
//!
//! Keeps a device attached to a wireless network and an MQTT broker, publishes
//! one illuminance reading per second and switches an output on remote
//! command. Everything runs in one cooperative control loop guarded by a
//! liveness watchdog.
//!
//! # Overview
//!
//! - [`link`] - wireless link monitoring and reconnection
//! - [`transport`] - network stack seam and the MQTT broker session state machine
//! - [`sensor`] - illuminance sensors (BH1750 over I2C, Linux IIO)
//! - [`actuator`] - on/off output driven by inbound commands
//! - [`agent`] - bootstrap, reconnection scheduling and the control loop
//! - [`watchdog`], [`clock`] - liveness and time
//!
//! # Quick Start
//!
//! ```rust
//! use luxagent::transport::mqtt::MessageHandler;
//! use luxagent::actuator::Command;
//! use luxagent::sensor::Reading;
//! use luxagent::config::InvalidReadingPolicy;
//!
//! assert_eq!(MessageHandler::decode_command(b"turn on now"), Command::On);
//!
//! let payload = MessageHandler::format_reading_payload(
//!     Reading::Lux(123.45),
//!     InvalidReadingPolicy::PublishSentinel,
//! );
//! assert_eq!(payload.as_deref(), Some("123.45"));
//! ```

pub mod actuator;
pub mod agent;
pub mod clock;
pub mod config;
pub mod error;
pub mod link;
pub mod observability;
pub mod sensor;
pub mod testing;
pub mod transport;
pub mod watchdog;

pub use agent::{AgentLifecycle, Coordinator};
pub use config::*;
pub use error::{AgentError, AgentResult};
pub use transport::mqtt::RumqttcStack;
