//! Network stack abstraction
//!
//! The broker session never talks to sockets directly. It drives a
//! [`NetworkStack`], whose asynchronous completions (resolution results,
//! connection status, inbound messages) come back as [`NetEvent`] values from
//! [`NetworkStack::poll`]. The control loop dispatches them on its own thread,
//! so no handler ever runs concurrently with another.

use rumqttc::v5::mqttbytes::QoS;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub mod mqtt;

pub use mqtt::MqttError;

/// Result of issuing a hostname resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Answered immediately (literal address or cached entry)
    Resolved(IpAddr),
    /// A [`NetEvent::ResolveComplete`] will follow from `poll`
    Pending,
}

/// Broker connection status reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// CONNACK with a success code
    Accepted,
    /// The broker answered with a refusal code
    Refused(String),
    /// No answer within the transport's connection timeout
    Timeout,
    /// The connection dropped (I/O error, broker DISCONNECT, keep-alive expiry)
    Disconnected(String),
}

/// Completions delivered by [`NetworkStack::poll`]
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    ResolveComplete {
        hostname: String,
        result: Result<IpAddr, String>,
    },
    ConnectionStatus(ConnectionStatus),
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
    },
}

/// Parameters for opening a broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: String,
    pub keep_alive: Duration,
}

/// Primitives of the device network stack: resolver plus MQTT transport
pub trait NetworkStack {
    /// Run the stack's pending work and collect completed events
    fn poll(&mut self) -> Vec<NetEvent>;

    /// Start resolving `hostname`. At most one resolution per hostname may be in flight.
    fn resolve(&mut self, hostname: &str) -> Result<ResolveOutcome, MqttError>;

    /// Open a new broker session; the outcome arrives as a [`NetEvent::ConnectionStatus`]
    fn connect(&mut self, addr: SocketAddr, options: &SessionOptions) -> Result<(), MqttError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), MqttError>;

    /// Drop the current session, if any. Never produces events.
    fn disconnect(&mut self);
}
