//! Broker session state machine
//!
//! Drives a [`NetworkStack`] through resolve → connect → subscribe and back to
//! `Disconnected` on any failure. Transitions are computed by
//! [`HealthMonitor::determine_next_state`]; this module only performs the I/O
//! each transition calls for.

use super::connection::{MqttError, SessionState};
use super::health_monitor::{HealthMonitor, SessionEvent, SessionStats};
use super::message_handler::MessageHandler;
use crate::actuator::Command;
use crate::transport::{ConnectionStatus, NetworkStack, ResolveOutcome, SessionOptions};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info, warn};

/// Static parameters of the broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub hostname: String,
    pub port: u16,
    /// Topic readings are published to and commands arrive on
    pub topic: String,
    pub options: SessionOptions,
}

/// Result of a publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport
    Sent,
    /// Session not subscribed; nothing was sent
    NotReady,
    /// The transport rejected the request; the payload is dropped
    Failed,
}

/// The broker session
pub struct BrokerSession {
    settings: SessionSettings,
    state: SessionState,
    address: Option<IpAddr>,
    stats: SessionStats,
}

impl BrokerSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            state: SessionState::Disconnected,
            address: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resolved broker address; only set between a successful resolve and the next failure
    pub fn broker_address(&self) -> Option<IpAddr> {
        self.address
    }

    /// True when readings may be published
    pub fn is_ready(&self) -> bool {
        HealthMonitor::can_publish(self.state)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new attempt: `Disconnected → Resolving` and issue the resolve
    ///
    /// A synchronous answer continues straight into [`connect`](Self::connect).
    /// A dispatch error returns the session to `Disconnected` and is handed
    /// back to the caller.
    pub fn begin_attempt<N: NetworkStack + ?Sized>(
        &mut self,
        stack: &mut N,
    ) -> Result<(), MqttError> {
        if self.state != SessionState::Disconnected {
            debug!(state = ?self.state, "Session attempt already in progress");
            return Ok(());
        }

        self.stats.attempts += 1;
        self.transition(SessionEvent::AttemptStarted);

        match stack.resolve(&self.settings.hostname) {
            Ok(ResolveOutcome::Resolved(ip)) => {
                debug!(hostname = %self.settings.hostname, %ip, "Broker address resolved immediately");
                self.on_resolved(stack, Ok(ip));
                Ok(())
            }
            Ok(ResolveOutcome::Pending) => {
                debug!(hostname = %self.settings.hostname, "Waiting for broker address");
                Ok(())
            }
            Err(e) => {
                self.stats.resolve_failures += 1;
                self.fail(stack, format!("resolve dispatch failed: {e}"));
                Err(e)
            }
        }
    }

    /// Completion of the hostname resolution
    ///
    /// Ignored unless the session is `Resolving`.
    pub fn on_resolved<N: NetworkStack + ?Sized>(
        &mut self,
        stack: &mut N,
        result: Result<IpAddr, String>,
    ) {
        if self.state != SessionState::Resolving {
            debug!(state = ?self.state, "Ignoring stale resolve completion");
            return;
        }

        match result {
            Ok(ip) => {
                self.address = Some(ip);
                self.connect(stack, ip);
            }
            Err(reason) => {
                self.stats.resolve_failures += 1;
                self.fail(
                    stack,
                    format!("could not resolve {}: {reason}", self.settings.hostname),
                );
            }
        }
    }

    /// Open the transport session to `address:port`: `Resolving → Connecting`
    pub fn connect<N: NetworkStack + ?Sized>(&mut self, stack: &mut N, address: IpAddr) {
        if self.state != SessionState::Resolving {
            debug!(state = ?self.state, "Connect requested outside Resolving, ignored");
            return;
        }

        let target = SocketAddr::new(address, self.settings.port);
        match stack.connect(target, &self.settings.options) {
            Ok(()) => {
                debug!(%target, client_id = %self.settings.options.client_id, "Connect issued");
                self.transition(SessionEvent::ConnectIssued);
            }
            Err(e) => self.fail(stack, format!("connect to {target} failed: {e}")),
        }
    }

    /// Connection status reported by the transport
    ///
    /// `Accepted` while `Connecting` subscribes to the topic and marks the
    /// session ready. Any other status tears the session down.
    pub fn on_connection_status<N: NetworkStack + ?Sized>(
        &mut self,
        stack: &mut N,
        status: ConnectionStatus,
    ) {
        match (self.state, status) {
            (SessionState::Disconnected, status) => {
                debug!(?status, "Ignoring connection status while disconnected");
            }
            (SessionState::Connecting, ConnectionStatus::Accepted) => {
                self.transition(SessionEvent::ConnAckAccepted);
                self.subscribe(stack);
            }
            (state, ConnectionStatus::Accepted) => {
                debug!(?state, "Ignoring unexpected CONNACK");
            }
            (_, ConnectionStatus::Refused(code)) => {
                self.fail(stack, format!("broker refused connection: {code}"));
            }
            (_, ConnectionStatus::Timeout) => {
                self.fail(stack, "connection timed out".to_string());
            }
            (_, ConnectionStatus::Disconnected(reason)) => {
                self.fail(stack, format!("connection dropped: {reason}"));
            }
        }
    }

    fn subscribe<N: NetworkStack + ?Sized>(&mut self, stack: &mut N) {
        if !HealthMonitor::can_subscribe(self.state) {
            return;
        }

        let qos = MessageHandler::determine_qos_level();
        match stack.subscribe(&self.settings.topic, qos) {
            Ok(()) => {
                self.transition(SessionEvent::SubscribeIssued);
                self.stats.sessions_established += 1;
                info!(topic = %self.settings.topic, "Subscribed to topic");
            }
            Err(e) => self.fail(stack, format!("subscribe request failed: {e}")),
        }
    }

    /// Publish a payload on the session topic
    ///
    /// Only `Subscribed` sessions touch the transport. Transport errors are
    /// logged and the payload dropped; the session state is unchanged.
    pub fn publish<N: NetworkStack + ?Sized>(
        &mut self,
        stack: &mut N,
        payload: &[u8],
    ) -> PublishOutcome {
        if !self.is_ready() {
            self.stats.publishes_dropped += 1;
            debug!(state = ?self.state, "Session not ready, reading not published");
            return PublishOutcome::NotReady;
        }

        let qos = MessageHandler::determine_qos_level();
        match stack.publish(&self.settings.topic, payload, qos, false) {
            Ok(()) => {
                self.stats.publishes += 1;
                debug!(target: "mqtt_transport", topic = %self.settings.topic, bytes = payload.len(), "Published");
                PublishOutcome::Sent
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(topic = %self.settings.topic, error = %e, "Publish failed, reading dropped");
                PublishOutcome::Failed
            }
        }
    }

    /// Decode an inbound message into a command
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Command {
        self.stats.messages_received += 1;
        if !MessageHandler::should_process_message(topic, &self.settings.topic) {
            return Command::Unknown;
        }

        let command = MessageHandler::decode_command(payload);
        if command == Command::Unknown {
            info!(
                topic,
                payload = %String::from_utf8_lossy(payload),
                "Unrecognized command"
            );
        }
        command
    }

    /// The wireless link dropped underneath the session
    pub fn on_link_lost<N: NetworkStack + ?Sized>(&mut self, stack: &mut N) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.fail(stack, "wireless link lost".to_string());
    }

    /// Every failure path: drop the transport session, forget the address
    fn fail<N: NetworkStack + ?Sized>(&mut self, stack: &mut N, reason: String) {
        if self.state == SessionState::Subscribed {
            self.stats.sessions_lost += 1;
        }
        stack.disconnect();
        self.address = None;
        self.transition(SessionEvent::Failure(reason));
    }

    fn transition(&mut self, event: SessionEvent) {
        let next = HealthMonitor::determine_next_state(self.state, &event);
        if next != self.state {
            HealthMonitor::log_state_transition(self.state, next, &event);
            self.state = next;
        }
    }
}
