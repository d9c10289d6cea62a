//! Pure message routing and processing logic for MQTT events
//!
//! Maps rumqttc events onto [`NetEvent`]s, decodes inbound commands and
//! formats outbound readings.

use crate::actuator::Command;
use crate::config::InvalidReadingPolicy;
use crate::sensor::Reading;
use crate::transport::{ConnectionStatus, NetEvent};
use rumqttc::v5::{mqttbytes::QoS, ConnectionError, Event};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Classify an inbound payload (pure function)
    ///
    /// The payload is treated as text. A payload containing `"on"` turns the
    /// output on, otherwise one containing `"off"` turns it off. The check is
    /// case-sensitive and `"on"` is tested first, so `"onoff"` means on.
    pub fn decode_command(payload: &[u8]) -> Command {
        let text = String::from_utf8_lossy(payload);
        if text.contains("on") {
            Command::On
        } else if text.contains("off") {
            Command::Off
        } else {
            Command::Unknown
        }
    }

    /// Format a reading for publishing (pure function)
    ///
    /// Returns `None` when the policy says an invalid reading is not published.
    pub fn format_reading_payload(
        reading: Reading,
        policy: InvalidReadingPolicy,
    ) -> Option<String> {
        match (reading, policy) {
            (Reading::Invalid, InvalidReadingPolicy::Skip) => None,
            (reading, _) => Some(format!("{:.2}", reading.value())),
        }
    }

    /// Determine if an inbound message is for us (pure function)
    pub fn should_process_message(topic: &str, expected_topic: &str) -> bool {
        if topic != expected_topic {
            debug!("Topic mismatch: expected {}, got {}", expected_topic, topic);
            return false;
        }
        true
    }

    /// Readings and subscriptions both use "at most once"
    pub fn determine_qos_level() -> QoS {
        QoS::AtMostOnce
    }

    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                    },
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Map an event-loop error onto the session's connection status (pure function)
    pub fn route_connection_error(error: &ConnectionError) -> ConnectionStatus {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                ConnectionStatus::Refused(format!("{code:?}"))
            }
            other => ConnectionStatus::Disconnected(other.to_string()),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK received with a success code
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent DISCONNECT
    Disconnected,
    /// SUBACK; subscriptions are fire-and-forget so this is informational
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

impl EventRoute {
    /// The session-visible part of a route, if any
    pub fn into_net_event(self) -> Option<NetEvent> {
        match self {
            EventRoute::ConnectionAcknowledged => {
                Some(NetEvent::ConnectionStatus(ConnectionStatus::Accepted))
            }
            EventRoute::MessageReceived { topic, payload } => {
                Some(NetEvent::MessageReceived { topic, payload })
            }
            EventRoute::Disconnected => Some(NetEvent::ConnectionStatus(
                ConnectionStatus::Disconnected("broker sent DISCONNECT".to_string()),
            )),
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(target: "mqtt_transport", "Subscription confirmed: pkid {}", packet_id);
                None
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                None
            }
            EventRoute::OutgoingEvent => None,
        }
    }
}
