//! Impure I/O operations for the MQTT transport
//!
//! [`RumqttcStack`] implements [`NetworkStack`] on top of rumqttc and the tokio
//! resolver. It owns a current-thread runtime that only advances inside
//! [`NetworkStack::poll`], so every completion is handed to the caller on the
//! caller's own thread.

use super::connection::{configure_mqtt_options, MqttError, SessionState};
use super::message_handler::MessageHandler;
use bytes::Bytes;
use crate::transport::{ConnectionStatus, NetEvent, NetworkStack, ResolveOutcome, SessionOptions};
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long one `poll` lets the runtime run
pub const DEFAULT_POLL_BUDGET: Duration = Duration::from_millis(1);

/// How long a connect may wait for CONNACK before it is reported as a timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 10;

/// Completions produced by background tasks
#[derive(Debug)]
enum Completion {
    Resolved {
        hostname: String,
        result: Result<IpAddr, String>,
    },
    /// Tagged with the session generation so events from an aborted
    /// event loop never reach a newer session
    Session { generation: u64, event: NetEvent },
}

struct ActiveSession {
    client: AsyncClient,
    event_loop_handle: JoinHandle<()>,
    generation: u64,
    /// Set until CONNACK arrives
    connect_deadline: Option<Instant>,
}

/// rumqttc-backed network stack
pub struct RumqttcStack {
    runtime: Runtime,
    poll_budget: Duration,
    connect_timeout: Duration,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    resolving: HashSet<String>,
    session: Option<ActiveSession>,
    next_generation: u64,
}

impl RumqttcStack {
    pub fn new() -> Result<Self, MqttError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MqttError::StackUnavailable(e.to_string()))?;
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime,
            poll_budget: DEFAULT_POLL_BUDGET,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            completions_tx,
            completions_rx,
            resolving: HashSet::new(),
            session: None,
            next_generation: 0,
        })
    }

    /// Let the runtime run for `budget` on every poll
    pub fn with_poll_budget(mut self, budget: Duration) -> Self {
        self.poll_budget = budget;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// True while a transport session exists (connecting or connected)
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        self.session
            .as_ref()
            .map(|session| &session.client)
            .ok_or(MqttError::NotConnected {
                state: SessionState::Disconnected,
            })
    }

    /// Report and drop a session whose CONNACK never arrived
    fn check_connect_deadline(&mut self, events: &mut Vec<NetEvent>) {
        let expired = self
            .session
            .as_ref()
            .and_then(|session| session.connect_deadline)
            .is_some_and(|deadline| Instant::now() >= deadline);

        if expired {
            warn!(target: "mqtt_transport", timeout = ?self.connect_timeout, "No CONNACK before deadline");
            self.disconnect();
            events.push(NetEvent::ConnectionStatus(ConnectionStatus::Timeout));
        }
    }

    fn accept(&mut self, completion: Completion, events: &mut Vec<NetEvent>) {
        match completion {
            Completion::Resolved { hostname, result } => {
                self.resolving.remove(&hostname);
                events.push(NetEvent::ResolveComplete { hostname, result });
            }
            Completion::Session { generation, event } => {
                let Some(session) = self.session.as_mut() else {
                    debug!(target: "mqtt_transport", "Dropping event for closed session");
                    return;
                };
                if session.generation != generation {
                    debug!(target: "mqtt_transport", generation, "Dropping event from stale session");
                    return;
                }

                match &event {
                    NetEvent::ConnectionStatus(ConnectionStatus::Accepted) => {
                        session.connect_deadline = None;
                    }
                    NetEvent::ConnectionStatus(_) => {
                        // The event loop task has already exited
                        self.session = None;
                    }
                    _ => {}
                }
                events.push(event);
            }
        }
    }
}

/// Drive one rumqttc event loop until its first error
///
/// rumqttc would reconnect on the next poll after an error; stopping here
/// leaves every reconnect decision to the session's own scheduler.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    generation: u64,
    completions: mpsc::UnboundedSender<Completion>,
) {
    loop {
        match event_loop.poll().await {
            Ok(event) => {
                let route = MessageHandler::route_mqtt_event(&event);
                if let Some(event) = route.into_net_event() {
                    if completions
                        .send(Completion::Session { generation, event })
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(target: "mqtt_transport", error = %e, "MQTT event loop stopped");
                let status = MessageHandler::route_connection_error(&e);
                let _ = completions.send(Completion::Session {
                    generation,
                    event: NetEvent::ConnectionStatus(status),
                });
                return;
            }
        }
    }
}

async fn lookup(hostname: String) -> Result<IpAddr, String> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hostname.as_str(), 0))
        .await
        .map_err(|e| e.to_string())?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("no addresses for {hostname}"))
}

impl NetworkStack for RumqttcStack {
    fn poll(&mut self) -> Vec<NetEvent> {
        // The timer must be created inside the runtime, which owns the time driver
        let budget = self.poll_budget;
        self.runtime
            .block_on(async move { tokio::time::sleep(budget).await });

        let mut events = Vec::new();
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.accept(completion, &mut events);
        }
        self.check_connect_deadline(&mut events);
        events
    }

    fn resolve(&mut self, hostname: &str) -> Result<ResolveOutcome, MqttError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(ResolveOutcome::Resolved(ip));
        }
        if !self.resolving.insert(hostname.to_string()) {
            return Err(MqttError::ResolveInProgress(hostname.to_string()));
        }

        let completions = self.completions_tx.clone();
        let hostname = hostname.to_string();
        self.runtime.spawn(async move {
            let result = lookup(hostname.clone()).await;
            let _ = completions.send(Completion::Resolved { hostname, result });
        });
        Ok(ResolveOutcome::Pending)
    }

    fn connect(&mut self, addr: SocketAddr, options: &SessionOptions) -> Result<(), MqttError> {
        self.disconnect();

        let mqtt_options = configure_mqtt_options(addr, options);
        let _guard = self.runtime.enter();
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let generation = self.next_generation;
        self.next_generation += 1;
        let event_loop_handle = self.runtime.spawn(drive_event_loop(
            event_loop,
            generation,
            self.completions_tx.clone(),
        ));

        info!(target: "mqtt_transport", %addr, client_id = %options.client_id, "Opening MQTT session");
        self.session = Some(ActiveSession {
            client,
            event_loop_handle,
            generation,
            connect_deadline: Some(Instant::now() + self.connect_timeout),
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.client()?
            .try_subscribe(topic.to_string(), qos)
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.client()?
            .try_publish(topic.to_string(), qos, retain, Bytes::copy_from_slice(payload))
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.event_loop_handle.abort();
            debug!(target: "mqtt_transport", generation = session.generation, "MQTT session closed");
        }
    }
}

impl Drop for RumqttcStack {
    fn drop(&mut self) {
        self.disconnect();
    }
}
