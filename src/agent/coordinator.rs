//! Main loop / watchdog coordinator
//!
//! A single-threaded cooperative scheduler. Every tick services the network
//! stack, feeds the watchdog, repairs the link and the broker session when
//! their windows allow, then reads and publishes one sample before sleeping
//! in short slices.

use super::scheduler::ReconnectScheduler;
use crate::actuator::{Actuator, Command};
use crate::clock::Clock;
use crate::config::InvalidReadingPolicy;
use crate::link::{LinkMonitor, LinkState, RadioDriver};
use crate::sensor::{Reading, SensorReader};
use crate::transport::mqtt::{BrokerSession, MessageHandler, PublishOutcome, SessionState};
use crate::transport::{NetEvent, NetworkStack};
use crate::watchdog::Watchdog;
use crate::{link_span, session_span, tick_span};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pacing of the cooperative sleep and handling of failed readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub sleep_slices: u32,
    pub slice: Duration,
    pub invalid_reading_policy: InvalidReadingPolicy,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            sleep_slices: 100,
            slice: Duration::from_millis(10),
            invalid_reading_policy: InvalidReadingPolicy::PublishSentinel,
        }
    }
}

/// All agent state, owned by the control loop
pub struct Coordinator<R: RadioDriver, N: NetworkStack> {
    link: LinkMonitor<R>,
    stack: N,
    session: BrokerSession,
    scheduler: ReconnectScheduler,
    sensor: SensorReader,
    actuator: Box<dyn Actuator>,
    watchdog: Box<dyn Watchdog>,
    clock: Arc<dyn Clock>,
    timing: LoopTiming,
    ticks: u64,
    commands_applied: u64,
}

impl<R: RadioDriver, N: NetworkStack> Coordinator<R, N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: LinkMonitor<R>,
        stack: N,
        session: BrokerSession,
        scheduler: ReconnectScheduler,
        sensor: SensorReader,
        actuator: Box<dyn Actuator>,
        watchdog: Box<dyn Watchdog>,
        clock: Arc<dyn Clock>,
        timing: LoopTiming,
    ) -> Self {
        Self {
            link,
            stack,
            session,
            scheduler,
            sensor,
            actuator,
            watchdog,
            clock,
            timing,
            ticks: 0,
            commands_applied: 0,
        }
    }

    pub fn link(&self) -> &LinkMonitor<R> {
        &self.link
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    pub fn scheduler(&self) -> &ReconnectScheduler {
        &self.scheduler
    }

    pub fn stack(&self) -> &N {
        &self.stack
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn commands_applied(&self) -> u64 {
        self.commands_applied
    }

    /// Run forever. There is no terminal state.
    pub fn run(&mut self) -> ! {
        loop {
            self.tick();
        }
    }

    /// Run exactly `n` ticks
    pub fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// One pass of the control loop
    pub fn tick(&mut self) {
        let span = tick_span!(tick = self.ticks);
        let _enter = span.enter();

        self.service_stack();
        self.watchdog.refresh();
        self.maintain_link();
        self.maintain_session();
        let reading = self.sensor.read();
        self.publish_reading(reading);
        self.cooperative_sleep();

        self.ticks += 1;
        let stats = self.session.stats();
        debug!(
            ticks = self.ticks,
            session = ?self.session.state(),
            publishes = stats.publishes,
            publish_failures = stats.publish_failures,
            attempts = stats.attempts,
            commands_applied = self.commands_applied,
            "Tick complete"
        );
    }

    /// Service the radio and the network stack, then dispatch completions
    fn service_stack(&mut self) {
        self.link.poll();
        for event in self.stack.poll() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: NetEvent) {
        match event {
            NetEvent::ResolveComplete { hostname, result } => {
                if hostname != self.session.settings().hostname {
                    debug!(%hostname, "Ignoring resolution for another host");
                    return;
                }
                self.session.on_resolved(&mut self.stack, result);
            }
            NetEvent::ConnectionStatus(status) => {
                self.session.on_connection_status(&mut self.stack, status);
            }
            NetEvent::MessageReceived { topic, payload } => {
                let command = self.session.on_message(&topic, &payload);
                self.actuate(command);
            }
        }
    }

    fn actuate(&mut self, command: Command) {
        if command == Command::Unknown {
            return;
        }
        match self.actuator.apply(command) {
            Ok(()) => self.commands_applied += 1,
            Err(e) => warn!(?command, error = %e, "Could not apply command"),
        }
    }

    /// Step (c): reconnect the wireless link when it is down
    fn maintain_link(&mut self) {
        let link_up = self.link.is_link_up();
        if !link_up && self.session.state() != SessionState::Disconnected {
            self.session.on_link_lost(&mut self.stack);
        }

        let now = self.clock.now();
        if !self.scheduler.admit_link(now, link_up) {
            return;
        }

        let span = link_span!(attempt = self.link.reconnect_attempts() + 1);
        let _enter = span.enter();
        if self.link.reconnect().is_err() {
            debug!("Link still down, retrying next tick");
        }
        // The connect blocks; restart the watchdog window once it returns
        self.watchdog.refresh();
    }

    /// Step (d): start a broker session attempt when one is due
    fn maintain_session(&mut self) {
        let now = self.clock.now();
        let link_up = self.link.state() == LinkState::Up;
        let session_down = self.session.state() == SessionState::Disconnected;
        if !self.scheduler.admit_session(now, link_up, session_down) {
            return;
        }

        let span = session_span!(
            host = %self.session.settings().hostname,
            port = self.session.settings().port
        );
        let _enter = span.enter();
        if let Err(e) = self.session.begin_attempt(&mut self.stack) {
            warn!(error = %e, "Broker session attempt could not start");
        }
    }

    /// Step (f): publish the tick's reading if the session is ready
    fn publish_reading(&mut self, reading: Reading) {
        let Some(payload) =
            MessageHandler::format_reading_payload(reading, self.timing.invalid_reading_policy)
        else {
            debug!("Invalid reading skipped");
            return;
        };

        if self.session.publish(&mut self.stack, payload.as_bytes()) == PublishOutcome::Sent {
            debug!(%payload, "Reading published");
        }
    }

    /// Step (g): sleep in slices, staying responsive to the stack and the watchdog
    fn cooperative_sleep(&mut self) {
        for _ in 0..self.timing.sleep_slices {
            self.service_stack();
            self.watchdog.refresh();
            self.clock.sleep(self.timing.slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ControlActuator;
    use crate::config::WifiCredentials;
    use crate::testing::mocks::{
        ManualClock, MockNetworkStack, MockPin, MockRadio, MockSensor, RecordingWatchdog,
        ResolveMode, StackCall,
    };
    use crate::transport::mqtt::SessionSettings;
    use crate::transport::SessionOptions;
    use std::net::IpAddr;

    const TOPIC: &str = "implementation/bh1750";

    struct Harness {
        radio: MockRadio,
        stack: MockNetworkStack,
        sensor: MockSensor,
        pin: MockPin,
        watchdog: RecordingWatchdog,
        clock: ManualClock,
    }

    fn broker_ip() -> IpAddr {
        "192.0.2.10".parse().unwrap()
    }

    fn build(harness: &Harness) -> Coordinator<MockRadio, MockNetworkStack> {
        let clock: Arc<dyn Clock> = Arc::new(harness.clock.clone());
        let link = LinkMonitor::new(
            harness.radio.clone(),
            WifiCredentials {
                ssid: "test-net".to_string(),
                passphrase: "test-passphrase".to_string(),
            },
            Duration::from_secs(10),
        );
        let session = BrokerSession::new(SessionSettings {
            hostname: "broker.example".to_string(),
            port: 1883,
            topic: TOPIC.to_string(),
            options: SessionOptions {
                client_id: "pico-client".to_string(),
                keep_alive: Duration::from_secs(60),
            },
        });
        let mut watchdog = harness.watchdog.clone();
        watchdog.enable(Duration::from_secs(10), true);

        Coordinator::new(
            link,
            harness.stack.clone(),
            session,
            ReconnectScheduler::new(Duration::ZERO, Duration::from_millis(5000), clock.now()),
            SensorReader::new(Box::new(harness.sensor.clone())),
            Box::new(ControlActuator::new(harness.pin.clone())),
            Box::new(watchdog),
            clock,
            LoopTiming::default(),
        )
    }

    fn harness(stack: MockNetworkStack) -> Harness {
        let clock = ManualClock::new();
        Harness {
            radio: MockRadio::connected(),
            stack,
            sensor: MockSensor::constant(123.45),
            pin: MockPin::new(),
            watchdog: RecordingWatchdog::new(clock.clone()),
            clock,
        }
    }

    #[test]
    fn test_tick_sleeps_in_slices() {
        let h = harness(MockNetworkStack::new(ResolveMode::Pending));
        let mut coordinator = build(&h);

        coordinator.tick();

        assert_eq!(h.clock.now(), Duration::from_millis(1000));
        // One poll in step (a) plus one per slice
        assert_eq!(h.stack.polls(), 101);
        assert_eq!(h.watchdog.refresh_count(), 101);
        assert_eq!(coordinator.ticks(), 1);
    }

    #[test]
    fn test_session_attempt_waits_for_window() {
        let h = harness(MockNetworkStack::healthy(broker_ip()));
        let mut coordinator = build(&h);

        // Ticks start at t = 0s..4s: the window opens at 5s
        coordinator.run_ticks(5);
        assert_eq!(h.stack.resolve_calls(), 0);

        coordinator.tick();
        assert_eq!(h.stack.resolve_calls(), 1);
        assert_eq!(coordinator.session().state(), SessionState::Subscribed);
    }

    #[test]
    fn test_no_publish_until_subscribed() {
        let h = harness(MockNetworkStack::new(ResolveMode::Pending));
        let mut coordinator = build(&h);

        coordinator.run_ticks(10);

        assert!(h.stack.published().is_empty());
        assert!(!h
            .stack
            .calls()
            .iter()
            .any(|call| matches!(call, StackCall::Publish { .. })));
        assert_eq!(coordinator.session().stats().publishes_dropped, 10);
    }

    #[test]
    fn test_link_down_reconnects_every_tick() {
        let h = harness(MockNetworkStack::new(ResolveMode::Pending));
        h.radio.drop_link();
        h.radio.set_connect_fails(true);
        let mut coordinator = build(&h);

        coordinator.run_ticks(3);

        assert_eq!(h.radio.connect_calls(), 3);
        assert_eq!(h.stack.resolve_calls(), 0);
    }

    #[test]
    fn test_inbound_command_drives_output() {
        let h = harness(MockNetworkStack::new(ResolveMode::Pending));
        let mut coordinator = build(&h);

        h.stack.push_event(NetEvent::MessageReceived {
            topic: TOPIC.to_string(),
            payload: b"turn on now".to_vec(),
        });
        h.stack.push_event(NetEvent::MessageReceived {
            topic: TOPIC.to_string(),
            payload: b"status".to_vec(),
        });
        coordinator.tick();

        assert_eq!(h.pin.history(), vec![true]);
        assert_eq!(coordinator.commands_applied(), 1);
    }

    #[test]
    fn test_link_loss_drops_session() {
        let h = harness(MockNetworkStack::healthy(broker_ip()));
        let mut coordinator = build(&h);
        coordinator.run_ticks(6);
        assert_eq!(coordinator.session().state(), SessionState::Subscribed);

        h.radio.drop_link();
        h.radio.set_connect_fails(true);
        coordinator.tick();

        assert_eq!(coordinator.session().state(), SessionState::Disconnected);
        assert_eq!(coordinator.link().state(), LinkState::Down);
    }
}
