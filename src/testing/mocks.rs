//! Mock implementations for testing
//!
//! Provides mock radio, network stack, sensor, output pin, clock and watchdog
//! implementations so the control loop can be exercised without hardware or a
//! broker. Every mock is a cheap handle around shared state: clone it, hand
//! one copy to the code under test and inspect the other.

use crate::clock::Clock;
use crate::config::WifiCredentials;
use crate::link::{LinkError, LinkState, RadioDriver};
use crate::sensor::{LightSensor, SensorError};
use crate::transport::{
    ConnectionStatus, MqttError, NetEvent, NetworkStack, ResolveOutcome, SessionOptions,
};
use crate::watchdog::Watchdog;
use embedded_hal::digital::{ErrorType, OutputPin};
use rumqttc::v5::mqttbytes::QoS;
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock shared mock state, ignoring poisoning from a panicked test thread
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Virtual clock: time only moves when a test (or a sleep) moves it
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start: Duration) -> Self {
        let clock = Self::new();
        clock.set(start);
        clock
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn set(&self, now: Duration) {
        *lock(&self.now) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug, Default)]
struct RadioState {
    link_up: bool,
    station_mode: bool,
    indicator: bool,
    init_fails: bool,
    connect_fails: bool,
    connect_calls: u32,
    last_connect_timeout: Option<Duration>,
    polls: u64,
    /// Virtual time consumed by each blocking connect
    connect_cost: Option<(ManualClock, Duration)>,
}

/// Mock wireless radio
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio whose link is already associated
    pub fn connected() -> Self {
        let radio = Self::new();
        lock(&radio.state).link_up = true;
        radio
    }

    pub fn set_init_fails(&self, fails: bool) {
        lock(&self.state).init_fails = fails;
    }

    pub fn set_connect_fails(&self, fails: bool) {
        lock(&self.state).connect_fails = fails;
    }

    /// Make every connect attempt advance `clock` by `cost`, as a blocking connect would
    pub fn set_connect_cost(&self, clock: ManualClock, cost: Duration) {
        lock(&self.state).connect_cost = Some((clock, cost));
    }

    /// Simulate the access point going away
    pub fn drop_link(&self) {
        lock(&self.state).link_up = false;
    }

    pub fn indicator(&self) -> bool {
        lock(&self.state).indicator
    }

    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connect_calls
    }

    /// Timeout passed to the most recent connect
    pub fn last_connect_timeout(&self) -> Option<Duration> {
        lock(&self.state).last_connect_timeout
    }

    pub fn polls(&self) -> u64 {
        lock(&self.state).polls
    }

    pub fn station_mode(&self) -> bool {
        lock(&self.state).station_mode
    }
}

impl RadioDriver for MockRadio {
    fn init(&mut self) -> Result<(), LinkError> {
        if lock(&self.state).init_fails {
            return Err(LinkError::InitFailed("mock radio init failure".to_string()));
        }
        Ok(())
    }

    fn enable_station_mode(&mut self) {
        lock(&self.state).station_mode = true;
    }

    fn connect_with_timeout(
        &mut self,
        credentials: &WifiCredentials,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;
        state.last_connect_timeout = Some(timeout);
        if let Some((clock, cost)) = &state.connect_cost {
            clock.advance(*cost);
        }
        if state.connect_fails {
            return Err(LinkError::ConnectFailed {
                ssid: credentials.ssid.clone(),
                reason: "mock association failure".to_string(),
            });
        }
        state.link_up = true;
        Ok(())
    }

    fn poll(&mut self) {
        lock(&self.state).polls += 1;
    }

    fn link_status(&self) -> LinkState {
        if lock(&self.state).link_up {
            LinkState::Up
        } else {
            LinkState::Down
        }
    }

    fn set_indicator(&mut self, on: bool) {
        lock(&self.state).indicator = on;
    }
}

/// How [`MockNetworkStack`] answers `resolve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveMode {
    /// Answer synchronously
    Sync(IpAddr),
    /// Answer `Pending`, deliver the address on the next poll
    Deferred(IpAddr),
    /// Answer `Pending`, deliver a failure on the next poll
    Failing(String),
    /// Answer `Pending` and never complete unless the test pushes an event
    Pending,
    /// Refuse to start the resolution
    DispatchError,
}

/// A transport primitive invoked on [`MockNetworkStack`]
#[derive(Debug, Clone, PartialEq)]
pub enum StackCall {
    Resolve(String),
    Connect(SocketAddr),
    Subscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Disconnect,
}

#[derive(Debug)]
struct StackState {
    resolve_mode: ResolveMode,
    auto_accept: bool,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_publish: bool,
    resolving: HashSet<String>,
    events: VecDeque<NetEvent>,
    calls: Vec<StackCall>,
    polls: u64,
}

/// Mock network stack recording every primitive call
#[derive(Debug, Clone)]
pub struct MockNetworkStack {
    state: Arc<Mutex<StackState>>,
}

impl MockNetworkStack {
    pub fn new(resolve_mode: ResolveMode) -> Self {
        Self {
            state: Arc::new(Mutex::new(StackState {
                resolve_mode,
                auto_accept: false,
                fail_connect: false,
                fail_subscribe: false,
                fail_publish: false,
                resolving: HashSet::new(),
                events: VecDeque::new(),
                calls: Vec::new(),
                polls: 0,
            })),
        }
    }

    /// Stack with a reachable broker: deferred resolve and automatic CONNACK
    pub fn healthy(broker: IpAddr) -> Self {
        let stack = Self::new(ResolveMode::Deferred(broker));
        stack.set_auto_accept(true);
        stack
    }

    pub fn set_resolve_mode(&self, mode: ResolveMode) {
        lock(&self.state).resolve_mode = mode;
    }

    /// Queue a CONNACK for every connect
    pub fn set_auto_accept(&self, accept: bool) {
        lock(&self.state).auto_accept = accept;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        lock(&self.state).fail_subscribe = fail;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        lock(&self.state).fail_publish = fail;
    }

    /// Queue an event for the next poll
    pub fn push_event(&self, event: NetEvent) {
        lock(&self.state).events.push_back(event);
    }

    /// Take every queued event, as `poll` does
    pub fn drain_events(&self) -> Vec<NetEvent> {
        let mut state = lock(&self.state);
        let events: Vec<NetEvent> = state.events.drain(..).collect();
        for event in &events {
            if let NetEvent::ResolveComplete { hostname, .. } = event {
                state.resolving.remove(hostname);
            }
        }
        events
    }

    pub fn calls(&self) -> Vec<StackCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Topic and payload of every publish request
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                StackCall::Publish { topic, payload, .. } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of resolve requests, i.e. session attempts that reached the stack
    pub fn resolve_calls(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, StackCall::Resolve(_)))
            .count()
    }

    pub fn polls(&self) -> u64 {
        lock(&self.state).polls
    }

    fn record(&self, call: StackCall) {
        lock(&self.state).calls.push(call);
    }
}

impl NetworkStack for MockNetworkStack {
    fn poll(&mut self) -> Vec<NetEvent> {
        lock(&self.state).polls += 1;
        self.drain_events()
    }

    fn resolve(&mut self, hostname: &str) -> Result<ResolveOutcome, MqttError> {
        self.record(StackCall::Resolve(hostname.to_string()));
        let mut state = lock(&self.state);

        if state.resolve_mode == ResolveMode::DispatchError {
            return Err(MqttError::ResolveFailed("mock resolver unavailable".to_string()));
        }
        if let ResolveMode::Sync(ip) = state.resolve_mode {
            return Ok(ResolveOutcome::Resolved(ip));
        }
        if !state.resolving.insert(hostname.to_string()) {
            return Err(MqttError::ResolveInProgress(hostname.to_string()));
        }

        let completion = match &state.resolve_mode {
            ResolveMode::Deferred(ip) => Some(Ok(*ip)),
            ResolveMode::Failing(reason) => Some(Err(reason.clone())),
            _ => None,
        };
        if let Some(result) = completion {
            state.events.push_back(NetEvent::ResolveComplete {
                hostname: hostname.to_string(),
                result,
            });
        }
        Ok(ResolveOutcome::Pending)
    }

    fn connect(&mut self, addr: SocketAddr, _options: &SessionOptions) -> Result<(), MqttError> {
        self.record(StackCall::Connect(addr));
        let mut state = lock(&self.state);
        if state.fail_connect {
            return Err(MqttError::ConnectionFailed("mock connect failure".into()));
        }
        if state.auto_accept {
            state
                .events
                .push_back(NetEvent::ConnectionStatus(ConnectionStatus::Accepted));
        }
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
        self.record(StackCall::Subscribe(topic.to_string()));
        if lock(&self.state).fail_subscribe {
            return Err(MqttError::SubscriptionFailed("mock subscribe failure".into()));
        }
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.record(StackCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        if lock(&self.state).fail_publish {
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.record(StackCall::Disconnect);
    }
}

#[derive(Debug, Default)]
struct SensorState {
    value: f64,
    errors: VecDeque<SensorError>,
    init_fails: bool,
    reads: u64,
}

/// Mock light sensor returning a fixed value, with injectable failures
#[derive(Debug, Clone, Default)]
pub struct MockSensor {
    state: Arc<Mutex<SensorState>>,
}

impl MockSensor {
    pub fn constant(value: f64) -> Self {
        let sensor = Self::default();
        sensor.set_value(value);
        sensor
    }

    pub fn set_value(&self, value: f64) {
        lock(&self.state).value = value;
    }

    /// Fail the next read with `error`; queued errors are returned in order
    pub fn push_error(&self, error: SensorError) {
        lock(&self.state).errors.push_back(error);
    }

    pub fn set_init_fails(&self, fails: bool) {
        lock(&self.state).init_fails = fails;
    }

    pub fn reads(&self) -> u64 {
        lock(&self.state).reads
    }
}

impl LightSensor for MockSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        if lock(&self.state).init_fails {
            return Err(SensorError::NotAvailable("mock sensor absent".to_string()));
        }
        Ok(())
    }

    fn read_lux(&mut self) -> Result<f64, SensorError> {
        let mut state = lock(&self.state);
        state.reads += 1;
        match state.errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.value),
        }
    }
}

/// Mock output pin recording every level it was driven to
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    history: Arc<Mutex<Vec<bool>>>,
}

impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<bool> {
        lock(&self.history).clone()
    }

    /// Last level driven, `None` if never driven
    pub fn level(&self) -> Option<bool> {
        lock(&self.history).last().copied()
    }
}

impl ErrorType for MockPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        lock(&self.history).push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        lock(&self.history).push(true);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WatchdogState {
    enabled: Option<(Duration, bool)>,
    enabled_at: Duration,
    refreshes: Vec<Duration>,
}

/// Watchdog that records refresh times on a virtual clock instead of firing
#[derive(Debug, Clone)]
pub struct RecordingWatchdog {
    clock: ManualClock,
    state: Arc<Mutex<WatchdogState>>,
}

impl RecordingWatchdog {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(WatchdogState::default())),
        }
    }

    /// Timeout and pause-on-debug flag, once enabled
    pub fn enabled(&self) -> Option<(Duration, bool)> {
        lock(&self.state).enabled
    }

    pub fn refreshes(&self) -> Vec<Duration> {
        lock(&self.state).refreshes.clone()
    }

    pub fn refresh_count(&self) -> usize {
        lock(&self.state).refreshes.len()
    }

    /// Largest interval between enabling, consecutive refreshes and now
    pub fn max_gap(&self) -> Duration {
        let now = self.clock.now();
        let state = lock(&self.state);
        let mut previous = state.enabled_at;
        let mut max_gap = Duration::ZERO;
        for &refresh in state.refreshes.iter().chain(std::iter::once(&now)) {
            max_gap = max_gap.max(refresh.saturating_sub(previous));
            previous = refresh;
        }
        max_gap
    }

    /// Intervals during which a real watchdog with `timeout` would have fired
    pub fn liveness_violations(&self, timeout: Duration) -> Vec<(Duration, Duration)> {
        let state = lock(&self.state);
        let mut previous = state.enabled_at;
        let mut violations = Vec::new();
        for &refresh in &state.refreshes {
            if refresh.saturating_sub(previous) >= timeout {
                violations.push((previous, refresh));
            }
            previous = refresh;
        }
        violations
    }
}

impl Watchdog for RecordingWatchdog {
    fn enable(&mut self, timeout: Duration, pause_on_debug: bool) {
        let mut state = lock(&self.state);
        state.enabled = Some((timeout, pause_on_debug));
        state.enabled_at = self.clock.now();
    }

    fn refresh(&mut self) {
        let now = self.clock.now();
        lock(&self.state).refreshes.push(now);
    }
}
