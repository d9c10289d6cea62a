//! Agent bootstrap
//!
//! Brings the collaborators up in order and hands back a ready
//! [`Coordinator`]. Failures before the loop starts are fatal; everything
//! after that is recovered by the loop itself.

use super::coordinator::{Coordinator, LoopTiming};
use super::scheduler::ReconnectScheduler;
use crate::actuator::{Actuator, Command};
use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::link::{LinkMonitor, RadioDriver};
use crate::sensor::{LightSensor, SensorReader};
use crate::transport::mqtt::{BrokerSession, SessionSettings};
use crate::transport::{NetworkStack, SessionOptions};
use crate::watchdog::Watchdog;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The link is retried on every tick while down; the blocking connect paces itself
pub const LINK_RECONNECT_INTERVAL: Duration = Duration::ZERO;

/// Hardware and host collaborators handed to the agent
pub struct Peripherals<R: RadioDriver, N: NetworkStack> {
    pub radio: R,
    pub stack: N,
    pub sensor: Box<dyn LightSensor>,
    pub actuator: Box<dyn Actuator>,
    pub watchdog: Box<dyn Watchdog>,
    pub clock: Arc<dyn Clock>,
}

/// Startup sequence for the agent
pub struct AgentLifecycle;

impl AgentLifecycle {
    /// Bring the agent up and return the control loop
    ///
    /// Order: watchdog, radio, initial link, sensor, actuator, first broker
    /// attempt, reconnection timers. Radio init, the initial link connect and
    /// a resolver that cannot even start are fatal. A missing sensor is only
    /// logged: reads will report invalid values.
    pub fn start<R: RadioDriver, N: NetworkStack>(
        config: &AgentConfig,
        peripherals: Peripherals<R, N>,
    ) -> AgentResult<Coordinator<R, N>> {
        let Peripherals {
            radio,
            mut stack,
            sensor,
            mut actuator,
            mut watchdog,
            clock,
        } = peripherals;

        config.validate()?;
        let credentials = config.wifi_credentials()?;
        let endpoint = config.broker_endpoint()?;

        watchdog.enable(config.watchdog_timeout(), config.timing.watchdog_pause_on_debug);
        info!(
            timeout_ms = config.timing.watchdog_timeout_ms,
            pause_on_debug = config.timing.watchdog_pause_on_debug,
            "Watchdog enabled"
        );

        let mut link = LinkMonitor::new(radio, credentials, config.link_connect_timeout());
        link.init().map_err(|e| {
            error!(error = %e, "Radio initialization failed");
            AgentError::RadioInit(e)
        })?;
        link.reconnect().map_err(|e| {
            error!(error = %e, "Initial wireless connection failed");
            AgentError::InitialLink(e)
        })?;
        watchdog.refresh();

        let mut sensor = SensorReader::new(sensor);
        if let Err(e) = sensor.init() {
            warn!(error = %e, "Light sensor initialization failed, readings will be invalid");
        }

        if let Err(e) = actuator.apply(Command::Off) {
            warn!(error = %e, "Could not reset output");
        }

        let mut session = BrokerSession::new(SessionSettings {
            hostname: endpoint.host.clone(),
            port: endpoint.port,
            topic: config.mqtt.topic.clone(),
            options: SessionOptions {
                client_id: config.mqtt.client_id.clone(),
                keep_alive: config.keep_alive(),
            },
        });
        session.begin_attempt(&mut stack).map_err(|e| {
            error!(host = %endpoint.host, error = %e, "Broker resolution could not be started");
            AgentError::ResolveDispatch(e)
        })?;

        let scheduler = ReconnectScheduler::new(
            LINK_RECONNECT_INTERVAL,
            config.session_reconnect_interval(),
            clock.now(),
        );
        let timing = LoopTiming {
            sleep_slices: config.timing.sleep_slices,
            slice: config.slice_duration(),
            invalid_reading_policy: config.sensor.invalid_reading_policy,
        };

        info!(
            broker = %format!("{}:{}", endpoint.host, endpoint.port),
            topic = %config.mqtt.topic,
            "Agent started"
        );

        Ok(Coordinator::new(
            link, stack, session, scheduler, sensor, actuator, watchdog, clock, timing,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ControlActuator;
    use crate::config::WifiSection;
    use crate::testing::mocks::{
        ManualClock, MockNetworkStack, MockPin, MockRadio, MockSensor, RecordingWatchdog,
        ResolveMode, StackCall,
    };
    use crate::transport::mqtt::SessionState;

    fn config() -> AgentConfig {
        AgentConfig {
            wifi: WifiSection {
                passphrase: Some("test-passphrase".to_string()),
                ..WifiSection::default()
            },
            ..AgentConfig::default()
        }
    }

    struct Parts {
        radio: MockRadio,
        stack: MockNetworkStack,
        sensor: MockSensor,
        pin: MockPin,
        watchdog: RecordingWatchdog,
        clock: ManualClock,
    }

    fn parts() -> Parts {
        let clock = ManualClock::new();
        Parts {
            radio: MockRadio::new(),
            stack: MockNetworkStack::new(ResolveMode::Pending),
            sensor: MockSensor::constant(1.0),
            pin: MockPin::new(),
            watchdog: RecordingWatchdog::new(clock.clone()),
            clock,
        }
    }

    fn peripherals(parts: &Parts) -> Peripherals<MockRadio, MockNetworkStack> {
        Peripherals {
            radio: parts.radio.clone(),
            stack: parts.stack.clone(),
            sensor: Box::new(parts.sensor.clone()),
            actuator: Box::new(ControlActuator::new(parts.pin.clone())),
            watchdog: Box::new(parts.watchdog.clone()),
            clock: Arc::new(parts.clock.clone()),
        }
    }

    #[test]
    fn test_start_runs_bootstrap_in_order() {
        let parts = parts();
        let coordinator = AgentLifecycle::start(&config(), peripherals(&parts)).unwrap();

        assert_eq!(
            parts.watchdog.enabled(),
            Some((Duration::from_millis(10_000), true))
        );
        assert!(parts.radio.station_mode());
        assert!(parts.radio.indicator());
        assert_eq!(parts.pin.history(), vec![false]);
        assert_eq!(
            parts.stack.calls(),
            vec![StackCall::Resolve("broker.hivemq.com".to_string())]
        );
        assert_eq!(coordinator.session().state(), SessionState::Resolving);
    }

    #[test]
    fn test_built_in_defaults_start_without_passphrase_config() {
        // No inline passphrase and no configured variable: the well-known
        // variable is optional, so startup never depends on the environment
        let parts = parts();
        let result = AgentLifecycle::start(&AgentConfig::default(), peripherals(&parts));
        assert!(result.is_ok());
        assert_eq!(parts.radio.connect_calls(), 1);
    }

    #[test]
    fn test_radio_init_failure_is_fatal() {
        let parts = parts();
        parts.radio.set_init_fails(true);
        let result = AgentLifecycle::start(&config(), peripherals(&parts));
        assert!(matches!(result, Err(AgentError::RadioInit(_))));
    }

    #[test]
    fn test_initial_link_failure_is_fatal() {
        let parts = parts();
        parts.radio.set_connect_fails(true);
        let result = AgentLifecycle::start(&config(), peripherals(&parts));
        assert!(matches!(result, Err(AgentError::InitialLink(_))));
        assert!(parts.stack.calls().is_empty());
    }

    #[test]
    fn test_resolver_dispatch_failure_is_fatal() {
        let parts = parts();
        parts.stack.set_resolve_mode(ResolveMode::DispatchError);
        let result = AgentLifecycle::start(&config(), peripherals(&parts));
        assert!(matches!(result, Err(AgentError::ResolveDispatch(_))));
    }

    #[test]
    fn test_sensor_init_failure_is_not_fatal() {
        let parts = parts();
        parts.sensor.set_init_fails(true);
        assert!(AgentLifecycle::start(&config(), peripherals(&parts)).is_ok());
    }
}
