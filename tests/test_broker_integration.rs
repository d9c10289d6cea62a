//! Agent against a real Mosquitto broker
//!
//! Runs the control loop over `RumqttcStack` with a broker started through
//! testcontainers. The radio, sensor and output stay mocked; everything from
//! the session state machine down to the socket is real.
//!
//! Needs a Docker daemon: `cargo test --test test_broker_integration -- --ignored`


use luxagent::agent::{AgentLifecycle, Coordinator, Peripherals};
use luxagent::testing::MockRadio;
use luxagent::transport::mqtt::{RumqttcStack, SessionState};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;
use test_helpers::{test_config, TestRig, TOPIC};
use testcontainers::clients::Cli;
use testcontainers::core::WaitFor;
use testcontainers::{Container, GenericImage};

const MOSQUITTO_PORT: u16 = 1883;

/// Upper bound on ticks spent waiting for the broker
const MAX_TICKS: u64 = 60;

/// Mosquitto 1.6 accepts anonymous clients on 1883 with its stock config
fn start_broker(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("eclipse-mosquitto", "1.6")
        .with_exposed_port(MOSQUITTO_PORT)
        .with_wait_for(WaitFor::Duration {
            length: Duration::from_secs(1),
        });
    docker.run(image)
}

fn start_agent(port: u16, rig: &TestRig) -> Coordinator<MockRadio, RumqttcStack> {
    let mut config = test_config();
    config.mqtt.broker_url = format!("mqtt://127.0.0.1:{port}");
    config.mqtt.client_id = "luxagent-integration".to_string();

    let stack = RumqttcStack::new()
        .unwrap()
        .with_poll_budget(Duration::from_millis(2));
    // Same mocks as the rig, with the real stack swapped in
    let mocks = rig.peripherals();
    let peripherals = Peripherals {
        radio: mocks.radio,
        stack,
        sensor: mocks.sensor,
        actuator: mocks.actuator,
        watchdog: mocks.watchdog,
        clock: mocks.clock,
    };
    AgentLifecycle::start(&config, peripherals).expect("agent should start against the broker")
}

/// Second client on the agent's topic; returns it with a feed of payloads
fn start_observer(port: u16) -> (Client, Receiver<String>) {
    let options = MqttOptions::new("lux-observer", "127.0.0.1", port);
    let (client, mut connection) = Client::new(options, 10);
    client
        .subscribe(TOPIC, QoS::AtMostOnce)
        .expect("observer subscribe should queue");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    if tx.send(payload).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                // Broker still starting; the next iteration reconnects
                Err(_) => thread::sleep(Duration::from_millis(100)),
            }
        }
    });
    (client, rx)
}

fn tick_until<F>(coordinator: &mut Coordinator<MockRadio, RumqttcStack>, mut done: F) -> bool
where
    F: FnMut(&Coordinator<MockRadio, RumqttcStack>) -> bool,
{
    for _ in 0..MAX_TICKS {
        coordinator.tick();
        if done(coordinator) {
            return true;
        }
    }
    false
}

#[test]
#[ignore = "needs a Docker daemon for the Mosquitto container"]
fn test_agent_subscribes_and_publishes_readings() {
    let docker = Cli::default();
    let broker = start_broker(&docker);
    let port = broker.get_host_port_ipv4(MOSQUITTO_PORT);

    let (_observer, payloads) = start_observer(port);
    let rig = TestRig::healthy();
    let mut coordinator = start_agent(port, &rig);

    let subscribed = tick_until(&mut coordinator, |c| {
        c.session().state() == SessionState::Subscribed
    });
    assert!(subscribed, "session never reached Subscribed");
    assert_eq!(
        coordinator.session().broker_address(),
        Some([127, 0, 0, 1].into())
    );

    let mut seen = Vec::new();
    let delivered = tick_until(&mut coordinator, |_| {
        seen.extend(payloads.try_iter());
        seen.iter().any(|payload| payload == "123.45")
    });
    assert!(delivered, "observer never saw a reading, got {seen:?}");
    assert!(coordinator.session().stats().publishes >= 1);
}

#[test]
#[ignore = "needs a Docker daemon for the Mosquitto container"]
fn test_broker_command_switches_output() {
    let docker = Cli::default();
    let broker = start_broker(&docker);
    let port = broker.get_host_port_ipv4(MOSQUITTO_PORT);

    let rig = TestRig::healthy();
    let mut coordinator = start_agent(port, &rig);
    assert!(tick_until(&mut coordinator, |c| c.session().is_ready()));
    assert_eq!(rig.pin.level(), Some(false));

    let (observer, _payloads) = start_observer(port);
    observer
        .publish(TOPIC, QoS::AtMostOnce, false, "on")
        .expect("command publish should queue");

    let switched = tick_until(&mut coordinator, |c| c.commands_applied() >= 1);
    assert!(switched, "command never reached the agent");
    assert_eq!(rig.pin.level(), Some(true));
    // Our own readings come back on the shared topic and are ignored
    assert_eq!(rig.pin.history(), vec![false, true]);
}
