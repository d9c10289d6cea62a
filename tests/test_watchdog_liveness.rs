//! Watchdog liveness
//!
//! Runs the agent against a recording watchdog on a virtual clock and checks
//! that no refresh gap would have let a real watchdog reset the device.


use std::time::Duration;
use test_helpers::TestRig;

const TIMEOUT: Duration = Duration::from_millis(10_000);

#[test]
fn test_watchdog_enabled_at_startup() {
    let rig = TestRig::healthy();
    let _coordinator = rig.start();
    assert_eq!(rig.watchdog.enabled(), Some((TIMEOUT, true)));
    assert!(rig.watchdog.refresh_count() >= 1);
}

#[test]
fn test_steady_state_refreshes_every_slice() {
    let rig = TestRig::healthy();
    let mut coordinator = rig.start();
    coordinator.run_ticks(20);

    assert!(rig.watchdog.liveness_violations(TIMEOUT).is_empty());
    assert_eq!(rig.watchdog.max_gap(), Duration::from_millis(10));
}

#[test]
fn test_unreachable_broker_keeps_refreshing() {
    let rig = TestRig::unreachable();
    let mut coordinator = rig.start();
    coordinator.run_ticks(30);

    assert!(rig.watchdog.liveness_violations(TIMEOUT).is_empty());
    assert!(rig.watchdog.max_gap() < Duration::from_secs(1));
}

#[test]
fn test_repeated_blocking_link_connects_stay_inside_window() {
    let rig = TestRig::healthy();
    let mut coordinator = rig.start();
    coordinator.tick();

    rig.radio
        .set_connect_cost(rig.clock.clone(), Duration::from_millis(9_900));
    rig.radio.set_connect_fails(true);
    rig.radio.drop_link();
    coordinator.run_ticks(10);

    assert_eq!(rig.radio.connect_calls(), 11);
    assert!(rig.watchdog.liveness_violations(TIMEOUT).is_empty());
    assert_eq!(rig.watchdog.max_gap(), Duration::from_millis(9_900));
}

#[test]
fn test_link_connect_timeout_leaves_watchdog_margin() {
    let rig = TestRig::healthy();
    let mut coordinator = rig.start();
    coordinator.tick();

    let timeout = rig.radio.last_connect_timeout().unwrap();
    assert_eq!(timeout, Duration::from_millis(9_500));

    // A radio that uses its whole timeout on every attempt
    rig.radio.set_connect_cost(rig.clock.clone(), timeout);
    rig.radio.set_connect_fails(true);
    rig.radio.drop_link();
    coordinator.run_ticks(5);

    assert!(rig.watchdog.liveness_violations(TIMEOUT).is_empty());
    assert_eq!(rig.watchdog.max_gap(), timeout);
}

#[test]
fn test_connect_overrunning_its_timeout_is_flagged() {
    let rig = TestRig::healthy();
    let mut coordinator = rig.start();
    coordinator.tick();

    rig.radio.set_connect_cost(rig.clock.clone(), TIMEOUT);
    rig.radio.drop_link();
    coordinator.tick();

    let violations = rig.watchdog.liveness_violations(TIMEOUT);
    assert_eq!(violations.len(), 1);
    let (from, to) = violations[0];
    assert_eq!(to - from, TIMEOUT);
}

#[test]
fn test_slow_initial_connect_inside_window() {
    let rig = TestRig::healthy();
    rig.radio
        .set_connect_cost(rig.clock.clone(), Duration::from_millis(8_000));
    let mut coordinator = rig.start();
    coordinator.run_ticks(3);

    assert!(rig.watchdog.liveness_violations(TIMEOUT).is_empty());
    assert_eq!(rig.watchdog.refreshes()[0], Duration::from_millis(8_000));
}
