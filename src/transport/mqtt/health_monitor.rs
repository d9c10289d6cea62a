//! Pure session transitions and reconnection admission
//!
//! Everything here is a pure function of its inputs, so the state machine can
//! be checked exhaustively without a network.

use super::connection::{ReconnectTimer, SessionState};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pure session transition and admission logic
pub struct HealthMonitor;

/// Things that happen to a broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A reconnection window was granted and resolution issued
    AttemptStarted,
    /// The broker address is known and the transport connect was issued
    ConnectIssued,
    /// CONNACK with a success code
    ConnAckAccepted,
    /// The single topic subscription was issued
    SubscribeIssued,
    /// Anything that ends the session: resolve failure, refusal, drop, link loss
    Failure(String),
}

/// Outcome of asking whether a resource may be reconnected now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Resource is down and its window is open
    Proceed,
    /// Resource is down but the last attempt was too recent
    WaitForWindow { remaining: Duration },
    /// Resource is up, or an attempt is already in flight
    NotNeeded,
}

impl HealthMonitor {
    /// Determine the next state after a session event (pure function)
    ///
    /// Events that do not apply to the current state leave it unchanged, so a
    /// stale completion can never skip a step of the connect sequence.
    pub fn determine_next_state(current: SessionState, event: &SessionEvent) -> SessionState {
        use SessionState::*;

        match (current, event) {
            (Disconnected, SessionEvent::AttemptStarted) => Resolving,
            (Resolving, SessionEvent::ConnectIssued) => Connecting,
            (Connecting, SessionEvent::ConnAckAccepted) => Connected,
            (Connected, SessionEvent::SubscribeIssued) => Subscribed,
            (_, SessionEvent::Failure(_)) => Disconnected,
            (state, _) => state,
        }
    }

    /// Decide whether a reconnection attempt is admitted (pure function)
    pub fn should_attempt_reconnection(
        timer: &ReconnectTimer,
        now: Duration,
        resource_down: bool,
    ) -> ReconnectionDecision {
        if !resource_down {
            return ReconnectionDecision::NotNeeded;
        }
        if timer.window_open(now) {
            ReconnectionDecision::Proceed
        } else {
            ReconnectionDecision::WaitForWindow {
                remaining: timer.remaining(now),
            }
        }
    }

    /// Check if the session state allows publishing (pure function)
    pub fn can_publish(state: SessionState) -> bool {
        matches!(state, SessionState::Subscribed)
    }

    /// Check if the session state allows subscribing (pure function)
    pub fn can_subscribe(state: SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Log a session state transition
    pub fn log_state_transition(from: SessionState, to: SessionState, event: &SessionEvent) {
        match (from, to, event) {
            (SessionState::Disconnected, SessionState::Resolving, _) => {
                info!("Reconnecting to broker: resolving hostname");
            }
            (SessionState::Resolving, SessionState::Connecting, _) => {
                info!("Connecting to broker");
            }
            (SessionState::Connecting, SessionState::Connected, _) => {
                info!("Connected to broker");
            }
            (SessionState::Connected, SessionState::Subscribed, _) => {
                info!("Subscribed, session ready");
            }
            (SessionState::Subscribed, SessionState::Disconnected, SessionEvent::Failure(r)) => {
                warn!("Broker session lost: {}", r);
            }
            (_, SessionState::Disconnected, SessionEvent::Failure(r)) => {
                error!("Broker session attempt failed in {:?}: {}", from, r);
            }
            _ => {
                info!("Broker session state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Counters describing the session's history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Reconnection windows used (each starts with a resolve)
    pub attempts: u64,
    pub resolve_failures: u64,
    /// Sessions that reached `Subscribed`
    pub sessions_established: u64,
    pub sessions_lost: u64,
    pub publishes: u64,
    pub publish_failures: u64,
    /// Publishes skipped because the session was not ready
    pub publishes_dropped: u64,
    pub messages_received: u64,
}
