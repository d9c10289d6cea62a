//! Reconnection scheduler
//!
//! One [`ReconnectTimer`] per recoverable resource. The scheduler only
//! admits attempts; carrying them out is the caller's job.

use crate::transport::mqtt::{HealthMonitor, ReconnectTimer, ReconnectionDecision};
use std::time::Duration;
use tracing::debug;

/// Rate limiter for link and session reconnection attempts
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    link: ReconnectTimer,
    session: ReconnectTimer,
}

impl ReconnectScheduler {
    /// Both timers start with `now` as their last attempt
    pub fn new(link_interval: Duration, session_interval: Duration, now: Duration) -> Self {
        Self {
            link: ReconnectTimer::new(link_interval, now),
            session: ReconnectTimer::new(session_interval, now),
        }
    }

    pub fn link_timer(&self) -> &ReconnectTimer {
        &self.link
    }

    pub fn session_timer(&self) -> &ReconnectTimer {
        &self.session
    }

    pub fn link_decision(&self, now: Duration, link_up: bool) -> ReconnectionDecision {
        HealthMonitor::should_attempt_reconnection(&self.link, now, !link_up)
    }

    /// A session attempt additionally needs the link to be up
    pub fn session_decision(
        &self,
        now: Duration,
        link_up: bool,
        session_down: bool,
    ) -> ReconnectionDecision {
        if !link_up {
            return ReconnectionDecision::NotNeeded;
        }
        HealthMonitor::should_attempt_reconnection(&self.session, now, session_down)
    }

    /// Admit a link attempt, recording it before it runs
    pub fn admit_link(&mut self, now: Duration, link_up: bool) -> bool {
        let decision = self.link_decision(now, link_up);
        Self::admit(&mut self.link, decision, now, "link")
    }

    /// Admit a session attempt, recording it before it runs
    pub fn admit_session(&mut self, now: Duration, link_up: bool, session_down: bool) -> bool {
        let decision = self.session_decision(now, link_up, session_down);
        Self::admit(&mut self.session, decision, now, "session")
    }

    fn admit(
        timer: &mut ReconnectTimer,
        decision: ReconnectionDecision,
        now: Duration,
        resource: &str,
    ) -> bool {
        match decision {
            ReconnectionDecision::Proceed => {
                timer.record_attempt(now);
                true
            }
            ReconnectionDecision::WaitForWindow { remaining } => {
                debug!(
                    resource,
                    remaining_ms = remaining.as_millis() as u64,
                    "Reconnect window not open"
                );
                false
            }
            ReconnectionDecision::NotNeeded => false,
        }
    }
}
