//! Agent control loop
//!
//! [`AgentLifecycle`] bootstraps the collaborators and returns a
//! [`Coordinator`], which owns all state and runs the cooperative loop.
//! [`ReconnectScheduler`] paces link and broker reconnection.

pub mod coordinator;
pub mod lifecycle;
pub mod scheduler;

pub use coordinator::{Coordinator, LoopTiming};
pub use lifecycle::{AgentLifecycle, Peripherals, LINK_RECONNECT_INTERVAL};
pub use scheduler::ReconnectScheduler;
