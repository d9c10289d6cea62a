//! Testing utilities and mock implementations
//!
//! Mocks for every collaborator trait so the agent can be driven tick by tick
//! on a virtual clock, without a radio, a sensor or a broker.

pub mod mocks;

pub use mocks::*;
