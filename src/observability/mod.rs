//! Observability
//!
//! Structured logging through `tracing`, with span macros for the wireless
//! link, the broker session and each control loop tick.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LoggingSettings};

pub use logging::{link_span, session_span, tick_span};
