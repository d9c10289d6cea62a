//! Illuminance sensing
//!
//! [`LightSensor`] abstracts the hardware; [`SensorReader`] turns each read
//! into a [`Reading`], logging failures instead of propagating them.

pub mod bh1750;
pub mod iio;

pub use bh1750::Bh1750;
pub use iio::IioLightSensor;

use thiserror::Error;
use tracing::{debug, warn};

/// Sensor errors
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor bus error: {0}")]
    Bus(String),
    #[error("Sensor returned malformed data: {0}")]
    InvalidData(String),
    #[error("Sensor not available: {0}")]
    NotAvailable(String),
}

/// Source of illuminance values
pub trait LightSensor {
    /// Prepare the sensor for continuous measurement
    fn init(&mut self) -> Result<(), SensorError>;

    /// Read the current illuminance in lux
    fn read_lux(&mut self) -> Result<f64, SensorError>;
}

impl<S: LightSensor + ?Sized> LightSensor for Box<S> {
    fn init(&mut self) -> Result<(), SensorError> {
        (**self).init()
    }

    fn read_lux(&mut self) -> Result<f64, SensorError> {
        (**self).read_lux()
    }
}

/// One sample, produced and consumed within a single loop tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Lux(f64),
    /// The sensor could not produce a value
    Invalid,
}

impl Reading {
    /// Value reported on the wire for an invalid reading
    pub const SENTINEL: f64 = -1.0;

    pub fn is_valid(&self) -> bool {
        matches!(self, Reading::Lux(_))
    }

    /// The numeric value as published, with the sentinel standing in for failures
    pub fn value(&self) -> f64 {
        match self {
            Reading::Lux(lux) => *lux,
            Reading::Invalid => Self::SENTINEL,
        }
    }
}

/// Wraps a sensor and converts every read into a [`Reading`]
pub struct SensorReader {
    sensor: Box<dyn LightSensor>,
    failures: u64,
}

impl SensorReader {
    pub fn new(sensor: Box<dyn LightSensor>) -> Self {
        Self {
            sensor,
            failures: 0,
        }
    }

    pub fn init(&mut self) -> Result<(), SensorError> {
        self.sensor.init()
    }

    pub fn read(&mut self) -> Reading {
        match self.sensor.read_lux() {
            Ok(lux) if lux.is_finite() && lux >= 0.0 => {
                debug!(lux, "Sensor reading");
                Reading::Lux(lux)
            }
            Ok(lux) => {
                self.failures += 1;
                warn!(lux, "Sensor produced an out-of-range value");
                Reading::Invalid
            }
            Err(e) => {
                self.failures += 1;
                warn!(error = %e, failures = self.failures, "Sensor read failed");
                Reading::Invalid
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}
