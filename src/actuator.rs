//! Control actuator: applies remote on/off commands to an output

use embedded_hal::digital::{self, ErrorType, OutputPin};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Instruction decoded from an inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
    Unknown,
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Output pin error: {0}")]
    Pin(String),
}

/// Something that can carry out a [`Command`]
pub trait Actuator {
    fn apply(&mut self, command: Command) -> Result<(), ActuatorError>;
}

/// Drives a single digital output from commands
pub struct ControlActuator<P: OutputPin> {
    pin: P,
    level: Option<bool>,
}

impl<P: OutputPin> ControlActuator<P> {
    pub fn new(pin: P) -> Self {
        Self { pin, level: None }
    }

    /// Current output level, `None` until the first command
    pub fn level(&self) -> Option<bool> {
        self.level
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> Actuator for ControlActuator<P> {
    fn apply(&mut self, command: Command) -> Result<(), ActuatorError> {
        let result = match command {
            Command::On => self.pin.set_high(),
            Command::Off => self.pin.set_low(),
            Command::Unknown => {
                warn!("Unknown command, output unchanged");
                return Ok(());
            }
        };
        result.map_err(|e| ActuatorError::Pin(format!("{:?}", digital::Error::kind(&e))))?;

        let on = command == Command::On;
        self.level = Some(on);
        info!(on, "Output switched");
        Ok(())
    }
}

/// Error for sysfs-backed pins
#[derive(Debug, Error)]
#[error("sysfs LED write failed: {0}")]
pub struct SysfsLedError(#[from] std::io::Error);

impl digital::Error for SysfsLedError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// LED exposed through `/sys/class/leds/<name>/brightness`
pub struct SysfsLed {
    brightness: PathBuf,
}

impl SysfsLed {
    pub fn new(led_dir: impl Into<PathBuf>) -> Self {
        Self {
            brightness: led_dir.into().join("brightness"),
        }
    }

    fn write(&mut self, value: &str) -> Result<(), SysfsLedError> {
        std::fs::write(&self.brightness, value)?;
        Ok(())
    }
}

impl ErrorType for SysfsLed {
    type Error = SysfsLedError;
}

impl OutputPin for SysfsLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write("0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write("1")
    }
}

/// Output for hosts without an LED: level changes are only logged
#[derive(Debug, Default)]
pub struct LoggingPin {
    high: bool,
}

impl LoggingPin {
    pub fn is_high(&self) -> bool {
        self.high
    }
}

impl ErrorType for LoggingPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for LoggingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        info!(target: "actuator", "LED off");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        info!(target: "actuator", "LED on");
        Ok(())
    }
}
