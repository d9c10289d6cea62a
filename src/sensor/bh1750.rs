//! BH1750 ambient light sensor over I2C
//!
//! The sensor is put in continuous high-resolution mode once; every read then
//! fetches the latest two-byte measurement.

use super::{LightSensor, SensorError};
use embedded_hal::i2c::{Error as _, I2c};
use std::time::Duration;

/// Default bus address (ADDR pin low)
pub const DEFAULT_ADDRESS: u8 = 0x23;

const CMD_POWER_ON: u8 = 0x01;
const CMD_CONTINUOUS_HIGH_RES: u8 = 0x10;
const POWER_ON_SETTLE: Duration = Duration::from_millis(10);

/// Counts per lux in high-resolution mode (datasheet typical)
const COUNTS_PER_LUX: f64 = 1.2;

pub struct Bh1750<I: I2c> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Bh1750<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Read the raw 16-bit measurement register
    pub fn read_raw(&mut self) -> Result<u16, SensorError> {
        let mut buffer = [0u8; 2];
        self.i2c
            .read(self.address, &mut buffer)
            .map_err(|e| SensorError::InvalidData(format!("{:?}", e.kind())))?;
        Ok(u16::from_be_bytes(buffer))
    }

    /// Convert a raw measurement to lux
    pub fn raw_to_lux(raw: u16) -> f64 {
        f64::from(raw) / COUNTS_PER_LUX
    }

    /// Release the underlying I2C bus
    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I: I2c> LightSensor for Bh1750<I> {
    fn init(&mut self) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[CMD_POWER_ON])
            .map_err(|e| SensorError::Bus(format!("power on: {:?}", e.kind())))?;
        std::thread::sleep(POWER_ON_SETTLE);
        self.i2c
            .write(self.address, &[CMD_CONTINUOUS_HIGH_RES])
            .map_err(|e| SensorError::Bus(format!("set mode: {:?}", e.kind())))?;
        Ok(())
    }

    fn read_lux(&mut self) -> Result<f64, SensorError> {
        self.read_raw().map(Self::raw_to_lux)
    }
}
