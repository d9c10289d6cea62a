//! Linux IIO light sensor
//!
//! Kernel drivers (the in-tree `bh1750` driver among them) expose illuminance
//! either as a processed `in_illuminance_input` or as `in_illuminance_raw`
//! with an `in_illuminance_scale`.

use super::{LightSensor, SensorError};
use std::fs;
use std::path::{Path, PathBuf};

pub struct IioLightSensor {
    device: PathBuf,
}

impl IioLightSensor {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }

    fn read_attr(&self, name: &str) -> Result<Option<f64>, SensorError> {
        let path = self.device.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| SensorError::Bus(format!("{}: {e}", path.display())))?;
        parse_attr(&path, &text).map(Some)
    }
}

fn parse_attr(path: &Path, text: &str) -> Result<f64, SensorError> {
    text.trim().parse::<f64>().map_err(|_| {
        SensorError::InvalidData(format!("{}: '{}'", path.display(), text.trim()))
    })
}

impl LightSensor for IioLightSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        if !self.device.is_dir() {
            return Err(SensorError::NotAvailable(format!(
                "{} does not exist",
                self.device.display()
            )));
        }
        Ok(())
    }

    fn read_lux(&mut self) -> Result<f64, SensorError> {
        if let Some(lux) = self.read_attr("in_illuminance_input")? {
            return Ok(lux);
        }
        match self.read_attr("in_illuminance_raw")? {
            Some(raw) => {
                let scale = self.read_attr("in_illuminance_scale")?.unwrap_or(1.0);
                Ok(raw * scale)
            }
            None => Err(SensorError::NotAvailable(format!(
                "{} exposes no illuminance channel",
                self.device.display()
            ))),
        }
    }
}
