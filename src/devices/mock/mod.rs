//! Simulated devices for running without hardware
//!
//! | Device | Behavior |
//! |--------|----------|
//! | [`SimulatedImu`] | Orientation random walk plus Gaussian noise, fixed water temperature |
//! | [`RecordingActuators`] | Stores the last value per channel; rejects unwired channels |
//! | [`SyntheticCamera`] | JPEG-framed random payloads at the configured size |
//! | [`SimulatedLineDetector`] | Stand-off near the configured setpoint, small angle error, occasional misses |
//! | [`IdleGamepad`] | Never reports input; sticks stay centered |

mod noise;

pub use noise::NoiseGenerator;

use crate::config::{CameraConfig, ControlConfig, SimulationConfig};
use crate::control::state::{
    Calibration, CameraFrame, GamepadState, LineMeasurement, SensorSnapshot, Vec3,
};
use crate::devices::{ActuatorDriver, CameraSource, GamepadSource, ImuSource, LineDetector};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Range the simulated orientation wanders within, degrees
const ORIENTATION_BOUND: f32 = 30.0;

/// Random bytes between the JPEG start and end markers
const SYNTHETIC_BODY_BYTES: usize = 512;

pub struct SimulatedImu {
    config: SimulationConfig,
    noise: NoiseGenerator,
    orientation: Vec3,
}

impl SimulatedImu {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            config: config.clone(),
            noise: NoiseGenerator::new(config.random_seed),
            orientation: Vec3::default(),
        }
    }
}

impl ImuSource for SimulatedImu {
    fn full_state(&mut self) -> Result<SensorSnapshot> {
        let step = self.config.drift_step;
        let o = self.orientation;
        self.orientation = Vec3::new(
            self.noise.walk(o.x, step, ORIENTATION_BOUND),
            self.noise.walk(o.y, step, ORIENTATION_BOUND),
            self.noise.walk(o.z, step, ORIENTATION_BOUND),
        );

        let sd = self.config.orientation_stddev;
        let o = self.orientation;
        Ok(SensorSnapshot {
            gyro: Vec3::new(
                o.x + self.noise.gaussian(sd),
                o.y + self.noise.gaussian(sd),
                o.z + self.noise.gaussian(sd),
            ),
            linear: Vec3::new(
                self.noise.gaussian(0.01),
                self.noise.gaussian(0.01),
                self.noise.gaussian(0.01),
            ),
            calibration: Calibration {
                sys: 3,
                gyro: 3,
                accel: 3,
                mag: 3,
            },
            temperature: self.config.water_temp + self.noise.gaussian(0.05),
        })
    }
}

/// Actuator outputs kept in memory
pub struct RecordingActuators {
    values: Arc<Mutex<Vec<f32>>>,
}

impl RecordingActuators {
    pub fn new(channels: usize) -> Self {
        Self {
            values: Arc::new(Mutex::new(vec![0.0; channels])),
        }
    }

    /// Shared view of the channel values
    pub fn values(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.values)
    }
}

impl ActuatorDriver for RecordingActuators {
    fn set_channel(&mut self, index: usize, value: f32) -> Result<()> {
        let mut values = self.values.lock();
        let slot = values.get_mut(index).ok_or(Error::Channel(index))?;
        *slot = value.clamp(-1.0, 1.0);
        log::trace!("Channel {} = {:.3}", index, *slot);
        Ok(())
    }
}

pub struct SyntheticCamera {
    device: String,
    width: u32,
    height: u32,
    noise: NoiseGenerator,
    sequence: u32,
}

impl SyntheticCamera {
    pub fn new(device: &str, cameras: &CameraConfig, seed: u64) -> Self {
        Self {
            device: device.to_string(),
            width: cameras.width,
            height: cameras.height,
            noise: NoiseGenerator::new(seed),
            sequence: 0,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl CameraSource for SyntheticCamera {
    fn device(&self) -> &str {
        &self.device
    }

    fn capture(&mut self) -> Result<Option<CameraFrame>> {
        let mut body = vec![0u8; SYNTHETIC_BODY_BYTES];
        self.noise.fill(&mut body);

        let mut jpeg = Vec::with_capacity(body.len() + 8);
        jpeg.extend_from_slice(&[0xFF, 0xD8]);
        jpeg.extend_from_slice(&self.sequence.to_be_bytes());
        jpeg.extend_from_slice(&body);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        self.sequence = self.sequence.wrapping_add(1);

        Ok(Some(CameraFrame {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            jpeg,
        }))
    }

    fn restart(&mut self) -> Result<()> {
        log::info!("Restarting simulated camera {}", self.device);
        self.sequence = 0;
        Ok(())
    }
}

pub struct SimulatedLineDetector {
    noise: NoiseGenerator,
    standoff_fraction: f32,
    miss_rate: f32,
}

impl SimulatedLineDetector {
    pub fn new(control: &ControlConfig, simulation: &SimulationConfig) -> Self {
        Self {
            noise: NoiseGenerator::new(simulation.random_seed),
            standoff_fraction: control.follow_line.standoff_fraction,
            miss_rate: simulation.line_miss_rate,
        }
    }
}

impl LineDetector for SimulatedLineDetector {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LineMeasurement>> {
        if frame.jpeg.is_empty() || frame.height == 0 {
            return Err(Error::Other(format!("empty frame from {}", frame.device)));
        }
        if self.noise.chance(self.miss_rate) {
            return Ok(None);
        }
        let nominal = frame.height as f32 * self.standoff_fraction;
        Ok(Some(LineMeasurement {
            distance: nominal + self.noise.gaussian(nominal * 0.05),
            angle_error: self.noise.gaussian(3.0),
        }))
    }
}

/// Stand-in when no gamepad is attached
#[derive(Debug, Default)]
pub struct IdleGamepad;

impl GamepadSource for IdleGamepad {
    fn poll(&mut self, _state: &GamepadState) -> Result<bool> {
        Ok(false)
    }
}
