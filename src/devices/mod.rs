//! Hardware and vision collaborators
//!
//! The link and control code only talk to these traits. Chip bindings, the
//! camera stack and the vision algorithms live behind them; [`mock`] provides
//! simulated versions used when no hardware is attached.

pub mod mock;

use crate::control::state::{CameraFrame, GamepadState, LineMeasurement, SensorSnapshot};
use crate::error::Result;

/// Inertial measurement unit
pub trait ImuSource: Send {
    /// Read orientation, velocity, calibration and temperature
    fn full_state(&mut self) -> Result<SensorSnapshot>;
}

/// Thruster and servo outputs
pub trait ActuatorDriver: Send {
    /// Drive `index` to `value` in `[-1, 1]`
    ///
    /// Fails with [`Error::Channel`](crate::Error::Channel) when nothing is
    /// wired to `index`.
    fn set_channel(&mut self, index: usize, value: f32) -> Result<()>;

    /// Check every channel in `channels` by driving it to neutral
    fn verify(&mut self, channels: &[usize]) -> Result<()> {
        for &channel in channels {
            self.set_channel(channel, 0.0)?;
        }
        Ok(())
    }
}

/// One camera device
pub trait CameraSource: Send {
    fn device(&self) -> &str;

    /// Grab the next frame; `None` if the device had nothing ready
    fn capture(&mut self) -> Result<Option<CameraFrame>>;

    /// Reopen the device after a stall
    fn restart(&mut self) -> Result<()>;
}

/// Finds the guide lines in a camera frame
pub trait LineDetector: Send {
    /// `None` when no line pair is visible
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LineMeasurement>>;
}

/// Operator input device
pub trait GamepadSource: Send {
    /// Push any pending input into `state`; returns true if something changed
    fn poll(&mut self, state: &GamepadState) -> Result<bool>;
}
