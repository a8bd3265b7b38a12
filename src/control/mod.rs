//! Closed-loop thruster control

pub mod control_loop;
pub mod mixer;
pub mod mode;
pub mod pid;
pub mod state;

pub use control_loop::{ControlIo, ControlLoop, TickReport};
pub use mixer::{DriveMixer, MotorFrame, MotorRole};
pub use mode::{Command, ControlMode, GainUpdate, PidAxis};
pub use pid::{PidController, PidState};
pub use state::{
    Axis, Button, CameraFrame, GamepadSnapshot, GamepadState, LineMeasurement, SensorSnapshot,
    Vec3,
};
