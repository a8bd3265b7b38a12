//! JalaIO - Surface/vehicle link and control for a tethered underwater robot
//!
//! ## Layers
//!
//! - [`streaming`]: length-prefixed JSON packets over one TCP connection per
//!   channel, with tag-based fan-out into bounded queues
//! - [`control`]: mode state machine, PID loops and the thruster mixer
//! - [`devices`]: traits for the IMU, actuators, cameras, gamepad and line
//!   detector, plus simulated implementations
//! - [`nodes`]: worker threads wiring the above into the surface and vehicle
//!   processes

pub mod config;
pub mod control;
pub mod devices;
pub mod error;
pub mod nodes;
pub mod shutdown;
pub mod streaming;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, FramingError, Result};
pub use shutdown::Shutdown;
