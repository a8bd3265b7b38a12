//! Configuration for JalaIO
//!
//! Loaded once at startup from a TOML file and passed by reference to every
//! worker. Every field has a default, so an empty file (or no file at all)
//! yields a working loopback setup.

use crate::control::mixer::MotorRole;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub motors: MotorConfig,
    #[serde(default)]
    pub gamepad: GamepadConfig,
    #[serde(default)]
    pub cameras: CameraConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Link settings shared by both nodes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Address the vehicle dials to reach the surface node
    #[serde(default = "default_surface_host")]
    pub surface_host: String,

    /// Interface the surface node binds its listeners on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Sensor telemetry channel (vehicle → surface)
    #[serde(default = "default_sensor_port")]
    pub sensor_port: u16,

    /// Motor/command channel (surface → vehicle)
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Video channel (vehicle → surface)
    #[serde(default = "default_video_port")]
    pub video_port: u16,

    /// Idle read timeout; bounds how long a receive blocks before the
    /// worker re-checks its shutdown flag
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Time allowed for a started frame to arrive completely
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// Fixed retry interval for connect/bind attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Largest accepted payload (video frames dominate)
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Vehicle IMU publish interval
    #[serde(default = "default_sensor_interval_ms")]
    pub sensor_interval_ms: u64,
}

/// PID gains for one controlled axis
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PidGains {
    #[serde(default)]
    pub kp: f32,
    #[serde(default)]
    pub kd: f32,
    #[serde(default)]
    pub ki: f32,
}

impl PidGains {
    pub const fn new(kp: f32, kd: f32, ki: f32) -> Self {
        Self { kp, kd, ki }
    }
}

/// Line-following setpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FollowLineConfig {
    /// Stand-off distance setpoint as a fraction of the frame height
    #[serde(default = "default_standoff_fraction")]
    pub standoff_fraction: f32,

    /// Pitch setpoint in degrees (camera pointing down)
    #[serde(default = "default_pitch_down_deg")]
    pub pitch_setpoint_deg: f32,
}

/// Control loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Fixed tick period of the control loop
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Symmetric clamp applied to every PID output
    #[serde(default = "default_output_limit")]
    pub output_limit: f32,

    /// How often the achieved loop rate is reported
    #[serde(default = "default_frequency_report_ms")]
    pub frequency_report_ms: u64,

    #[serde(default = "default_rotation_gains")]
    pub roll: PidGains,
    #[serde(default = "default_rotation_gains")]
    pub pitch: PidGains,
    #[serde(default = "default_rotation_gains")]
    pub yaw: PidGains,
    #[serde(default = "default_distance_gains")]
    pub distance: PidGains,

    #[serde(default)]
    pub follow_line: FollowLineConfig,
}

/// Thruster layout
///
/// `order[slot]` names the thruster role driven by that slot,
/// `inverted[slot]` flips its sign, `channels[slot]` is the actuator
/// driver channel the slot is wired to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    #[serde(default = "default_motor_order")]
    pub order: Vec<MotorRole>,
    #[serde(default = "default_inverted")]
    pub inverted: Vec<bool>,
    #[serde(default = "default_channels")]
    pub channels: Vec<usize>,
    /// Gripper servo channel, if fitted
    #[serde(default = "default_gripper_channel")]
    pub gripper_channel: Option<usize>,
}

/// Operator input settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GamepadConfig {
    /// Stick values with magnitude below this are treated as zero
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,
}

/// Camera devices on the vehicle
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    /// Device identifiers, sent as packet metadata
    #[serde(default = "default_camera_devices")]
    pub devices: Vec<String>,

    /// Device whose frames feed line following
    #[serde(default = "default_control_camera")]
    pub control_camera: String,

    /// Capture interval per device
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Simulated frame size
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
}

/// Queue sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// FIFO capacity before the oldest entry is dropped
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

/// Simulated devices used when no hardware is attached
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Noise seed; 0 draws from entropy
    #[serde(default)]
    pub random_seed: u64,

    /// Orientation noise per reading, degrees
    #[serde(default = "default_orientation_stddev")]
    pub orientation_stddev: f32,

    /// Orientation random-walk step per reading, degrees
    #[serde(default = "default_drift_step")]
    pub drift_step: f32,

    /// Water temperature reported by the simulated IMU, °C
    #[serde(default = "default_water_temp")]
    pub water_temp: f32,

    /// Probability that the simulated detector loses the lines on a frame
    #[serde(default = "default_line_miss_rate")]
    pub line_miss_rate: f32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_surface_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_sensor_port() -> u16 {
    6664
}
fn default_command_port() -> u16 {
    6665
}
fn default_video_port() -> u16 {
    6666
}
fn default_read_timeout_ms() -> u64 {
    500
}
fn default_frame_timeout_ms() -> u64 {
    2000
}
fn default_reconnect_interval_ms() -> u64 {
    2000
}
fn default_max_payload_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_sensor_interval_ms() -> u64 {
    50
}
fn default_tick_period_ms() -> u64 {
    35
}
fn default_output_limit() -> f32 {
    1.0
}
fn default_frequency_report_ms() -> u64 {
    1000
}
fn default_rotation_gains() -> PidGains {
    PidGains::new(0.02, 0.001, 0.005)
}
fn default_distance_gains() -> PidGains {
    PidGains::new(0.005, 0.0, 0.001)
}
fn default_standoff_fraction() -> f32 {
    0.75
}
fn default_pitch_down_deg() -> f32 {
    -90.0
}
fn default_motor_order() -> Vec<MotorRole> {
    MotorRole::ALL.to_vec()
}
fn default_inverted() -> Vec<bool> {
    vec![false; MotorRole::ALL.len()]
}
fn default_channels() -> Vec<usize> {
    (0..MotorRole::ALL.len()).collect()
}
fn default_gripper_channel() -> Option<usize> {
    Some(MotorRole::ALL.len())
}
fn default_deadzone() -> f32 {
    0.05
}
fn default_camera_devices() -> Vec<String> {
    vec!["mainCam".to_string()]
}
fn default_control_camera() -> String {
    "mainCam".to_string()
}
fn default_frame_interval_ms() -> u64 {
    100
}
fn default_frame_width() -> u32 {
    320
}
fn default_frame_height() -> u32 {
    240
}
fn default_queue_capacity() -> usize {
    256
}
fn default_orientation_stddev() -> f32 {
    0.2
}
fn default_drift_step() -> f32 {
    0.05
}
fn default_water_temp() -> f32 {
    18.0
}
fn default_line_miss_rate() -> f32 {
    0.05
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            surface_host: default_surface_host(),
            bind_address: default_bind_address(),
            sensor_port: default_sensor_port(),
            command_port: default_command_port(),
            video_port: default_video_port(),
            read_timeout_ms: default_read_timeout_ms(),
            frame_timeout_ms: default_frame_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            sensor_interval_ms: default_sensor_interval_ms(),
        }
    }
}

impl Default for FollowLineConfig {
    fn default() -> Self {
        Self {
            standoff_fraction: default_standoff_fraction(),
            pitch_setpoint_deg: default_pitch_down_deg(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            output_limit: default_output_limit(),
            frequency_report_ms: default_frequency_report_ms(),
            roll: default_rotation_gains(),
            pitch: default_rotation_gains(),
            yaw: default_rotation_gains(),
            distance: default_distance_gains(),
            follow_line: FollowLineConfig::default(),
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            order: default_motor_order(),
            inverted: default_inverted(),
            channels: default_channels(),
            gripper_channel: default_gripper_channel(),
        }
    }
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            deadzone: default_deadzone(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            devices: default_camera_devices(),
            control_camera: default_control_camera(),
            frame_interval_ms: default_frame_interval_ms(),
            width: default_frame_width(),
            height: default_frame_height(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            random_seed: 0,
            orientation_stddev: default_orientation_stddev(),
            drift_step: default_drift_step(),
            water_temp: default_water_temp(),
            line_miss_rate: default_line_miss_rate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NetworkConfig {
    /// Address a listener binds for `port`
    pub fn bind_addr(&self, port: u16) -> String {
        format!("{}:{}", self.bind_address, port)
    }

    /// Address a connector dials for `port`
    pub fn peer_addr(&self, port: u16) -> String {
        format!("{}:{}", self.surface_host, port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<()> {
        let motors = &self.motors;
        if motors.order.is_empty() {
            return Err(Error::Config("motors.order is empty".into()));
        }
        if motors.inverted.len() != motors.order.len() {
            return Err(Error::Config(format!(
                "motors.inverted has {} entries, motors.order has {}",
                motors.inverted.len(),
                motors.order.len()
            )));
        }
        if motors.channels.len() != motors.order.len() {
            return Err(Error::Config(format!(
                "motors.channels has {} entries, motors.order has {}",
                motors.channels.len(),
                motors.order.len()
            )));
        }
        let mut seen = HashSet::new();
        for role in &motors.order {
            if !seen.insert(*role) {
                return Err(Error::Config(format!(
                    "motor role {:?} appears twice in motors.order",
                    role
                )));
            }
        }
        if self.control.tick_period_ms == 0 {
            return Err(Error::Config("control.tick_period_ms must be > 0".into()));
        }
        let limit = self.control.output_limit;
        if !(limit.is_finite() && limit > 0.0) {
            return Err(Error::Config(format!(
                "control.output_limit must be a finite value > 0, got {}",
                limit
            )));
        }
        if !self
            .cameras
            .devices
            .iter()
            .any(|d| d == &self.cameras.control_camera)
        {
            return Err(Error::Config(format!(
                "cameras.control_camera {:?} is not listed in cameras.devices",
                self.cameras.control_camera
            )));
        }
        if !(0.0..=1.0).contains(&self.simulation.line_miss_rate) {
            return Err(Error::Config(
                "simulation.line_miss_rate must be within [0, 1]".into(),
            ));
        }
        if self.queues.capacity == 0 {
            return Err(Error::Config("queues.capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.network.sensor_port, 6664);
        assert_eq!(config.network.command_port, 6665);
        assert_eq!(config.network.video_port, 6666);
        assert_eq!(config.network.reconnect_interval(), Duration::from_secs(2));
        assert_eq!(config.motors.order.len(), 8);
        assert_eq!(config.cameras.control_camera, "mainCam");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_matches_default() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.control.tick_period_ms, 35);
        assert_eq!(config.network.surface_host, "127.0.0.1");
        assert_eq!(config.control.roll, default_rotation_gains());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[network]
surface_host = "169.254.61.199"
command_port = 7000

[control]
tick_period_ms = 40

[control.yaw]
kp = 0.5
ki = 0.1

[motors]
order = ["backRight", "backLeft", "frontRight", "frontLeft",
         "vertBackRight", "vertBackLeft", "vertFrontRight", "vertFrontLeft"]
inverted = [true, false, false, false, false, false, false, true]

[logging]
level = "debug"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.network.surface_host, "169.254.61.199");
        assert_eq!(config.network.command_port, 7000);
        assert_eq!(config.network.sensor_port, 6664);
        assert_eq!(config.control.tick_period_ms, 40);
        assert_eq!(config.control.yaw, PidGains::new(0.5, 0.0, 0.1));
        assert_eq!(config.motors.order[0], MotorRole::BackRight);
        assert!(config.motors.inverted[7]);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_motor_tables() {
        let mut config = AppConfig::default();
        config.motors.inverted.pop();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.motors.order[1] = config.motors.order[0];
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unusable_output_limit() {
        for limit in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let mut config = AppConfig::default();
            config.control.output_limit = limit;
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "accepted {}",
                limit
            );
        }

        let config: AppConfig = toml::from_str("[control]\noutput_limit = nan").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_control_camera() {
        let mut config = AppConfig::default();
        config.cameras.control_camera = "bkpCam9".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queues]\ncapacity = 16").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.queues.capacity, 16);
    }

    #[test]
    fn test_shipped_sample_is_valid() {
        let config: AppConfig = toml::from_str(include_str!("../jala.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.motors.order, MotorRole::ALL.to_vec());
        assert_eq!(config.motors.gripper_channel, Some(8));
        assert_eq!(config.control.follow_line.pitch_setpoint_deg, -90.0);
        assert_eq!(config.cameras.control_camera, "mainCam");
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/jala.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
