//! Snapshots consumed by the control loop
//!
//! - [`GamepadState`]: written by the input worker, read by the control loop;
//!   lock-free via atomics.
//! - [`SensorSnapshot`] and [`CameraFrame`]: decoded from inbox packets and
//!   replaced wholesale, owned by the control thread.

use crate::error::{Error, Result};
use crate::streaming::packet::{Packet, Tag};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Atomic wrapper for f32 values.
/// Uses AtomicU32 with bit reinterpretation.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, val: f32, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Continuous gamepad inputs, normalized to `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Left stick horizontal: lateral translation
    LeftX,
    /// Left stick vertical: forward translation
    LeftY,
    /// Right stick horizontal: yaw
    RightX,
    /// Right stick vertical: depth
    RightY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Zero all thrusters and drop to user control
    ZeroMotors,
    /// Raw passthrough while held
    Override,
    GripOpen,
    GripClose,
}

/// Latest gamepad state; single writer, many readers
#[derive(Debug, Default)]
pub struct GamepadState {
    left_x: AtomicF32,
    left_y: AtomicF32,
    right_x: AtomicF32,
    right_y: AtomicF32,
    zero_motors: AtomicBool,
    override_held: AtomicBool,
    grip_open: AtomicBool,
    grip_close: AtomicBool,
}

/// Plain copy of [`GamepadState`] taken once per tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GamepadSnapshot {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub zero_motors: bool,
    pub override_held: bool,
    pub grip_open: bool,
    pub grip_close: bool,
}

impl GamepadState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_axis(&self, axis: Axis, value: f32) {
        let value = if value.is_finite() {
            value.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self.axis(axis).store(value, Ordering::Relaxed);
    }

    pub fn set_button(&self, button: Button, pressed: bool) {
        self.button(button).store(pressed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GamepadSnapshot {
        GamepadSnapshot {
            left_x: self.left_x.load(Ordering::Relaxed),
            left_y: self.left_y.load(Ordering::Relaxed),
            right_x: self.right_x.load(Ordering::Relaxed),
            right_y: self.right_y.load(Ordering::Relaxed),
            zero_motors: self.zero_motors.load(Ordering::Relaxed),
            override_held: self.override_held.load(Ordering::Relaxed),
            grip_open: self.grip_open.load(Ordering::Relaxed),
            grip_close: self.grip_close.load(Ordering::Relaxed),
        }
    }

    /// Return sticks to center and release every button
    pub fn clear(&self) {
        for axis in [Axis::LeftX, Axis::LeftY, Axis::RightX, Axis::RightY] {
            self.set_axis(axis, 0.0);
        }
        for button in [
            Button::ZeroMotors,
            Button::Override,
            Button::GripOpen,
            Button::GripClose,
        ] {
            self.set_button(button, false);
        }
    }

    fn axis(&self, axis: Axis) -> &AtomicF32 {
        match axis {
            Axis::LeftX => &self.left_x,
            Axis::LeftY => &self.left_y,
            Axis::RightX => &self.right_x,
            Axis::RightY => &self.right_y,
        }
    }

    fn button(&self, button: Button) -> &AtomicBool {
        match button {
            Button::ZeroMotors => &self.zero_motors,
            Button::Override => &self.override_held,
            Button::GripOpen => &self.grip_open,
            Button::GripClose => &self.grip_close,
        }
    }
}

impl GamepadSnapshot {
    /// Gripper direction: 1 open, -1 close, 0 idle
    pub fn grip(&self) -> i8 {
        match (self.grip_open, self.grip_close) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        }
    }
}

/// Zero out stick values inside the dead zone
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone { 0.0 } else { value }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// IMU calibration levels, 0 (none) to 3 (full)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default)]
    pub sys: u8,
    #[serde(default)]
    pub gyro: u8,
    #[serde(default)]
    pub accel: u8,
    #[serde(default)]
    pub mag: u8,
}

/// Latest inertial reading
///
/// `gyro` is the fused orientation in degrees (roll, pitch, yaw), `linear`
/// the linear velocity estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    pub gyro: Vec3,
    pub linear: Vec3,
    pub calibration: Calibration,
    pub temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ImuWire {
    #[serde(default)]
    calibration: Calibration,
    #[serde(default)]
    gyro: Vec3,
    #[serde(default, alias = "linear")]
    vel: Vec3,
}

impl SensorSnapshot {
    /// Encode as `{"imu":{"calibration":..,"gyro":..,"vel":..},"temp":..}`
    pub fn to_value(&self) -> Value {
        json!({
            "imu": ImuWire {
                calibration: self.calibration,
                gyro: self.gyro,
                vel: self.linear,
            },
            "temp": self.temperature,
        })
    }

    /// Decode from packet data
    ///
    /// Accepts the nested `imu` layout or a flat record with the IMU fields
    /// at top level.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Other(format!("sensor data is not a record: {}", value)));
        }
        let imu_value = value.get("imu").unwrap_or(value);
        let imu: ImuWire = serde_json::from_value(imu_value.clone())?;
        let temperature = value
            .get("temp")
            .and_then(Value::as_f64)
            .unwrap_or_default() as f32;
        Ok(Self {
            gyro: imu.gyro,
            linear: imu.vel,
            calibration: imu.calibration,
            temperature,
        })
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(Tag::Sensor, self.to_value())
    }
}

/// One encoded camera image
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct CameraWire {
    width: u32,
    height: u32,
    image: String,
}

impl CameraFrame {
    /// `cam` packet; device id in metadata, image base64-encoded
    pub fn to_packet(&self) -> Result<Packet> {
        let data = serde_json::to_value(CameraWire {
            width: self.width,
            height: self.height,
            image: BASE64.encode(&self.jpeg),
        })?;
        Ok(Packet::new(Tag::Cam, data).with_metadata(self.device.clone()))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.tag != Tag::Cam {
            return Err(Error::Other(format!("expected cam packet, got {}", packet.tag)));
        }
        let wire: CameraWire = serde_json::from_value(packet.data.clone())?;
        let jpeg = BASE64
            .decode(wire.image.as_bytes())
            .map_err(|e| Error::Other(format!("bad image encoding: {}", e)))?;
        Ok(Self {
            device: packet.metadata.clone(),
            width: wire.width,
            height: wire.height,
            jpeg,
        })
    }
}

/// Line detector output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMeasurement {
    /// Separation of the two guide lines, in pixels
    pub distance: f32,
    /// Deviation from parallel to the lines, in degrees
    pub angle_error: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32() {
        let a = AtomicF32::new(1.5);
        assert_eq!(a.load(Ordering::Relaxed), 1.5);
        a.store(-0.25, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), -0.25);
    }

    #[test]
    fn test_gamepad_snapshot_and_clamp() {
        let pad = GamepadState::new();
        pad.set_axis(Axis::LeftY, 0.5);
        pad.set_axis(Axis::RightX, 3.0);
        pad.set_axis(Axis::RightY, f32::NAN);
        pad.set_button(Button::GripClose, true);
        let snap = pad.snapshot();
        assert_eq!(snap.left_y, 0.5);
        assert_eq!(snap.right_x, 1.0);
        assert_eq!(snap.right_y, 0.0);
        assert_eq!(snap.grip(), -1);

        pad.clear();
        assert_eq!(pad.snapshot(), GamepadSnapshot::default());
    }

    #[test]
    fn test_deadzone() {
        assert_eq!(apply_deadzone(0.004, 0.005), 0.0);
        assert_eq!(apply_deadzone(-0.3, 0.05), -0.3);
    }

    #[test]
    fn test_sensor_nested_layout() {
        let snap = SensorSnapshot {
            gyro: Vec3::new(1.0, 2.0, 3.0),
            linear: Vec3::new(0.1, 0.0, -0.1),
            calibration: Calibration {
                sys: 3,
                gyro: 3,
                accel: 2,
                mag: 1,
            },
            temperature: 18.5,
        };
        let value = snap.to_value();
        assert_eq!(value["imu"]["gyro"]["z"], 3.0);
        assert_eq!(value["imu"]["calibration"]["accel"], 2);
        assert_eq!(SensorSnapshot::from_value(&value).unwrap(), snap);
    }

    #[test]
    fn test_sensor_flat_layout() {
        let snap = SensorSnapshot::from_value(&json!({"gyro": {"x": 1, "y": 2, "z": 3}})).unwrap();
        assert_eq!(snap.gyro, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(snap.temperature, 0.0);
        assert!(SensorSnapshot::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_camera_frame_packet() {
        let frame = CameraFrame {
            device: "mainCam".into(),
            width: 4,
            height: 2,
            jpeg: vec![0xFF, 0xD8, b'|', 0x00, 0xFF, 0xD9],
        };
        let packet = frame.to_packet().unwrap();
        assert_eq!(packet.tag, Tag::Cam);
        assert_eq!(packet.metadata, "mainCam");
        assert_eq!(CameraFrame::from_packet(&packet).unwrap(), frame);

        let not_cam = Packet::new(Tag::Log, json!({}));
        assert!(CameraFrame::from_packet(&not_cam).is_err());
    }
}
