//! Control modes and operator commands

use crate::control::state::Vec3;
use crate::streaming::packet::{Packet, Tag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMode {
    #[default]
    UserControl,
    StabilizeInit,
    Stabilize,
    FollowLineInit,
    FollowLine,
    HoldAngleInit,
    HoldAngle,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::UserControl => "user-control",
            ControlMode::StabilizeInit => "stabilize-init",
            ControlMode::Stabilize => "stabilize",
            ControlMode::FollowLineInit => "follow-line-init",
            ControlMode::FollowLine => "follow-line",
            ControlMode::HoldAngleInit => "hold-angle-init",
            ControlMode::HoldAngle => "hold-angle",
        }
    }

    pub fn is_init(self) -> bool {
        matches!(
            self,
            ControlMode::StabilizeInit | ControlMode::FollowLineInit | ControlMode::HoldAngleInit
        )
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator command carried by a `stateChange` packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    StopMotors,
    Stabilize(Vec3),
    FollowLine,
    HoldAngle(Vec3),
    Close,
    RestartCamStream,
}

impl Command {
    /// Parse a `stateChange` packet; other packets and unknown events yield `None`
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        let event = packet.event_name()?;
        let command = match event {
            "stop-motors" => Command::StopMotors,
            "stabilize" => Command::Stabilize(parse_target(&packet.data)),
            "follow-line" => Command::FollowLine,
            "hold-angle" => Command::HoldAngle(parse_target(&packet.data)),
            "close" => Command::Close,
            "restartCamStream" => Command::RestartCamStream,
            _ => return None,
        };
        Some(command)
    }

    /// Commands that request a mode change
    pub fn is_mode_request(&self) -> bool {
        matches!(
            self,
            Command::Stabilize(_) | Command::FollowLine | Command::HoldAngle(_)
        )
    }
}

/// Target orientation from `{"x","y","z"}` or `[x, y, z]`; missing parts are 0
fn parse_target(data: &Value) -> Vec3 {
    let num = |v: Option<&Value>| v.and_then(Value::as_f64).unwrap_or(0.0) as f32;
    match data {
        Value::Array(items) => Vec3::new(num(items.first()), num(items.get(1)), num(items.get(2))),
        Value::Object(_) => Vec3::new(num(data.get("x")), num(data.get("y")), num(data.get("z"))),
        _ => Vec3::default(),
    }
}

/// PID loops that can be retuned at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidAxis {
    Roll,
    Pitch,
    Yaw,
    Distance,
}

/// `settingChange` payload retuning one PID loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainUpdate {
    pub controller: PidAxis,
    pub kp: f32,
    pub kd: f32,
    pub ki: f32,
}

impl GainUpdate {
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        if packet.tag != Tag::SettingChange {
            return None;
        }
        serde_json::from_value(packet.data.clone()).ok()
    }
}
