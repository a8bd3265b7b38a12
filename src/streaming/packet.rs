//! Packet model shared by both nodes
//!
//! Every frame on every channel carries one [`Packet`] serialized as a JSON
//! record:
//!
//! ```text
//! {"tag":"sensor","data":{...},"timestamp":1700000000.0,"metadata":"","highPriority":false}
//! ```
//!
//! `tag` selects the routing destination, `metadata` refines it (device id for
//! `cam`, event name for `stateChange`), and `data` is free-form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata value used when a packet has nothing to qualify it with
pub const NO_METADATA: &str = "None";

/// Metadata attached to motor frames
pub const DRIVETRAIN: &str = "drivetrain";

/// Packet tag
///
/// Unknown strings are preserved in [`Tag::Unknown`] so newer peers can send
/// tags this build does not route yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    Sensor,
    Cam,
    MotorData,
    StateChange,
    SettingChange,
    Log,
    GripData,
    Unknown(String),
}

impl Tag {
    pub fn as_str(&self) -> &str {
        match self {
            Tag::Sensor => "sensor",
            Tag::Cam => "cam",
            Tag::MotorData => "motorData",
            Tag::StateChange => "stateChange",
            Tag::SettingChange => "settingChange",
            Tag::Log => "log",
            Tag::GripData => "gripData",
            Tag::Unknown(s) => s,
        }
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sensor" => Tag::Sensor,
            "cam" => Tag::Cam,
            "motorData" => Tag::MotorData,
            "stateChange" => Tag::StateChange,
            "settingChange" => Tag::SettingChange,
            "log" => Tag::Log,
            "gripData" => Tag::GripData,
            _ => Tag::Unknown(s),
        }
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag::from(s.to_string())
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Unknown(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub tag: Tag,
    #[serde(default)]
    pub data: Value,
    /// Unix time in seconds at creation
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: String,
    /// Advisory only; nothing schedules on it
    #[serde(default)]
    pub high_priority: bool,
}

impl Packet {
    /// Create a packet stamped with the current time
    pub fn new(tag: impl Into<Tag>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
            timestamp: unix_now(),
            metadata: NO_METADATA.to_string(),
            high_priority: false,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn with_priority(mut self, high: bool) -> Self {
        self.high_priority = high;
        self
    }

    /// `stateChange` event; the event name travels in `metadata`
    pub fn state_change(event: &str, data: Value) -> Self {
        Packet::new(Tag::StateChange, data)
            .with_metadata(event)
            .with_priority(true)
    }

    /// `log` packet with a named topic
    pub fn log(topic: &str, data: Value) -> Self {
        Packet::new(Tag::Log, data).with_metadata(topic)
    }

    /// Event name of a `stateChange` packet
    ///
    /// Peers put the event in `metadata`; older ones send it as a bare string
    /// in `data` with no metadata (`{"data":"close"}`). Both are accepted.
    pub fn event_name(&self) -> Option<&str> {
        if self.tag != Tag::StateChange {
            return None;
        }
        if !self.metadata.is_empty() && self.metadata != NO_METADATA {
            return Some(self.metadata.as_str());
        }
        self.data.as_str()
    }

    /// Seconds between creation and now
    pub fn age(&self) -> f64 {
        unix_now() - self.timestamp
    }
}

/// Current unix time as float seconds
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_strings() {
        assert_eq!(Tag::from("motorData"), Tag::MotorData);
        assert_eq!(Tag::from("stateChange"), Tag::StateChange);
        assert_eq!(Tag::from("thrustSpds"), Tag::Unknown("thrustSpds".into()));
        assert_eq!(String::from(Tag::GripData), "gripData");
        assert_eq!(Tag::Unknown("x".into()).to_string(), "x");
    }

    #[test]
    fn test_field_names_on_wire() {
        let p = Packet {
            tag: Tag::MotorData,
            data: json!([0.0, 0.5]),
            timestamp: 12.5,
            metadata: DRIVETRAIN.into(),
            high_priority: true,
        };
        let v: Value = serde_json::to_value(&p).unwrap();
        assert_eq!(v["tag"], "motorData");
        assert_eq!(v["highPriority"], true);
        assert_eq!(v["metadata"], "drivetrain");
        assert_eq!(v["timestamp"], 12.5);
    }

    #[test]
    fn test_unknown_tag_survives_decode() {
        let raw = r#"{"tag":"coralHealth","data":1,"timestamp":3.0,"metadata":"x","highPriority":false}"#;
        let p: Packet = serde_json::from_str(raw).unwrap();
        assert_eq!(p.tag, Tag::Unknown("coralHealth".into()));
        let back = serde_json::to_string(&p).unwrap();
        assert!(back.contains(r#""tag":"coralHealth""#));
    }

    #[test]
    fn test_missing_optional_fields() {
        let p: Packet = serde_json::from_str(r#"{"tag":"log"}"#).unwrap();
        assert_eq!(p.data, Value::Null);
        assert_eq!(p.metadata, "");
        assert!(!p.high_priority);
    }

    #[test]
    fn test_event_name() {
        let p = Packet::state_change("stop-motors", Value::Null);
        assert_eq!(p.event_name(), Some("stop-motors"));

        let legacy = Packet::new(Tag::StateChange, json!("close"));
        assert_eq!(legacy.event_name(), Some("close"));

        let sensor = Packet::new(Tag::Sensor, json!("close"));
        assert_eq!(sensor.event_name(), None);
    }

    #[test]
    fn test_new_is_timestamped() {
        let p = Packet::new(Tag::Log, json!("hi"));
        assert!(p.timestamp > 1_600_000_000.0);
        assert!(p.age() >= 0.0);
    }
}
