//! Holonomic thruster mixer
//!
//! Four corner thrusters handle horizontal translation and yaw, four vertical
//! thrusters handle depth, roll and pitch:
//!
//! | Role | Formula |
//! |------|---------|
//! | frontLeft | `x + y + yaw` |
//! | frontRight | `-x + y + yaw` |
//! | backLeft | `x - y + yaw` |
//! | backRight | `-x - y + yaw` |
//! | vertFrontLeft | `z + roll + pitch` |
//! | vertFrontRight | `z - roll + pitch` |
//! | vertBackLeft | `z + roll - pitch` |
//! | vertBackRight | `z - roll - pitch` |
//!
//! Every term is clamped to `[-1, 1]`, then placed into the configured slot
//! and negated if that slot is mounted inverted.

use crate::config::MotorConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotorRole {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
    VertFrontLeft,
    VertFrontRight,
    VertBackLeft,
    VertBackRight,
}

impl MotorRole {
    pub const ALL: [MotorRole; 8] = [
        MotorRole::FrontLeft,
        MotorRole::FrontRight,
        MotorRole::BackLeft,
        MotorRole::BackRight,
        MotorRole::VertFrontLeft,
        MotorRole::VertFrontRight,
        MotorRole::VertBackLeft,
        MotorRole::VertBackRight,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn is_vertical(self) -> bool {
        matches!(
            self,
            MotorRole::VertFrontLeft
                | MotorRole::VertFrontRight
                | MotorRole::VertBackLeft
                | MotorRole::VertBackRight
        )
    }
}

/// Thruster outputs by slot, each in `[-1, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MotorFrame(Vec<f32>);

impl MotorFrame {
    pub fn zero(slots: usize) -> Self {
        Self(vec![0.0; slots])
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self(values.into_iter().map(|v| v.clamp(-1.0, 1.0)).collect())
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

/// Raw per-role mix, indexed like [`MotorRole::ALL`]
pub fn mix_roles(x: f32, y: f32, z: f32, roll: f32, pitch: f32, yaw: f32) -> [f32; 8] {
    let c = |v: f32| v.clamp(-1.0, 1.0);
    let (x, y, z) = (c(x), c(y), c(z));
    let (roll, pitch, yaw) = (c(roll), c(pitch), c(yaw));
    [
        c(x + y + yaw),
        c(-x + y + yaw),
        c(x - y + yaw),
        c(-x - y + yaw),
        c(z + roll + pitch),
        c(z - roll + pitch),
        c(z + roll - pitch),
        c(z - roll - pitch),
    ]
}

/// Maps translation/rotation demands to slot-ordered thruster outputs
#[derive(Debug, Clone)]
pub struct DriveMixer {
    order: Vec<MotorRole>,
    inverted: Vec<bool>,
}

impl DriveMixer {
    pub fn new(order: Vec<MotorRole>, inverted: Vec<bool>) -> Result<Self> {
        if order.len() != inverted.len() {
            return Err(Error::Config(format!(
                "{} motor slots but {} inversion flags",
                order.len(),
                inverted.len()
            )));
        }
        for (i, role) in order.iter().enumerate() {
            if order[..i].contains(role) {
                return Err(Error::Config(format!("motor role {:?} used twice", role)));
            }
        }
        Ok(Self { order, inverted })
    }

    pub fn from_config(config: &MotorConfig) -> Result<Self> {
        Self::new(config.order.clone(), config.inverted.clone())
    }

    pub fn slots(&self) -> usize {
        self.order.len()
    }

    pub fn role(&self, slot: usize) -> Option<MotorRole> {
        self.order.get(slot).copied()
    }

    pub fn zero(&self) -> MotorFrame {
        MotorFrame::zero(self.slots())
    }

    pub fn mix(&self, x: f32, y: f32, z: f32, roll: f32, pitch: f32, yaw: f32) -> MotorFrame {
        let by_role = mix_roles(x, y, z, roll, pitch, yaw);
        let values = self
            .order
            .iter()
            .zip(&self.inverted)
            .map(|(role, inverted)| {
                let v = by_role[role.index()];
                if *inverted { -v } else { v }
            })
            .collect();
        MotorFrame(values)
    }
}

impl Default for DriveMixer {
    fn default() -> Self {
        Self {
            order: MotorRole::ALL.to_vec(),
            inverted: vec![false; MotorRole::ALL.len()],
        }
    }
}
