//! Vehicle body geometry and the per-tick snapshot other agents see.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trafnet_env::{EntryId, Pose, VehicleUid};

/// Static shape of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub half_length: f64,
    pub half_width: f64,

    /// Trucks and buses: longer lane-shift advance
    pub large: bool,
}

impl VehicleProfile {
    pub const CAR: VehicleProfile = VehicleProfile {
        half_length: 2.3,
        half_width: 0.95,
        large: false,
    };

    pub const TRUCK: VehicleProfile = VehicleProfile {
        half_length: 4.5,
        half_width: 1.25,
        large: true,
    };
}

impl Default for VehicleProfile {
    fn default() -> Self {
        Self::CAR
    }
}

/// Reference points of a body in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyFrame {
    pub center: Vector3<f64>,
    pub forward: Vector3<f64>,
    pub right: Vector3<f64>,

    /// Centre of the front bumper
    pub nose: Vector3<f64>,
    pub nose_left: Vector3<f64>,
    pub nose_right: Vector3<f64>,
}

impl BodyFrame {
    pub fn new(pose: &Pose, profile: &VehicleProfile) -> Self {
        let forward = pose.forward.into_inner();
        let right = pose.right();
        let nose = pose.position + forward * profile.half_length;
        Self {
            center: pose.position,
            forward,
            right,
            nose,
            nose_left: nose - right * profile.half_width,
            nose_right: nose + right * profile.half_width,
        }
    }
}

/// What other agents may read about an agent during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSnapshot {
    pub uid: VehicleUid,
    pub pose: Pose,
    pub profile: VehicleProfile,
    pub speed: f64,
    pub entry: EntryId,
    pub in_accident: bool,
    pub force_collide: bool,
}

impl AgentSnapshot {
    pub fn frame(&self) -> BodyFrame {
        BodyFrame::new(&self.pose, &self.profile)
    }
}

/// Snapshot of every active agent, taken at the start of a tick.
pub type SnapshotMap = BTreeMap<VehicleUid, AgentSnapshot>;
