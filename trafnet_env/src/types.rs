//! Common types shared by the engine and its collaborators.

use crate::error::EnvError;
use nalgebra::{Unit, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a road entry: `(major, sub)`.
///
/// Lane entries of the same road share a major id and differ by sub id;
/// the connectors of one intersection share the intersection's major id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId {
    pub major: u32,
    pub sub: u32,
}

impl EntryId {
    pub const fn new(major: u32, sub: u32) -> Self {
        Self { major, sub }
    }

    /// The neighbouring sub-lane on the same road, if the offset stays non-negative.
    pub fn sibling(&self, offset: i32) -> Option<EntryId> {
        let sub = self.sub as i64 + offset as i64;
        if sub < 0 || sub > u32::MAX as i64 {
            return None;
        }
        Some(EntryId::new(self.major, sub as u32))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.major, self.sub)
    }
}

impl FromStr for EntryId {
    type Err = EnvError;

    /// Parses the `major_sub` form used in logs and route files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, sub) = s
            .split_once('_')
            .ok_or_else(|| EnvError::parse(format!("expected major_sub, got '{}'", s)))?;
        let major = major
            .trim()
            .parse()
            .map_err(|_| EnvError::parse(format!("bad major id in '{}'", s)))?;
        let sub = sub
            .trim()
            .parse()
            .map_err(|_| EnvError::parse(format!("bad sub id in '{}'", s)))?;
        Ok(EntryId::new(major, sub))
    }
}

/// Identifier of an intersection (owner of a stop queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntersectionId(pub u32);

/// Identifier of a traffic light head, resolved by a [`crate::SignalState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LightId(pub u32);

/// Persistent identifier of a simulated vehicle.
///
/// Ids survive respawns and are recycled through the spawner's free-id pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleUid(pub Uuid);

impl VehicleUid {
    /// Creates a new random id from OS entropy.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Draws a pseudo-random id from the given generator (deterministic under a seeded RNG).
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes);
        // Stamp version 4 / RFC 4122 variant so the id formats like any other v4 UUID.
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(Uuid::from_bytes(bytes))
    }

    /// Creates a deterministic id from a seed (tests and fixtures).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for VehicleUid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VehicleUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// State of a traffic light head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightState {
    Red,
    Yellow,
    Green,
}

impl FromStr for LightState {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(LightState::Red),
            "yellow" | "amber" => Ok(LightState::Yellow),
            "green" => Ok(LightState::Green),
            other => Err(EnvError::parse(format!("unknown light state '{}'", other))),
        }
    }
}

/// Position and heading of a vehicle body.
///
/// The world is Y-up; `forward` is kept horizontal and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub forward: Unit<Vector3<f64>>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, forward: Vector3<f64>) -> Self {
        let flat = Vector3::new(forward.x, 0.0, forward.z);
        let forward = Unit::try_new(flat, 1e-9).unwrap_or_else(Vector3::z_axis);
        Self { position, forward }
    }

    /// Pose at `position` facing `target` (flattened onto the ground plane).
    pub fn looking_at(position: Vector3<f64>, target: Vector3<f64>) -> Self {
        Self::new(position, target - position)
    }

    /// Unit vector pointing to the vehicle's right.
    pub fn right(&self) -> Vector3<f64> {
        Vector3::y().cross(self.forward.as_ref())
    }

    /// Heading in degrees, clockwise from +Z when seen from above.
    pub fn heading_deg(&self) -> f64 {
        self.forward.x.atan2(self.forward.z).to_degrees()
    }
}

/// Bit mask selecting collider layers for world queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const GROUND: LayerMask = LayerMask(1 << 0);
    pub const VEHICLE: LayerMask = LayerMask(1 << 1);
    pub const PLAYER: LayerMask = LayerMask(1 << 2);
    pub const PROP: LayerMask = LayerMask(1 << 3);
    pub const CONCAVE_PROP: LayerMask = LayerMask(1 << 4);
    pub const ALL: LayerMask = LayerMask(u32::MAX);

    pub const fn union(self, other: LayerMask) -> LayerMask {
        LayerMask(self.0 | other.0)
    }

    pub const fn without(self, other: LayerMask) -> LayerMask {
        LayerMask(self.0 & !other.0)
    }

    pub const fn contains(self, other: LayerMask) -> bool {
        self.0 & other.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_entry_id_parse_and_display() {
        let id: EntryId = "12_3".parse().unwrap();
        assert_eq!(id, EntryId::new(12, 3));
        assert_eq!(id.to_string(), "12_3");
        assert!("12".parse::<EntryId>().is_err());
        assert!("a_1".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_id_sibling() {
        let id = EntryId::new(4, 0);
        assert_eq!(id.sibling(1), Some(EntryId::new(4, 1)));
        assert_eq!(id.sibling(-1), None);
    }

    #[test]
    fn test_vehicle_uid_generate_deterministic() {
        let mut a = rand::rngs::StdRng::seed_from_u64(7);
        let mut b = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(VehicleUid::generate(&mut a), VehicleUid::generate(&mut b));
        assert_eq!(VehicleUid::generate(&mut a).as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_pose_right_hand_side() {
        let pose = Pose::new(Vector3::zeros(), Vector3::z());
        assert!((pose.right() - Vector3::x()).norm() < 1e-12);
        assert_eq!(pose.heading_deg(), 0.0);
    }

    #[test]
    fn test_layer_mask_ops() {
        let mask = LayerMask::ALL.without(LayerMask::GROUND);
        assert!(mask.contains(LayerMask::VEHICLE));
        assert!(!mask.contains(LayerMask::GROUND));
        assert!(LayerMask::VEHICLE.union(LayerMask::PLAYER).contains(LayerMask::PLAYER));
    }

    #[test]
    fn test_light_state_parse() {
        assert_eq!("GREEN".parse::<LightState>().unwrap(), LightState::Green);
        assert!("blue".parse::<LightState>().is_err());
    }
}
