//! Collaborator interfaces the traffic engine talks to.
//!
//! The engine only reads positions and issues motion intents. Everything
//! spatial (ray casts, overlap tests, body poses), signal timing and observer
//! placement lives behind these traits so the same engine can be driven by a
//! physics engine, a spatial index, or the kinematic harness in `trafnet_sim`.

use crate::types::{LayerMask, LightId, LightState, Pose, VehicleUid};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Tag carried by static props that changes how agents react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropTag {
    /// Ordinary street furniture; agents may steer around it.
    Generic,
    /// Median / lane divider; never dodged around.
    RoadDivider,
}

/// What a query hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColliderKind {
    /// Another engine-driven vehicle.
    Vehicle(VehicleUid),
    /// An externally driven vehicle (ego / player) with its current motion.
    Player {
        speed: f64,
        forward: Vector3<f64>,
    },
    /// A static obstacle.
    Prop(PropTag),
}

impl ColliderKind {
    pub fn vehicle(&self) -> Option<VehicleUid> {
        match self {
            ColliderKind::Vehicle(uid) => Some(*uid),
            _ => None,
        }
    }
}

/// A ray cast result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Distance along the ray
    pub distance: f64,

    /// World-space contact point
    pub point: Vector3<f64>,

    /// The collider that was hit
    pub collider: ColliderKind,
}

/// Synchronous point-in-time spatial queries.
///
/// Expected to answer within the tick budget; the engine never caches the
/// world between ticks except for the last probe result.
pub trait WorldQuery {
    /// Casts a ray and returns the closest hit within `max_distance`.
    fn raycast(
        &self,
        origin: Vector3<f64>,
        direction: Vector3<f64>,
        max_distance: f64,
        mask: LayerMask,
    ) -> Option<Hit>;

    /// Returns every collider overlapping the capsule `a`–`b` of the given radius.
    fn capsule_overlap(
        &self,
        a: Vector3<f64>,
        b: Vector3<f64>,
        radius: f64,
        mask: LayerMask,
    ) -> Vec<ColliderKind>;

    /// Whether anything on `mask` overlaps the sphere.
    fn sphere_occupied(&self, point: Vector3<f64>, radius: f64, mask: LayerMask) -> bool;

    /// Closest point on `collider`'s surface to `point`, if the collider still exists.
    fn closest_point(&self, collider: &ColliderKind, point: Vector3<f64>) -> Option<Vector3<f64>>;

    /// Current pose of an engine vehicle's body.
    fn vehicle_pose(&self, uid: VehicleUid) -> Option<Pose>;

    /// Engine vehicles whose body lies within `radius` of `point`.
    fn vehicles_within(&self, point: Vector3<f64>, radius: f64) -> Vec<VehicleUid>;
}

/// Per-tick output of an agent, consumed by the motion integrator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionCommand {
    /// Yaw rate in degrees per second, clamped to the agent's max turn
    pub steer_deg: f64,

    /// Forward speed in units per second
    pub speed: f64,

    /// Deceleration demand exceeded the hard-brake threshold (brake lights)
    pub brake_hard: bool,

    pub left_signal: bool,
    pub right_signal: bool,
}

/// Receives motion intents; owns the actual bodies.
pub trait MotionIntegrator {
    /// Integrates one step of `command` over `dt` seconds.
    fn apply(&mut self, uid: VehicleUid, command: &MotionCommand, dt: f64);

    /// Materializes or teleports a body.
    fn place(&mut self, uid: VehicleUid, pose: Pose);

    /// Removes a body.
    fn remove(&mut self, uid: VehicleUid);

    /// Shows or hides a body. Hidden bodies keep their headlights off.
    fn set_render(&mut self, _uid: VehicleUid, _visible: bool, _headlights: bool) {}
}

/// Read-only traffic light state.
pub trait SignalState {
    fn light_state(&self, light: LightId) -> LightState;
}

/// Where the observers (cameras, ego vehicles) are.
pub trait ObserverView {
    /// Distance to the closest observer; `f64::INFINITY` when there is none.
    fn nearest_observer_distance(&self, point: Vector3<f64>) -> f64;

    /// Whether a sphere at `point` could be seen by any observer.
    fn is_visible(&self, point: Vector3<f64>, radius: f64) -> bool;
}
