//! Ground truth oracle for simulation.
//!
//! The Oracle is the world the engine drives:
//! - Oriented boxes for vehicles, the player and props (flat XZ geometry)
//! - Kinematic integration of motion intents
//! - Observers for LOD and silent respawns
//!
//! It implements every collaborator trait of `trafnet_env` except signals.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trafnet_core::geometry::{closest_point_on_segment_xz, flat, normalize_or_zero};
use trafnet_core::VehicleProfile;
use trafnet_env::{
    ColliderKind, Hit, LayerMask, MotionCommand, MotionIntegrator, ObserverView, Pose, PropTag,
    VehicleUid, WorldQuery,
};

const EPS: f64 = 1e-6;

/// A box on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obb {
    pub center: Vector3<f64>,
    /// Unit, horizontal
    pub forward: Vector3<f64>,
    pub half_length: f64,
    pub half_width: f64,
}

impl Obb {
    pub fn new(pose: &Pose, half_length: f64, half_width: f64) -> Self {
        Self {
            center: pose.position,
            forward: pose.forward.into_inner(),
            half_length,
            half_width,
        }
    }

    fn right(&self) -> Vector3<f64> {
        Vector3::y().cross(&self.forward)
    }

    /// (along, across) coordinates of `p` in the box frame.
    fn local(&self, p: Vector3<f64>) -> (f64, f64) {
        let d = flat(p - self.center);
        (d.dot(&self.forward), d.dot(&self.right()))
    }

    pub fn corners(&self) -> [Vector3<f64>; 4] {
        let f = self.forward * self.half_length;
        let r = self.right() * self.half_width;
        [
            self.center + f + r,
            self.center + f - r,
            self.center - f - r,
            self.center - f + r,
        ]
    }

    pub fn contains(&self, p: Vector3<f64>) -> bool {
        let (u, v) = self.local(p);
        u.abs() <= self.half_length && v.abs() <= self.half_width
    }

    pub fn closest_point(&self, p: Vector3<f64>) -> Vector3<f64> {
        let (u, v) = self.local(p);
        let u = u.clamp(-self.half_length, self.half_length);
        let v = v.clamp(-self.half_width, self.half_width);
        let mut q = self.center + self.forward * u + self.right() * v;
        q.y = p.y;
        q
    }

    pub fn distance(&self, p: Vector3<f64>) -> f64 {
        flat(self.closest_point(p) - p).norm()
    }

    /// Slab test. Rays starting inside or on the box never hit it.
    pub fn ray(&self, origin: Vector3<f64>, direction: Vector3<f64>, max: f64) -> Option<f64> {
        let (ou, ov) = self.local(origin);
        let du = direction.dot(&self.forward);
        let dv = direction.dot(&self.right());
        let mut t_enter = f64::NEG_INFINITY;
        let mut t_exit = f64::INFINITY;
        for (o, d, h) in [(ou, du, self.half_length), (ov, dv, self.half_width)] {
            if d.abs() < EPS {
                if o.abs() > h {
                    return None;
                }
                continue;
            }
            let (a, b) = ((-h - o) / d, (h - o) / d);
            t_enter = t_enter.max(a.min(b));
            t_exit = t_exit.min(a.max(b));
        }
        (t_enter <= t_exit && t_enter > EPS && t_enter <= max).then_some(t_enter)
    }

    /// Distance between the box and the segment `a`-`b`.
    pub fn segment_distance(&self, a: Vector3<f64>, b: Vector3<f64>) -> f64 {
        let span = flat(b - a);
        let length = span.norm();
        if self.contains(a) || self.contains(b) {
            return 0.0;
        }
        if length > EPS && self.ray(a, span / length, length).is_some() {
            return 0.0;
        }
        let from_ends = self.distance(a).min(self.distance(b));
        self.corners()
            .iter()
            .map(|c| flat(closest_point_on_segment_xz(*c, a, b) - c).norm())
            .fold(from_ends, f64::min)
    }

    /// Separating axis test.
    pub fn overlaps(&self, other: &Obb) -> bool {
        let axes = [self.forward, self.right(), other.forward, other.right()];
        axes.iter().all(|axis| {
            let project = |obb: &Obb| {
                let c = flat(obb.center).dot(axis);
                let r = (obb.forward.dot(axis) * obb.half_length).abs()
                    + (obb.right().dot(axis) * obb.half_width).abs();
                (c - r, c + r)
            };
            let (a0, a1) = project(self);
            let (b0, b1) = project(other);
            a0 <= b1 && b0 <= a1
        })
    }
}

/// One engine-driven body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub pose: Pose,
    pub half_length: f64,
    pub half_width: f64,
    pub command: MotionCommand,
    pub visible: bool,
    pub headlights: bool,
}

impl Body {
    pub fn obb(&self) -> Obb {
        Obb::new(&self.pose, self.half_length, self.half_width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prop {
    pub obb: Obb,
    pub tag: PropTag,
}

/// The externally driven vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub pose: Pose,
    pub speed: f64,
    pub half_length: f64,
    pub half_width: f64,
}

impl Player {
    pub fn obb(&self) -> Obb {
        Obb::new(&self.pose, self.half_length, self.half_width)
    }
}

/// A camera with a view cone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub position: Vector3<f64>,
    pub forward: Vector3<f64>,
    pub view_distance: f64,
    pub fov_deg: f64,
}

impl Observer {
    pub fn sees(&self, point: Vector3<f64>, radius: f64) -> bool {
        let to = flat(point - self.position);
        let distance = to.norm();
        if distance <= radius {
            return true;
        }
        if distance - radius > self.view_distance {
            return false;
        }
        let slack = (radius / distance).asin().to_degrees();
        let angle = trafnet_core::geometry::angle_deg(&flat(self.forward), &to);
        angle <= self.fov_deg * 0.5 + slack
    }
}

/// A contact between two bodies, as seen from `uid`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub uid: VehicleUid,
    pub other: ColliderKind,
}

/// The Oracle - ground truth for every body in the world.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    bodies: BTreeMap<VehicleUid, Body>,
    props: Vec<Prop>,
    player: Option<Player>,
    observers: Vec<Observer>,
    current_time: f64,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resizes a body to match its vehicle profile.
    pub fn set_profile(&mut self, uid: VehicleUid, profile: &VehicleProfile) {
        if let Some(body) = self.bodies.get_mut(&uid) {
            body.half_length = profile.half_length;
            body.half_width = profile.half_width;
        }
    }

    pub fn add_prop(&mut self, center: Vector3<f64>, forward: Vector3<f64>, half_length: f64, half_width: f64, tag: PropTag) {
        let pose = Pose::new(center, forward);
        self.props.push(Prop {
            obb: Obb::new(&pose, half_length, half_width),
            tag,
        });
    }

    pub fn clear_props(&mut self) {
        self.props.clear();
    }

    pub fn set_player(&mut self, player: Option<Player>) {
        self.player = player;
    }

    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    pub fn add_observer(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub fn observers_mut(&mut self) -> &mut Vec<Observer> {
        &mut self.observers
    }

    pub fn body(&self, uid: VehicleUid) -> Option<&Body> {
        self.bodies.get(&uid)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (&VehicleUid, &Body)> {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// Advances the clock and the player by `dt`.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        if let Some(player) = self.player.as_mut() {
            player.pose.position += player.pose.forward.into_inner() * player.speed * dt;
        }
    }

    /// Every overlapping pair, reported once per participating vehicle.
    pub fn contacts(&self) -> Vec<Contact> {
        let boxes: Vec<(VehicleUid, Obb)> = self.bodies.iter().map(|(uid, b)| (*uid, b.obb())).collect();
        let mut contacts = Vec::new();
        for (i, (uid, obb)) in boxes.iter().enumerate() {
            for (other_uid, other) in boxes.iter().skip(i + 1) {
                if obb.overlaps(other) {
                    contacts.push(Contact {
                        uid: *uid,
                        other: ColliderKind::Vehicle(*other_uid),
                    });
                    contacts.push(Contact {
                        uid: *other_uid,
                        other: ColliderKind::Vehicle(*uid),
                    });
                }
            }
            if let Some(player) = &self.player {
                if obb.overlaps(&player.obb()) {
                    contacts.push(Contact {
                        uid: *uid,
                        other: ColliderKind::Player {
                            speed: player.speed,
                            forward: player.pose.forward.into_inner(),
                        },
                    });
                }
            }
        }
        contacts
    }

    /// Colliders on `mask` with their boxes.
    fn colliders(&self, mask: LayerMask) -> Vec<(ColliderKind, Obb)> {
        let mut out = Vec::new();
        if mask.contains(LayerMask::VEHICLE) {
            out.extend(
                self.bodies
                    .iter()
                    .map(|(uid, b)| (ColliderKind::Vehicle(*uid), b.obb())),
            );
        }
        if mask.contains(LayerMask::PLAYER) {
            if let Some(p) = &self.player {
                out.push((
                    ColliderKind::Player {
                        speed: p.speed,
                        forward: p.pose.forward.into_inner(),
                    },
                    p.obb(),
                ));
            }
        }
        if mask.contains(LayerMask::PROP) {
            out.extend(self.props.iter().map(|p| (ColliderKind::Prop(p.tag), p.obb)));
        }
        out
    }
}

impl WorldQuery for Oracle {
    fn raycast(&self, origin: Vector3<f64>, direction: Vector3<f64>, max_distance: f64, mask: LayerMask) -> Option<Hit> {
        let dir = normalize_or_zero(flat(direction));
        if dir == Vector3::zeros() {
            return None;
        }
        self.colliders(mask)
            .into_iter()
            .filter_map(|(collider, obb)| {
                obb.ray(origin, dir, max_distance).map(|distance| Hit {
                    distance,
                    point: origin + dir * distance,
                    collider,
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn capsule_overlap(&self, a: Vector3<f64>, b: Vector3<f64>, radius: f64, mask: LayerMask) -> Vec<ColliderKind> {
        self.colliders(mask)
            .into_iter()
            .filter(|(_, obb)| obb.segment_distance(a, b) <= radius)
            .map(|(collider, _)| collider)
            .collect()
    }

    fn sphere_occupied(&self, point: Vector3<f64>, radius: f64, mask: LayerMask) -> bool {
        self.colliders(mask)
            .iter()
            .any(|(_, obb)| obb.distance(point) <= radius)
    }

    fn closest_point(&self, collider: &ColliderKind, point: Vector3<f64>) -> Option<Vector3<f64>> {
        match collider {
            ColliderKind::Vehicle(uid) => self.bodies.get(uid).map(|b| b.obb().closest_point(point)),
            ColliderKind::Player { .. } => self.player.map(|p| p.obb().closest_point(point)),
            ColliderKind::Prop(tag) => self
                .props
                .iter()
                .filter(|p| p.tag == *tag)
                .map(|p| p.obb.closest_point(point))
                .min_by(|a, b| (a - point).norm().total_cmp(&(b - point).norm())),
        }
    }

    fn vehicle_pose(&self, uid: VehicleUid) -> Option<Pose> {
        self.bodies.get(&uid).map(|b| b.pose)
    }

    fn vehicles_within(&self, point: Vector3<f64>, radius: f64) -> Vec<VehicleUid> {
        self.bodies
            .iter()
            .filter(|(_, b)| flat(b.pose.position - point).norm() <= radius)
            .map(|(uid, _)| *uid)
            .collect()
    }
}

impl MotionIntegrator for Oracle {
    fn apply(&mut self, uid: VehicleUid, command: &MotionCommand, dt: f64) {
        let Some(body) = self.bodies.get_mut(&uid) else {
            return;
        };
        let yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), (command.steer_deg * dt).to_radians());
        let forward = yaw * body.pose.forward.into_inner();
        body.pose = Pose::new(body.pose.position + forward * command.speed * dt, forward);
        body.command = *command;
    }

    fn place(&mut self, uid: VehicleUid, pose: Pose) {
        let profile = VehicleProfile::CAR;
        let body = self.bodies.entry(uid).or_insert(Body {
            pose,
            half_length: profile.half_length,
            half_width: profile.half_width,
            command: MotionCommand::default(),
            visible: true,
            headlights: true,
        });
        body.pose = pose;
        body.command = MotionCommand::default();
    }

    fn remove(&mut self, uid: VehicleUid) {
        self.bodies.remove(&uid);
    }

    fn set_render(&mut self, uid: VehicleUid, visible: bool, headlights: bool) {
        if let Some(body) = self.bodies.get_mut(&uid) {
            body.visible = visible;
            body.headlights = headlights;
        }
    }
}

impl ObserverView for Oracle {
    fn nearest_observer_distance(&self, point: Vector3<f64>) -> f64 {
        self.observers
            .iter()
            .map(|o| flat(o.position - point).norm())
            .fold(f64::INFINITY, f64::min)
    }

    fn is_visible(&self, point: Vector3<f64>, radius: f64) -> bool {
        self.observers.iter().any(|o| o.sees(point, radius))
    }
}
