//! Forward and side hazard detection.
//!
//! Probing is rate limited: every 0.20–0.25 s the agent casts three forward
//! rays (nose, nose-left, nose-right) and sweeps a capsule across its front
//! corners. Between probe cycles the cached result is reused while the speed
//! of whatever was hit is re-read from the tick snapshot.
//!
//! The output is a speed cap, a lateral dodge vector and the
//! `blocked_by_traffic` flag.

use crate::body::{BodyFrame, SnapshotMap};
use crate::config::TrafficConfig;
use crate::geometry::{cross_y, normalize_or_zero, project, remap};
use crate::road_network::RoadEntry;
use nalgebra::Vector3;
use rand::Rng;
use trafnet_env::{ColliderKind, Hit, LayerMask, PropTag, VehicleUid, WorldQuery};

/// Distance reported for a probe that hit nothing.
const NO_HIT: f64 = 1000.0;

/// Lateral avoidance direction chosen from the forward probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DodgeCode {
    Left,
    #[default]
    None,
    Right,
}

impl DodgeCode {
    /// -1 / 0 / +1
    pub fn sign(&self) -> f64 {
        match self {
            DodgeCode::Left => -1.0,
            DodgeCode::None => 0.0,
            DodgeCode::Right => 1.0,
        }
    }
}

/// Result of the last forward probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrontProbe {
    pub hit: Hit,
    pub dodge: DodgeCode,
}

/// Per-tick perception output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceptionOutput {
    /// Upper bound for the target speed; infinite when unrestricted
    pub target_speed_cap: f64,
    pub dodge_vector: Vector3<f64>,
    pub blocked_by_traffic: bool,
}

impl Default for PerceptionOutput {
    fn default() -> Self {
        Self {
            target_speed_cap: f64::INFINITY,
            dodge_vector: Vector3::zeros(),
            blocked_by_traffic: false,
        }
    }
}

/// Inputs of one perception step.
#[derive(Debug, Clone, Copy)]
pub struct PerceptionInput<'a> {
    pub uid: VehicleUid,
    pub frame: &'a BodyFrame,
    pub speed: f64,
    pub entry: &'a RoadEntry,

    /// Current steering target
    pub target: Vector3<f64>,

    /// A stop or give-way target is held
    pub holding: bool,
    pub now: f64,
}

/// Cached probe results of one agent.
#[derive(Debug, Clone)]
pub struct PerceptionState {
    next_probe_at: f64,
    front: Option<FrontProbe>,

    /// Closing time of the most urgent side threat in the last sweep
    side_reach_time: Option<f64>,
    side_avoidance: Vector3<f64>,
    blocked: bool,
}

impl Default for PerceptionState {
    fn default() -> Self {
        Self {
            next_probe_at: 0.0,
            front: None,
            side_reach_time: None,
            side_avoidance: Vector3::zeros(),
            blocked: false,
        }
    }
}

impl PerceptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces a probe on the next update.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn next_probe_at(&self) -> f64 {
        self.next_probe_at
    }

    pub fn update<R: Rng + ?Sized>(
        &mut self,
        input: &PerceptionInput<'_>,
        world: &dyn WorldQuery,
        agents: &SnapshotMap,
        config: &TrafficConfig,
        rng: &mut R,
    ) -> PerceptionOutput {
        if input.now >= self.next_probe_at {
            self.next_probe_at = input.now + config.perception.probe_interval_range.sample(rng);
            self.front = probe_front(input, world, agents, config);
            self.sweep_sides(input, world, agents, config);
        }

        let mut out = PerceptionOutput::default();

        match self.front {
            Some(probe) => {
                let (cap, nudge, blocked) = self.react_to_front(&probe, input, agents, config);
                out.target_speed_cap = cap;
                out.dodge_vector += nudge;
                if let Some(blocked) = blocked {
                    self.blocked = blocked;
                }
            }
            None => self.blocked = false,
        }
        out.blocked_by_traffic = self.blocked;

        if let Some(t) = self.side_reach_time {
            out.target_speed_cap = out.target_speed_cap.min(remap(t, 0.0, 1.0, 0.0, input.speed));
            out.dodge_vector += self.side_avoidance;
        }

        out
    }

    /// Speed cap, dodge nudge and blocked flag (if it changes) for the
    /// cached forward hit.
    fn react_to_front(
        &self,
        probe: &FrontProbe,
        input: &PerceptionInput<'_>,
        agents: &SnapshotMap,
        config: &TrafficConfig,
    ) -> (f64, Vector3<f64>, Option<bool>) {
        let frame = input.frame;
        let moving = config.perception.moving_speed_threshold;
        let mut blocked = None;

        let other_motion = match probe.hit.collider {
            ColliderKind::Vehicle(uid) => agents
                .get(&uid)
                .map(|s| (s.speed, s.pose.forward.into_inner())),
            ColliderKind::Player { speed, forward } => Some((speed, forward)),
            ColliderKind::Prop(_) => None,
        };

        let front_speed = match other_motion {
            Some((speed, forward)) => {
                let along = speed * frame.forward.dot(&forward);
                if along < moving {
                    blocked = Some(!input.holding);
                    0.0
                } else {
                    along
                }
            }
            None => {
                blocked = Some(!input.holding);
                0.0
            }
        };

        let current = input.speed;
        let mut cap = f64::INFINITY;
        let gap = probe.hit.distance;
        if gap < 0.6 {
            cap = if front_speed < 1.0 { 0.0 } else { front_speed * 0.5 };
        } else if current >= front_speed {
            let safe = (current * 2.0 * 1.35).max(2.0);
            if gap < safe {
                cap = remap(gap.max(1.5), 1.5, safe, front_speed * 0.95, current);
            }
        }

        let mut nudge = Vector3::zeros();
        let speed_dif = current - front_speed;
        if probe.dodge != DodgeCode::None
            && speed_dif > 0.0
            && can_dodge(probe, input)
        {
            let side = if probe.dodge == DodgeCode::Left {
                frame.nose_right
            } else {
                frame.nose_left
            };
            let dist = (probe.hit.point - side).norm();
            let magnitude = 1.75 - dist / speed_dif;
            if magnitude > 0.0 {
                let magnitude = (magnitude / 1.75).sqrt() * 60.0;
                nudge = frame.right * (magnitude * probe.dodge.sign());
            }
        }

        (cap, nudge, blocked)
    }

    fn sweep_sides(
        &mut self,
        input: &PerceptionInput<'_>,
        world: &dyn WorldQuery,
        agents: &SnapshotMap,
        config: &TrafficConfig,
    ) {
        let frame = input.frame;
        let reach = config.perception.side_probe_distance;
        let a = frame.nose_left + normalize_or_zero(frame.forward - frame.right) * (reach * 0.5);
        let b = frame.nose_right + normalize_or_zero(frame.forward + frame.right) * (reach * 0.5);
        let mask = LayerMask::ALL
            .without(LayerMask::GROUND)
            .without(LayerMask::CONCAVE_PROP);

        self.side_reach_time = None;
        self.side_avoidance = Vector3::zeros();
        let mut best: Option<(f64, Vector3<f64>)> = None;

        for collider in world.capsule_overlap(a, b, reach, mask) {
            // Static props would need a second-order model; only vehicles count
            let Some(other_uid) = collider.vehicle() else {
                continue;
            };
            if other_uid == input.uid {
                continue;
            }
            let Some(other) = agents.get(&other_uid) else {
                continue;
            };
            let Some(closest) = world.closest_point(&collider, frame.nose) else {
                continue;
            };
            let to_other = closest - frame.nose;
            if frame.forward.dot(&to_other) <= 0.0 {
                continue;
            }

            let side = if cross_y(&frame.forward, &to_other) > 0.0 {
                frame.nose_right
            } else {
                frame.nose_left
            };
            let other_frame = other.frame();
            // The other car approaches our rear side; it has to brake, not us
            if cross_y(&other_frame.forward, &normalize_or_zero(side - other_frame.nose)) < 0.0 {
                continue;
            }

            let Some(side_closest) = world.closest_point(&collider, side) else {
                continue;
            };
            let gap = side_closest - side;
            let relative = frame.forward * input.speed - other_frame.forward * other.speed;
            if relative.dot(&gap) <= 0.0 {
                continue;
            }
            let closing = project(&relative, &normalize_or_zero(gap));
            let closing_speed = closing.norm();
            if closing_speed <= 0.0 {
                continue;
            }
            let t = ((gap.norm() - 0.5) / closing_speed).max(0.0);
            if t < 1.0 && best.map(|(bt, _)| t < bt).unwrap_or(true) {
                best = Some((t, closing));
            }
        }

        if let Some((t, closing)) = best {
            self.side_reach_time = Some(t);
            self.side_avoidance =
                normalize_or_zero(frame.forward - normalize_or_zero(closing)) * (1.0 - t);
        }
    }
}

/// Casts the three forward rays and classifies the closest hit.
fn probe_front(
    input: &PerceptionInput<'_>,
    world: &dyn WorldQuery,
    agents: &SnapshotMap,
    config: &TrafficConfig,
) -> Option<FrontProbe> {
    let frame = input.frame;
    let range = config.perception.front_probe_distance;
    let mask = LayerMask::ALL.without(LayerMask::GROUND);

    let cast = |origin: Vector3<f64>| -> Option<Hit> {
        world
            .raycast(origin, frame.forward, range, mask)
            .filter(|h| h.collider.vehicle() != Some(input.uid))
    };
    let mid = cast(frame.nose);
    let right = cast(frame.nose_right);
    let left = cast(frame.nose_left);

    let closest = [mid, right, left]
        .into_iter()
        .flatten()
        .min_by(|a, b| a.distance.total_cmp(&b.distance))?;

    let mid_d = mid.map(|h| h.distance).unwrap_or(NO_HIT);
    let left_d = left.map(|h| h.distance).unwrap_or(NO_HIT);
    let right_d = right.map(|h| h.distance).unwrap_or(NO_HIT);

    let dodge = match closest.collider {
        ColliderKind::Vehicle(uid) => {
            let oncoming_peer = agents
                .get(&uid)
                .map(|o| {
                    !o.in_accident
                        && o.entry == input.entry.id
                        && frame.forward.dot(&o.pose.forward) < 0.0
                })
                .unwrap_or(false);
            if oncoming_peer {
                DodgeCode::None
            } else {
                dodge_from_distances(left_d, mid_d, right_d, config.perception.dodge_deadband)
            }
        }
        ColliderKind::Prop(PropTag::RoadDivider) => DodgeCode::None,
        ColliderKind::Player { forward, .. } => {
            let code = dodge_from_distances(left_d, mid_d, right_d, config.perception.dodge_deadband);
            if (mid_d - closest.distance).abs() < 0.5 && frame.forward.dot(&forward) > 0.0 {
                DodgeCode::None
            } else {
                code
            }
        }
        ColliderKind::Prop(PropTag::Generic) => {
            dodge_from_distances(left_d, mid_d, right_d, config.perception.dodge_deadband)
        }
    };

    Some(FrontProbe { hit: closest, dodge })
}

/// Picks the side with the most room; ties (within `deadband`) favour no dodge.
pub fn dodge_from_distances(left: f64, mid: f64, right: f64, deadband: f64) -> DodgeCode {
    if mid >= left && mid >= right {
        if left - right > deadband {
            DodgeCode::Left
        } else if right - left > deadband {
            DodgeCode::Right
        } else {
            DodgeCode::None
        }
    } else if left >= mid && left >= right && left - mid.min(right) > deadband {
        DodgeCode::Left
    } else if right >= mid && right >= left && right - mid.min(left) > deadband {
        DodgeCode::Right
    } else {
        DodgeCode::None
    }
}

/// Whether a dodge toward `probe.dodge` is allowed here.
fn can_dodge(probe: &FrontProbe, input: &PerceptionInput<'_>) -> bool {
    let frame = input.frame;
    let near_box = input.entry.is_intersection() || (frame.nose - input.entry.first()).norm() < 6.0;
    if near_box {
        // Only toward the side the entry is heading to
        let y = cross_y(&frame.forward, &(input.entry.last() - frame.nose));
        return (y > 0.0 && probe.dodge == DodgeCode::Right)
            || (y < 0.0 && probe.dodge == DodgeCode::Left);
    }
    match probe.hit.collider {
        ColliderKind::Vehicle(_) | ColliderKind::Player { .. } => true,
        // Static obstacle: only when roughly heading at the target (cos 40°)
        ColliderKind::Prop(_) => {
            frame.forward.dot(&normalize_or_zero(input.target - frame.nose)) > 0.766
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::body::{AgentSnapshot, VehicleProfile};
    use crate::road_network::{NetworkDescription, RoadNetwork};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use trafnet_env::{EntryId, Pose};

    /// Spherical obstacles; enough geometry for probe tests.
    #[derive(Default)]
    pub(crate) struct SphereWorld {
        pub spheres: Vec<(Vector3<f64>, f64, ColliderKind)>,
    }

    impl WorldQuery for SphereWorld {
        fn raycast(
            &self,
            origin: Vector3<f64>,
            direction: Vector3<f64>,
            max_distance: f64,
            _mask: LayerMask,
        ) -> Option<Hit> {
            let dir = normalize_or_zero(direction);
            self.spheres
                .iter()
                .filter_map(|(c, r, kind)| {
                    let oc = origin - c;
                    let b = oc.dot(&dir);
                    let disc = b * b - (oc.norm_squared() - r * r);
                    if disc < 0.0 {
                        return None;
                    }
                    let t = -b - disc.sqrt();
                    (t >= 0.0 && t <= max_distance).then(|| Hit {
                        distance: t,
                        point: origin + dir * t,
                        collider: *kind,
                    })
                })
                .min_by(|a, b| a.distance.total_cmp(&b.distance))
        }

        fn capsule_overlap(
            &self,
            a: Vector3<f64>,
            b: Vector3<f64>,
            radius: f64,
            _mask: LayerMask,
        ) -> Vec<ColliderKind> {
            self.spheres
                .iter()
                .filter(|(c, r, _)| {
                    let p = crate::geometry::closest_point_on_segment_xz(*c, a, b);
                    (p - c).norm() <= radius + r
                })
                .map(|(_, _, k)| *k)
                .collect()
        }

        fn sphere_occupied(&self, point: Vector3<f64>, radius: f64, _mask: LayerMask) -> bool {
            self.spheres.iter().any(|(c, r, _)| (c - point).norm() <= radius + r)
        }

        fn closest_point(&self, collider: &ColliderKind, point: Vector3<f64>) -> Option<Vector3<f64>> {
            self.spheres
                .iter()
                .find(|(_, _, k)| k == collider)
                .map(|(c, r, _)| c + normalize_or_zero(point - c) * *r)
        }

        fn vehicle_pose(&self, _uid: VehicleUid) -> Option<Pose> {
            None
        }

        fn vehicles_within(&self, point: Vector3<f64>, radius: f64) -> Vec<VehicleUid> {
            self.spheres
                .iter()
                .filter(|(c, _, _)| (c - point).norm() <= radius)
                .filter_map(|(_, _, k)| k.vehicle())
                .collect()
        }
    }

    fn lane() -> RoadNetwork {
        let mut desc = NetworkDescription::new();
        desc.add_lane(
            EntryId::new(1, 0),
            &[Vector3::new(0.0, 0.0, -100.0), Vector3::new(0.0, 0.0, 100.0)],
        );
        RoadNetwork::from_description(desc).unwrap()
    }

    fn me() -> (VehicleUid, BodyFrame) {
        let pose = Pose::new(Vector3::zeros(), Vector3::z());
        (VehicleUid::from_seed(1), BodyFrame::new(&pose, &VehicleProfile::CAR))
    }

    fn snapshot(uid: VehicleUid, pos: Vector3<f64>, fwd: Vector3<f64>, speed: f64) -> AgentSnapshot {
        AgentSnapshot {
            uid,
            pose: Pose::new(pos, fwd),
            profile: VehicleProfile::CAR,
            speed,
            entry: EntryId::new(1, 0),
            in_accident: false,
            force_collide: false,
        }
    }

    #[test]
    fn test_dodge_from_distances() {
        assert_eq!(dodge_from_distances(10.0, 10.0, 10.0, 1.25), DodgeCode::None);
        assert_eq!(dodge_from_distances(20.0, 20.0, 5.0, 1.25), DodgeCode::Left);
        assert_eq!(dodge_from_distances(5.0, 20.0, 20.0, 1.25), DodgeCode::Right);
        assert_eq!(dodge_from_distances(1000.0, 5.0, 6.0, 1.25), DodgeCode::Left);
        assert_eq!(dodge_from_distances(5.0, 5.5, 6.0, 1.25), DodgeCode::None);
    }

    #[test]
    fn test_stationary_obstacle_collapses_speed_and_blocks() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let other = VehicleUid::from_seed(2);
        let world = SphereWorld {
            spheres: vec![(frame.nose + Vector3::new(0.0, 0.0, 2.0), 1.0, ColliderKind::Vehicle(other))],
        };
        let mut agents = SnapshotMap::new();
        agents.insert(other, snapshot(other, frame.nose + Vector3::new(0.0, 0.0, 2.0), Vector3::z(), 0.0));

        let mut state = PerceptionState::new();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 8.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: false,
            now: 0.0,
        };
        let out = state.update(&input, &world, &agents, &TrafficConfig::default(), &mut rng);
        assert!(out.target_speed_cap < 0.5, "cap was {}", out.target_speed_cap);
        assert!(out.blocked_by_traffic);
        assert!(state.next_probe_at() >= 0.2 && state.next_probe_at() <= 0.25);

        // A reset drops the cached hit and probes again at once
        state.reset();
        assert_eq!(state.next_probe_at(), 0.0);
        let later = PerceptionInput { now: 0.1, ..input };
        let out = state.update(&later, &SphereWorld::default(), &SnapshotMap::new(), &TrafficConfig::default(), &mut rng);
        assert!(!out.blocked_by_traffic);
        assert_eq!(out.target_speed_cap, f64::INFINITY);
    }

    #[test]
    fn test_holding_agent_is_not_blocked_by_traffic() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let world = SphereWorld {
            spheres: vec![(frame.nose + Vector3::new(0.0, 0.0, 5.0), 1.0, ColliderKind::Prop(PropTag::Generic))],
        };
        let mut state = PerceptionState::new();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 3.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: true,
            now: 0.0,
        };
        let out = state.update(&input, &world, &SnapshotMap::new(), &TrafficConfig::default(), &mut rng);
        assert!(!out.blocked_by_traffic);
        assert!(out.target_speed_cap < 3.0);
    }

    #[test]
    fn test_clear_road_is_unrestricted() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let mut state = PerceptionState::new();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 10.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: false,
            now: 0.0,
        };
        let out = state.update(&input, &SphereWorld::default(), &SnapshotMap::new(), &TrafficConfig::default(), &mut rng);
        assert!(out.target_speed_cap.is_infinite());
        assert_eq!(out.dodge_vector, Vector3::zeros());
        assert!(!out.blocked_by_traffic);
    }

    #[test]
    fn test_moving_leader_caps_near_its_speed() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let other = VehicleUid::from_seed(2);
        let at = frame.nose + Vector3::new(0.0, 0.0, 11.5);
        let world = SphereWorld {
            spheres: vec![(at, 1.5, ColliderKind::Vehicle(other))],
        };
        let mut agents = SnapshotMap::new();
        agents.insert(other, snapshot(other, at, Vector3::z(), 6.0));

        let mut state = PerceptionState::new();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 12.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: false,
            now: 0.0,
        };
        let out = state.update(&input, &world, &agents, &TrafficConfig::default(), &mut rng);
        // gap 10 inside safe distance 32.4
        let expected = remap(10.0, 1.5, 12.0 * 2.0 * 1.35, 6.0 * 0.95, 12.0);
        assert!((out.target_speed_cap - expected).abs() < 1e-6);
        assert!(!out.blocked_by_traffic);
    }

    #[test]
    fn test_oncoming_peer_on_same_entry_is_not_dodged() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let other = VehicleUid::from_seed(2);
        // Offset to the right so the probes differ
        let at = frame.nose + Vector3::new(1.2, 0.0, 6.0);
        let world = SphereWorld {
            spheres: vec![(at, 1.0, ColliderKind::Vehicle(other))],
        };
        let mut agents = SnapshotMap::new();
        agents.insert(other, snapshot(other, at, -Vector3::z(), 5.0));

        let config = TrafficConfig::default();
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 10.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: false,
            now: 0.0,
        };
        let probe = probe_front(&input, &world, &agents, &config).unwrap();
        assert_eq!(probe.dodge, DodgeCode::None);

        agents.insert(other, snapshot(other, at, Vector3::z(), 5.0));
        let probe = probe_front(&input, &world, &agents, &config).unwrap();
        assert_eq!(probe.dodge, DodgeCode::Left);
    }

    #[test]
    fn test_road_divider_never_dodged() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let at = frame.nose + Vector3::new(1.2, 0.0, 6.0);
        let world = SphereWorld {
            spheres: vec![(at, 1.0, ColliderKind::Prop(PropTag::RoadDivider))],
        };
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 10.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: false,
            now: 0.0,
        };
        let probe = probe_front(&input, &world, &SnapshotMap::new(), &TrafficConfig::default()).unwrap();
        assert_eq!(probe.dodge, DodgeCode::None);
    }

    #[test]
    fn test_side_sweep_brakes_for_cutting_in_vehicle() {
        let net = lane();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        let (uid, frame) = me();
        let other = VehicleUid::from_seed(3);
        // Ahead-left, crossing toward our path
        let at = frame.nose + Vector3::new(-3.5, 0.0, 2.5);
        let world = SphereWorld {
            spheres: vec![(at, 1.0, ColliderKind::Vehicle(other))],
        };
        let mut agents = SnapshotMap::new();
        agents.insert(other, snapshot(other, at, Vector3::x(), 4.0));

        let mut state = PerceptionState::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let input = PerceptionInput {
            uid,
            frame: &frame,
            speed: 8.0,
            entry,
            target: Vector3::new(0.0, 0.0, 100.0),
            holding: false,
            now: 0.0,
        };
        let out = state.update(&input, &world, &agents, &TrafficConfig::default(), &mut rng);
        assert!(out.target_speed_cap < 8.0);
        assert!(out.dodge_vector.norm() > 0.0);
    }
}
