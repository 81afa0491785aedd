//! Per-agent driving state machine.
//!
//! One [`Agent::tick`] runs, in order: stuck timer, accident and
//! force-collide handling, lane-end logic (lane shifts, choosing and
//! registering the next entry), waypoint advance, steering, intersection
//! arbitration, perception, speed caps, emergency braking and speed
//! integration. The result is a [`MotionCommand`] for the integrator, or a
//! [`RecycleReason`] when the road topology leaves the agent nowhere to go.
//!
//! Health faults (stuck, unreachable, invisible) are not raised here; the
//! engine polls [`Agent::health_fault`] before ticking.

use crate::arbiter::{ApproachQuery, ApproachState, ArbiterPhase, Deregistration, IntersectionArbiter, StopSignProgress};
use crate::body::{AgentSnapshot, BodyFrame, SnapshotMap, VehicleProfile};
use crate::config::TrafficConfig;
use crate::events::{RecycleReason, TrafficEvent};
use crate::geometry::{angle_deg, cross_y, flat, flat_distance, normalize_or_zero};
use crate::lane_shift::{self, LaneShift, ShiftContext, ShiftProgress, ShiftTrigger};
use crate::lod::LodState;
use crate::perception::{PerceptionInput, PerceptionState};
use crate::road_network::{RoadEntry, RoadGraphEdge, RoadNetwork};
use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trafnet_env::{ColliderKind, EntryId, MotionCommand, Pose, SignalState, VehicleUid, WorldQuery};

/// Distance from the target beyond which the tangent pulls the aim point back.
const TANGENT_LEAD: f64 = 6.0;

/// Stop cap below which the agent just stops.
const STOP_SPEED_FLOOR: f64 = 0.24;

/// Observable driving state, derived from the agent's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorState {
    Cruising,
    ApproachingIntersection,
    LaneShifting,
    GiveWayWait,
    StopWait,
    LightWait,
    ForceCollide,
    Accident,
}

/// A point in engine time after which something happens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deadline {
    pub at: f64,
}

impl Deadline {
    pub fn after(now: f64, secs: f64) -> Self {
        Self { at: now + secs }
    }

    pub fn passed(&self, now: f64) -> bool {
        now >= self.at
    }
}

/// A repeating list of lane entries the agent follows instead of random turns.
///
/// `entries[0]` is where the agent starts; at every lane end the cursor
/// moves on and the connector leading to the next listed lane is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedRoute {
    pub entries: Vec<EntryId>,
    pub cursor: usize,
}

impl FixedRoute {
    pub fn new(entries: Vec<EntryId>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        Some(Self { entries, cursor: 0 })
    }

    pub fn start(&self) -> EntryId {
        self.entries[0]
    }

    pub fn current(&self) -> EntryId {
        self.entries[self.cursor]
    }

    fn advance(&mut self) -> EntryId {
        self.cursor = (self.cursor + 1) % self.entries.len();
        self.entries[self.cursor]
    }
}

/// Deliberate pursuit of another vehicle (scripted crash scenarios).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceCollide {
    pub target: VehicleUid,
    pub started_at: f64,
    pub last_known: Vector3<f64>,
}

/// An externally triggered hard stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmergencyBrake {
    pub until: Deadline,
    pub rate: f64,
}

/// Everything an agent reads or mutates outside itself during a tick.
pub struct MotorEnv<'a, R: Rng + ?Sized> {
    pub network: &'a RoadNetwork,
    pub arbiter: &'a IntersectionArbiter,
    pub world: &'a dyn WorldQuery,
    pub signals: &'a dyn SignalState,
    pub agents: &'a SnapshotMap,
    pub config: &'a TrafficConfig,
    pub now: f64,
    pub dt: f64,
    pub rng: &'a mut R,
    pub events: &'a mut Vec<TrafficEvent>,
}

/// One simulated vehicle.
#[derive(Debug, Clone)]
pub struct Agent {
    pub uid: VehicleUid,
    pub profile: VehicleProfile,
    pub max_speed: f64,
    pub max_brake: f64,

    /// Body pose as last read from the world
    pub pose: Pose,

    pub entry: EntryId,
    pub index: usize,
    pub next_entry: Option<EntryId>,

    /// The one entry this agent currently holds an interest registration on
    pub registered_entry: Option<EntryId>,

    pub target: Vector3<f64>,
    pub target_tangent: Option<Vector3<f64>>,
    pub next_target: Vector3<f64>,
    pub approach: ApproachState,

    pub speed: f64,
    pub current_turn: f64,
    pub corner_speed: f64,
    pub left_signal: bool,
    pub right_signal: bool,
    pub brake_hard: bool,
    pub dodge_vector: Vector3<f64>,
    pub blocked_by_traffic: bool,
    pub emergency: Option<EmergencyBrake>,

    pub stuck_time: f64,
    pub unreach_time: f64,

    /// Engine time since which no observer could see the agent
    pub hidden_since: Option<f64>,

    pub shift: Option<LaneShift>,
    pub shift_request: Option<ShiftTrigger>,
    pub force_collide: Option<ForceCollide>,
    pub in_accident: bool,
    pub hazards_from: Option<Deadline>,
    pub fixed_route: Option<FixedRoute>,

    pub perception: PerceptionState,
    pub lod: LodState,
    pub last_command: MotionCommand,
    last_nose: Vector3<f64>,
}

impl Agent {
    /// A fresh agent at `pose`, heading for `entry.waypoints[index]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: VehicleUid,
        profile: VehicleProfile,
        max_speed: f64,
        max_brake: f64,
        entry: &RoadEntry,
        index: usize,
        pose: &Pose,
        lod: LodState,
    ) -> Self {
        let index = index.min(entry.waypoints.len() - 1);
        let frame = BodyFrame::new(pose, &profile);
        Self {
            uid,
            profile,
            max_speed,
            max_brake,
            pose: *pose,
            entry: entry.id,
            index,
            next_entry: None,
            registered_entry: None,
            target: entry.waypoints[index],
            target_tangent: None,
            next_target: entry.last(),
            approach: ApproachState::default(),
            speed: 0.0,
            current_turn: 0.0,
            corner_speed: 1.0,
            left_signal: false,
            right_signal: false,
            brake_hard: false,
            dodge_vector: Vector3::zeros(),
            blocked_by_traffic: false,
            emergency: None,
            stuck_time: 0.0,
            unreach_time: 0.0,
            hidden_since: None,
            shift: None,
            shift_request: None,
            force_collide: None,
            in_accident: false,
            hazards_from: None,
            fixed_route: None,
            perception: PerceptionState::new(),
            lod,
            last_command: MotionCommand::default(),
            last_nose: frame.nose,
        }
    }

    pub fn state(&self) -> MotorState {
        if self.in_accident {
            return MotorState::Accident;
        }
        if self.force_collide.is_some() {
            return MotorState::ForceCollide;
        }
        if self.shift.is_some() {
            return MotorState::LaneShifting;
        }
        if self.next_entry.is_some() {
            return match self.approach.phase() {
                ArbiterPhase::GiveWayWait => MotorState::GiveWayWait,
                ArbiterPhase::LightWait => MotorState::LightWait,
                ArbiterPhase::StopWait => MotorState::StopWait,
                ArbiterPhase::Approaching | ArbiterPhase::Admitted => MotorState::ApproachingIntersection,
            };
        }
        MotorState::Cruising
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            uid: self.uid,
            pose: self.pose,
            profile: self.profile,
            speed: self.speed,
            entry: self.entry,
            in_accident: self.in_accident,
            force_collide: self.force_collide.is_some(),
        }
    }

    pub fn hidden_for(&self, now: f64) -> f64 {
        self.hidden_since.map(|t| (now - t).max(0.0)).unwrap_or(0.0)
    }

    /// Health fault that should trigger a respawn, if any.
    pub fn health_fault(&self, now: f64, config: &TrafficConfig) -> Option<RecycleReason> {
        let lifecycle = &config.lifecycle;
        if !lifecycle.auto_assisting {
            return None;
        }
        if self.stuck_time > lifecycle.stuck_secs {
            return Some(RecycleReason::Stuck);
        }
        if lifecycle.respawn_only_stuck {
            return None;
        }
        if self.unreach_time > lifecycle.unreachable_secs {
            return Some(RecycleReason::Unreachable);
        }
        if self.hidden_for(now) > lifecycle.invisible_secs {
            return Some(RecycleReason::Invisible);
        }
        None
    }

    /// Releases the interest registration, at most once.
    pub fn release_registration(&mut self, arbiter: &IntersectionArbiter) -> Option<Deregistration> {
        let entry = self.registered_entry.take()?;
        let result = arbiter.deregister_interest(entry, self.uid);
        debug!("Agent {} released {} ({:?})", self.uid, entry, result);
        Some(result)
    }

    /// Queues a lane change; it starts once speed and position allow.
    pub fn request_shift(&mut self, trigger: ShiftTrigger) {
        self.shift_request = Some(trigger);
    }

    pub fn start_force_collide(&mut self, target: VehicleUid, target_position: Vector3<f64>, now: f64) {
        if self.in_accident {
            return;
        }
        self.shift = None;
        self.force_collide = Some(ForceCollide {
            target,
            started_at: now,
            last_known: target_position,
        });
    }

    pub fn trigger_emergency_brake<R: Rng + ?Sized>(
        &mut self,
        now: f64,
        config: &TrafficConfig,
        rng: &mut R,
        events: &mut Vec<TrafficEvent>,
    ) {
        let hold = config.dynamics.emergency_hold_range.sample(rng);
        let rate = config.dynamics.emergency_brake_range.sample(rng);
        let until = Deadline::after(now, hold);
        self.emergency = Some(EmergencyBrake { until, rate });
        events.push(TrafficEvent::EmergencyBrake {
            uid: self.uid,
            until: until.at,
        });
    }

    /// Stops the agent for good; it stays put until recycled.
    pub fn enter_accident<R: Rng + ?Sized>(
        &mut self,
        arbiter: &IntersectionArbiter,
        now: f64,
        rng: &mut R,
        events: &mut Vec<TrafficEvent>,
    ) {
        if self.in_accident {
            return;
        }
        self.in_accident = true;
        self.speed = 0.0;
        self.shift = None;
        self.shift_request = None;
        self.force_collide = None;
        self.emergency = None;
        self.next_entry = None;
        self.approach.clear();
        self.release_registration(arbiter);
        self.hazards_from = Some(Deadline::after(now, rng.gen_range(0.5..1.0)));
        warn!("Agent {} in accident on {}", self.uid, self.entry);
        events.push(TrafficEvent::Accident { uid: self.uid });
    }

    /// Applies a physical contact. Returns true when it caused an accident.
    ///
    /// Plain contact between two engine vehicles is ignored unless one of
    /// them is already wrecked or deliberately ramming.
    pub fn on_collision<R: Rng + ?Sized>(
        &mut self,
        other: &ColliderKind,
        other_state: Option<&AgentSnapshot>,
        arbiter: &IntersectionArbiter,
        now: f64,
        rng: &mut R,
        events: &mut Vec<TrafficEvent>,
    ) -> bool {
        if self.in_accident {
            return false;
        }
        let ramming = self.force_collide.is_some();
        let crash = match other {
            ColliderKind::Player { .. } => true,
            ColliderKind::Vehicle(_) => {
                ramming || other_state.map(|o| o.in_accident || o.force_collide).unwrap_or(false)
            }
            ColliderKind::Prop(_) => false,
        };
        if !crash {
            return false;
        }
        self.enter_accident(arbiter, now, rng, events);
        if ramming {
            events.push(TrafficEvent::Breakdown { uid: self.uid });
        }
        true
    }

    /// Advances the agent by `env.dt` seconds.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        pose: &Pose,
        env: &mut MotorEnv<'_, R>,
    ) -> Result<MotionCommand, RecycleReason> {
        self.pose = *pose;
        let frame = BodyFrame::new(pose, &self.profile);
        let dt = env.dt;
        if (frame.nose - self.last_nose).norm() < dt {
            self.stuck_time += dt;
        } else {
            self.stuck_time = 0.0;
        }
        self.last_nose = frame.nose;

        if self.in_accident {
            let command = self.accident_command(env.now);
            return Ok(self.finish(command));
        }
        if self.force_collide.is_some() {
            if let Some(command) = self.drive_force_collide(&frame, env) {
                return Ok(self.finish(command));
            }
        }

        let network = env.network;
        let entry = network.entry(self.entry).ok_or(RecycleReason::MissingEntry)?;
        if !entry.is_intersection() && self.index > 0 && self.next_entry.is_none() {
            self.lane_end_logic(entry, &frame, env)?;
        }

        if self.shift.is_none() {
            let entry = network.entry(self.entry).ok_or(RecycleReason::MissingEntry)?;
            let dist = flat_distance(frame.nose, self.target);
            let passed = dist < env.config.driving.waypoint_passed_distance
                && frame.forward.dot(&(self.target - frame.nose)) < 0.0;
            if dist < env.config.driving.waypoint_threshold || passed {
                self.advance_waypoint(entry, env)?;
                self.unreach_time = 0.0;
            } else {
                self.unreach_time += dt;
            }
        } else {
            self.unreach_time += dt;
        }

        self.steer(&frame, env.config);

        if self.shift.is_none() {
            if let Some(next) = self.next_entry {
                let before = self.approach.stop_sign;
                let query = ApproachQuery {
                    uid: self.uid,
                    next_entry: next,
                    now: env.now,
                    nose: frame.nose,
                    current_target: self.target,
                    next_target: self.next_target,
                };
                env.arbiter
                    .evaluate(&query, &mut self.approach, env.signals, env.config);
                if matches!(before, StopSignProgress::Dwelling { .. })
                    && self.approach.stop_sign == StopSignProgress::Cleared
                {
                    debug!("Agent {} cleared stop sign into {}", self.uid, next);
                    env.events.push(TrafficEvent::StopSignCleared {
                        uid: self.uid,
                        entry: next,
                    });
                }
            }
        }

        let entry = network.entry(self.entry).ok_or(RecycleReason::MissingEntry)?;
        let holding = self.approach.holding();
        let input = PerceptionInput {
            uid: self.uid,
            frame: &frame,
            speed: self.speed,
            entry,
            target: self.target,
            holding,
            now: env.now,
        };
        let seen = self
            .perception
            .update(&input, env.world, env.agents, env.config, &mut *env.rng);
        self.dodge_vector = seen.dodge_vector;
        self.blocked_by_traffic = seen.blocked_by_traffic;

        let mut target_speed = self.max_speed.min(seen.target_speed_cap);

        if holding {
            let to_stop = self.approach.stop_target - frame.nose;
            let ahead = if frame.forward.dot(&to_stop) > 0.0 { 1.0 } else { 0.0 };
            let mut cap = (to_stop.norm() * ahead / 3.0).clamp(0.0, self.max_speed);
            if cap < STOP_SPEED_FLOOR {
                cap = 0.0;
            }
            target_speed = target_speed.min(cap);
        }

        let approaching_turn = entry.is_intersection() || self.next_entry.is_some();
        if approaching_turn
            && (frame.nose - entry.last()).norm() < env.config.driving.turn_slow_down_distance
        {
            target_speed *= self.corner_speed;
        } else {
            let floor = if entry.is_intersection() { 0.1 } else { 0.25 };
            let factor = (1.0 - self.current_turn.abs() / env.config.dynamics.max_turn_deg).clamp(floor, 1.0);
            target_speed *= factor;
        }

        let mut brake_rate = self.max_brake;
        if let Some(emergency) = self.emergency {
            if emergency.until.passed(env.now) {
                self.emergency = None;
            } else {
                target_speed = 0.0;
                brake_rate = emergency.rate;
            }
        }

        self.integrate_speed(target_speed, dt, brake_rate, env.config);
        let command = self.command();
        Ok(self.finish(command))
    }

    fn finish(&mut self, command: MotionCommand) -> MotionCommand {
        self.last_command = command;
        command
    }

    fn command(&self) -> MotionCommand {
        MotionCommand {
            steer_deg: self.current_turn,
            speed: self.speed,
            brake_hard: self.brake_hard,
            left_signal: self.left_signal,
            right_signal: self.right_signal,
        }
    }

    fn accident_command(&mut self, now: f64) -> MotionCommand {
        self.speed = 0.0;
        self.current_turn = 0.0;
        let hazards = self.hazards_from.map(|d| d.passed(now)).unwrap_or(false);
        self.left_signal = hazards;
        self.right_signal = hazards;
        MotionCommand {
            steer_deg: 0.0,
            speed: 0.0,
            brake_hard: true,
            left_signal: hazards,
            right_signal: hazards,
        }
    }

    /// Returns `None` once the pursuit is over and normal driving resumes.
    fn drive_force_collide<R: Rng + ?Sized>(
        &mut self,
        frame: &BodyFrame,
        env: &mut MotorEnv<'_, R>,
    ) -> Option<MotionCommand> {
        let pursuit = self.force_collide?;
        let target_pose = env
            .agents
            .get(&pursuit.target)
            .map(|s| s.pose)
            .or_else(|| env.world.vehicle_pose(pursuit.target));

        if env.now - pursuit.started_at > env.config.driving.force_collide_timeout_secs {
            if target_pose.is_none() {
                self.enter_accident(env.arbiter, env.now, &mut *env.rng, env.events);
                env.events.push(TrafficEvent::Breakdown { uid: self.uid });
                info!("Agent {} broke down after losing its pursuit target", self.uid);
                return Some(self.accident_command(env.now));
            }
            self.force_collide = None;
            debug!("Agent {} gave up pursuit of {}", self.uid, pursuit.target);
            return None;
        }

        let point = target_pose.map(|p| p.position).unwrap_or(pursuit.last_known);
        self.force_collide = Some(ForceCollide {
            last_known: point,
            ..pursuit
        });
        self.target = point;
        self.target_tangent = None;
        self.left_signal = false;
        self.right_signal = false;
        self.dodge_vector = Vector3::zeros();
        self.steer(frame, env.config);
        self.integrate_speed(self.max_speed, env.dt, self.max_brake, env.config);
        Some(self.command())
    }

    fn lane_end_logic<R: Rng + ?Sized>(
        &mut self,
        entry: &RoadEntry,
        frame: &BodyFrame,
        env: &mut MotorEnv<'_, R>,
    ) -> Result<(), RecycleReason> {
        let network = env.network;
        if self.shift.is_none() {
            self.left_signal = false;
            self.right_signal = false;
            self.maybe_start_shift(entry, frame, env);
        }

        if let Some(shift) = self.shift {
            match lane_shift::progress(&shift, network, entry, self.index, frame, env.now, &env.config.lane_shift) {
                ShiftProgress::Continuing => {}
                ShiftProgress::Aborted { index } => {
                    self.shift = None;
                    self.index = index;
                    self.target = entry.waypoints[index];
                    self.left_signal = false;
                    self.right_signal = false;
                    debug!("Agent {} aborted lane shift on {}", self.uid, entry.id);
                    env.events.push(TrafficEvent::LaneShiftAborted {
                        uid: self.uid,
                        entry: entry.id,
                    });
                }
                ShiftProgress::Completed { entry: id, index } => {
                    let lane = network.entry(id).ok_or(RecycleReason::MissingEntry)?;
                    self.leave_entry(env.arbiter);
                    self.shift = None;
                    self.entry = id;
                    self.index = index;
                    self.target = lane.waypoints[index];
                    self.target_tangent = None;
                    self.left_signal = false;
                    self.right_signal = false;
                    // Cached probes still describe the old lane
                    self.perception.reset();
                    env.events.push(TrafficEvent::LaneShiftCompleted { uid: self.uid, entry: id });
                }
            }
        }

        let entry = network.entry(self.entry).ok_or(RecycleReason::MissingEntry)?;
        if self.shift.is_none()
            && (frame.nose - entry.last()).norm() <= env.config.driving.register_distance
        {
            self.choose_next(entry, env)?;
        }
        Ok(())
    }

    fn maybe_start_shift<R: Rng + ?Sized>(
        &mut self,
        entry: &RoadEntry,
        frame: &BodyFrame,
        env: &mut MotorEnv<'_, R>,
    ) {
        let all: &TrafficConfig = env.config;
        let config = &all.lane_shift;
        if self.speed <= config.min_speed || !lane_shift::position_allows_shift(entry, frame, config) {
            return;
        }
        let requested = self.shift_request.take();
        let trigger = match requested {
            Some(trigger) => trigger,
            None if config.enabled && env.rng.gen::<f64>() < config.chance_per_second * env.dt => {
                ShiftTrigger::Random
            }
            None => return,
        };
        let ctx = ShiftContext {
            uid: self.uid,
            entry,
            frame,
            large_vehicle: self.profile.large,
            now: env.now,
        };
        let Some(shift) = lane_shift::try_start(
            env.network,
            &ctx,
            trigger,
            env.world,
            env.agents,
            config,
            &mut *env.rng,
        ) else {
            // Requests wait for a free lane, random rolls do not
            self.shift_request = requested;
            return;
        };
        self.target = shift.merge_point;
        self.target_tangent = None;
        self.left_signal = shift.left_signal;
        self.right_signal = shift.right_signal;
        self.shift = Some(shift);
        debug!("Agent {} shifting {} -> {}", self.uid, shift.from_entry, shift.target_entry);
        env.events.push(TrafficEvent::LaneShiftStarted {
            uid: self.uid,
            from: shift.from_entry,
            to: shift.target_entry,
        });
    }

    /// Picks the successor of `entry`, following the fixed route if any.
    fn select_edge<R: Rng + ?Sized>(
        &mut self,
        entry: &RoadEntry,
        env: &mut MotorEnv<'_, R>,
    ) -> Result<RoadGraphEdge, RecycleReason> {
        let network = env.network;
        let Some(node) = network.node(entry.id) else {
            return Err(RecycleReason::DeadEnd);
        };
        if let Some(route) = self.fixed_route.as_mut() {
            if entry.is_intersection() {
                let wanted = route.current();
                if let Some(edge) = node.edges.iter().find(|e| e.target == wanted) {
                    return Ok(*edge);
                }
            } else {
                let wanted = route.advance();
                return network
                    .find_connecting_edge(entry.id, wanted)
                    .ok_or(RecycleReason::InvalidRoute);
            }
        }
        network
            .select_random_edge(entry.id, &mut *env.rng)
            .ok_or(RecycleReason::DeadEnd)
    }

    /// Chooses and registers the entry after `entry`.
    fn choose_next<R: Rng + ?Sized>(
        &mut self,
        entry: &RoadEntry,
        env: &mut MotorEnv<'_, R>,
    ) -> Result<(), RecycleReason> {
        let edge = self.select_edge(entry, env)?;
        let next = env
            .network
            .entry(edge.target)
            .ok_or(RecycleReason::MissingEntry)?;

        self.release_registration(env.arbiter);
        env.arbiter.register_interest(next.id, self.uid);
        self.registered_entry = Some(next.id);
        self.next_entry = Some(next.id);
        self.next_target = next.first();
        self.approach.clear();

        let start = next.start_direction();
        let end = next.end_direction();
        let angle = angle_deg(&start, &end);
        if angle > env.config.driving.signal_angle_deg {
            let side = cross_y(&start, &end);
            self.left_signal = side < 0.0;
            self.right_signal = side > 0.0;
        }
        self.corner_speed = (1.0 - angle / 90.0).clamp(0.4, 1.0);
        Ok(())
    }

    /// Drops the registration when it belongs to the entry being left.
    fn leave_entry(&mut self, arbiter: &IntersectionArbiter) {
        if self.registered_entry == Some(self.entry) {
            self.release_registration(arbiter);
        }
    }

    fn switch_entry<R: Rng + ?Sized>(&mut self, next: &RoadEntry, env: &mut MotorEnv<'_, R>) {
        self.leave_entry(env.arbiter);
        self.entry = next.id;
        self.next_entry = None;
        self.approach.clear();
        env.events.push(TrafficEvent::EnteredEntry {
            uid: self.uid,
            entry: next.id,
        });
    }

    fn advance_waypoint<R: Rng + ?Sized>(
        &mut self,
        entry: &RoadEntry,
        env: &mut MotorEnv<'_, R>,
    ) -> Result<(), RecycleReason> {
        let network = env.network;
        self.index += 1;
        if self.index >= entry.waypoints.len() {
            self.index = entry.waypoints.len() - 1;
            if entry.is_intersection() {
                let edge = self.select_edge(entry, env)?;
                let next = network.entry(edge.target).ok_or(RecycleReason::MissingEntry)?;
                self.switch_entry(next, env);
                self.target_tangent = Some(normalize_or_zero(next.waypoints[1] - next.waypoints[0]));
            } else if self.approach.holding() {
                self.target = self.next_target;
            } else {
                if self.next_entry.is_none() {
                    self.choose_next(entry, env)?;
                }
                let next_id = self.next_entry.ok_or(RecycleReason::MissingEntry)?;
                let next = network.entry(next_id).ok_or(RecycleReason::MissingEntry)?;
                self.switch_entry(next, env);
                self.target_tangent = None;
            }
            if !self.approach.holding() {
                self.index = 0;
            }
        }

        if self.index > 1 {
            self.target_tangent = None;
        }
        if !self.approach.holding() {
            let current = network.entry(self.entry).ok_or(RecycleReason::MissingEntry)?;
            self.target = current.waypoints[self.index.min(current.waypoints.len() - 1)];
        }
        Ok(())
    }

    fn steer(&mut self, frame: &BodyFrame, config: &TrafficConfig) {
        let mut aim = self.target;
        let dist = (self.target - frame.center).norm();
        if let Some(tangent) = self.target_tangent {
            if dist > TANGENT_LEAD {
                aim = self.target - tangent * (dist - TANGENT_LEAD);
            }
        }
        let desired = normalize_or_zero(flat(aim - frame.center))
            + self.dodge_vector * (self.speed / 4.0).clamp(0.0, 1.0);
        let forward = flat(frame.forward);
        let mut turn = angle_deg(&forward, &desired) * 1.5;
        if cross_y(&forward, &desired) < 0.0 {
            turn = -turn;
        }
        let max = config.dynamics.max_turn_deg;
        self.current_turn = turn.clamp(-max, max);
    }

    fn integrate_speed(&mut self, target_speed: f64, dt: f64, brake_rate: f64, config: &TrafficConfig) {
        let target_speed = target_speed.clamp(0.0, self.max_speed);
        if target_speed > self.speed {
            self.brake_hard = false;
            self.speed += (config.dynamics.max_accel * dt).min(target_speed - self.speed);
        } else {
            let excess = self.speed - target_speed;
            self.brake_hard = excess > config.dynamics.brake_hard_relative_speed;
            self.speed -= (brake_rate * dt).min(excess);
        }
        self.speed = self.speed.clamp(0.0, self.max_speed);
    }
}
