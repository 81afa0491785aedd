//! Traffic scenarios for the deterministic harness.
//!
//! Each scenario is a [`ScenarioScript`]: it picks a map and a traffic
//! config, stages its actors, watches every tick and finally returns a
//! verdict. The runner owns the loop.

use crate::error::{SimError, SimResult};
use crate::maps::{self, SimMap, LANE_OFFSET};
use crate::world::{SimWorld, TickReport};

use nalgebra::Vector3;
use std::collections::BTreeSet;
use tracing::{debug, info};
use trafnet_core::{RecycleReason, TrafficConfig, TrafficEvent};
use trafnet_env::{EntryId, IntersectionId, LightId, LightState, PropTag, VehicleUid, WorldQuery};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// TRF-001: one agent on an empty straight road
    StraightCruise,

    /// TRF-002: three approaches into a four-way stop
    StopSignFifo,

    /// TRF-003: static obstacle right in front of a parked agent
    ObstacleAhead,

    /// TRF-004: lane that leads nowhere
    DeadEnd,

    /// TRF-005: red light flips to green under a waiting agent
    RedToGreen,

    /// TRF-006: side road yielding to a main road
    GiveWay,

    /// TRF-007: forced merge on a two-lane road
    LaneShift,

    /// TRF-008: scripted ramming of a braked vehicle
    ForceCollide,

    /// TRF-009: unobserved town recycling its population
    Recycling,

    /// TRF-010: free-running town at full density
    CityStress,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::StraightCruise,
            ScenarioId::StopSignFifo,
            ScenarioId::ObstacleAhead,
            ScenarioId::DeadEnd,
            ScenarioId::RedToGreen,
            ScenarioId::GiveWay,
            ScenarioId::LaneShift,
            ScenarioId::ForceCollide,
            ScenarioId::Recycling,
            ScenarioId::CityStress,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::StraightCruise => "straight_cruise",
            ScenarioId::StopSignFifo => "stop_sign_fifo",
            ScenarioId::ObstacleAhead => "obstacle_ahead",
            ScenarioId::DeadEnd => "dead_end",
            ScenarioId::RedToGreen => "red_to_green",
            ScenarioId::GiveWay => "give_way",
            ScenarioId::LaneShift => "lane_shift",
            ScenarioId::ForceCollide => "force_collide",
            ScenarioId::Recycling => "recycling",
            ScenarioId::CityStress => "city_stress",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::StraightCruise => "Single agent accelerates to its top speed and holds it",
            ScenarioId::StopSignFifo => "Three agents clear a four-way stop in arrival order",
            ScenarioId::ObstacleAhead => "Agent facing a prop stays put and reports blocked",
            ScenarioId::DeadEnd => "Agent reaching a dead end is despawned and its id recycled",
            ScenarioId::RedToGreen => "Waiting agent releases its stop target when the light turns green",
            ScenarioId::GiveWay => "Side-road agent yields to the main road and still gets through",
            ScenarioId::LaneShift => "Forced merge completes onto the adjacent lane",
            ScenarioId::ForceCollide => "Ramming agent hits its braked target and breaks down",
            ScenarioId::Recycling => "Nobody watching: hidden agents respawn silently under their ids",
            ScenarioId::CityStress => "Grid town at full density with parked cars and one camera",
        }
    }

    /// Builds the script that drives this scenario.
    pub fn script(&self, num_agents: usize) -> Box<dyn ScenarioScript> {
        match self {
            ScenarioId::StraightCruise => Box::new(StraightCruise::default()),
            ScenarioId::StopSignFifo => Box::new(StopSignFifo::default()),
            ScenarioId::ObstacleAhead => Box::new(ObstacleAhead::default()),
            ScenarioId::DeadEnd => Box::new(DeadEnd::default()),
            ScenarioId::RedToGreen => Box::new(RedToGreen::default()),
            ScenarioId::GiveWay => Box::new(GiveWay::default()),
            ScenarioId::LaneShift => Box::new(LaneShift::default()),
            ScenarioId::ForceCollide => Box::new(ForceCollide::default()),
            ScenarioId::Recycling => Box::new(Recycling::new(num_agents)),
            ScenarioId::CityStress => Box::new(CityStress::new(num_agents)),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "straight_cruise" | "cruise" | "trf-001" => Ok(ScenarioId::StraightCruise),
            "stop_sign_fifo" | "stop_sign" | "trf-002" => Ok(ScenarioId::StopSignFifo),
            "obstacle_ahead" | "obstacle" | "trf-003" => Ok(ScenarioId::ObstacleAhead),
            "dead_end" | "deadend" | "trf-004" => Ok(ScenarioId::DeadEnd),
            "red_to_green" | "light" | "trf-005" => Ok(ScenarioId::RedToGreen),
            "give_way" | "giveway" | "trf-006" => Ok(ScenarioId::GiveWay),
            "lane_shift" | "merge" | "trf-007" => Ok(ScenarioId::LaneShift),
            "force_collide" | "ram" | "trf-008" => Ok(ScenarioId::ForceCollide),
            "recycling" | "trf-009" => Ok(ScenarioId::Recycling),
            "city_stress" | "city" | "trf-010" => Ok(ScenarioId::CityStress),
            _ => Err(SimError::UnknownScenario(s.to_string())),
        }
    }
}

/// One scenario's staging, observation and verdict.
pub trait ScenarioScript: Send {
    fn map(&self) -> SimMap;

    fn traffic(&self) -> TrafficConfig {
        scripted_traffic()
    }

    /// Whether CLI network and config overrides apply.
    fn accepts_overrides(&self) -> bool {
        false
    }

    /// Run length for a requested duration.
    fn horizon_secs(&self, requested: f64) -> f64 {
        requested
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()>;

    fn on_tick(&mut self, world: &mut SimWorld, report: &TickReport);

    /// Ends the run early once the verdict is settled.
    fn finished(&self, _world: &SimWorld) -> bool {
        false
    }

    /// `Ok` with a one-line summary, or the failure reason.
    fn verdict(&self, world: &SimWorld) -> Result<String, String>;
}

/// Staged scenarios: no background population, no random merges, no
/// health recycling and every agent at full cadence.
pub fn scripted_traffic() -> TrafficConfig {
    let mut config = TrafficConfig::default();
    config.target_density = 0;
    config.lane_shift.enabled = false;
    config.lifecycle.auto_assisting = false;
    config.lifecycle.silent_assisting = false;
    config.lod.optimize_physics = false;
    config.lod.optimize_render = false;
    config
}

fn uid_of(world: &SimWorld, uid: Option<VehicleUid>) -> Result<VehicleUid, String> {
    let uid = uid.ok_or_else(|| "scenario was never staged".to_string())?;
    if world.engine.agent(uid).is_none() {
        return Err(format!("agent {} is gone", uid));
    }
    Ok(uid)
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StraightCruise {
    uid: Option<VehicleUid>,
    last_speed: f64,
    max_speed_seen: f64,
    speed_drops: u32,
}

impl StraightCruise {
    const TOP_SPEED: f64 = 12.0;
}

impl ScenarioScript for StraightCruise {
    fn map(&self) -> SimMap {
        maps::straight_road(5000.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(15.0, 120.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        self.uid = Some(world.spawn_with_speed(EntryId::new(1, 0), 0.01, Self::TOP_SPEED)?);
        Ok(())
    }

    fn on_tick(&mut self, world: &mut SimWorld, _report: &TickReport) {
        let Some(agent) = self.uid.and_then(|uid| world.engine.agent(uid)) else {
            return;
        };
        if agent.speed + 0.05 < self.last_speed {
            self.speed_drops += 1;
        }
        self.last_speed = agent.speed;
        self.max_speed_seen = self.max_speed_seen.max(agent.speed);
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let uid = uid_of(world, self.uid)?;
        let agent = world.engine.agent(uid).ok_or("agent vanished")?;
        if self.speed_drops > 0 {
            return Err(format!("speed dropped {} times on an empty road", self.speed_drops));
        }
        if self.max_speed_seen > Self::TOP_SPEED + 1e-6 {
            return Err(format!("exceeded top speed: {:.2}", self.max_speed_seen));
        }
        if (agent.speed - Self::TOP_SPEED).abs() > 0.5 {
            return Err(format!("settled at {:.2} instead of {:.1}", agent.speed, Self::TOP_SPEED));
        }
        Ok(format!("cruising at {:.2}", agent.speed))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StopSignFifo {
    /// (uid, approach lane), closest to the box first
    actors: Vec<(VehicleUid, EntryId)>,
    order: Vec<EntryId>,
}

impl ScenarioScript for StopSignFifo {
    fn map(&self) -> SimMap {
        maps::stop_crossing(100.0, 3000.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.max(120.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        for (lane, t) in [(1, 0.45), (2, 0.30), (3, 0.15)] {
            let entry = EntryId::new(lane, 0);
            let uid = world.spawn_with_speed(entry, t, 10.0)?;
            self.actors.push((uid, entry));
        }
        Ok(())
    }

    fn on_tick(&mut self, _world: &mut SimWorld, report: &TickReport) {
        for event in &report.output.events {
            if let TrafficEvent::StopSignCleared { uid, .. } = event {
                if let Some((_, lane)) = self.actors.iter().find(|(a, _)| a == uid) {
                    info!("  t={:.1}s | {} cleared the stop sign", report.time, lane);
                    self.order.push(*lane);
                }
            }
        }
    }

    fn finished(&self, world: &SimWorld) -> bool {
        self.order.len() == self.actors.len()
            && world.engine.arbiter().stop_queue(IntersectionId(500)).is_empty()
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let expected: Vec<EntryId> = self.actors.iter().map(|(_, lane)| *lane).collect();
        if self.order != expected {
            return Err(format!("clearance order {:?}, expected {:?}", self.order, expected));
        }
        let queue = world.engine.arbiter().stop_queue(IntersectionId(500));
        if !queue.is_empty() {
            return Err(format!("{} uids left in the stop queue", queue.len()));
        }
        Ok(format!("cleared in order {:?}", self.order))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ObstacleAhead {
    uid: Option<VehicleUid>,
    prop_rear: f64,
    touched: bool,
}

impl ScenarioScript for ObstacleAhead {
    fn map(&self) -> SimMap {
        maps::straight_road(1000.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(10.0, 30.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        let uid = world.spawn_with_speed(EntryId::new(1, 0), 0.1, 10.0)?;
        let agent = world
            .engine
            .agent(uid)
            .ok_or_else(|| SimError::setup("spawned agent missing"))?;
        let forward = agent.pose.forward.into_inner();
        let nose = agent.pose.position + forward * agent.profile.half_length;

        // Crate one unit ahead of the nose, wider than the car
        let half_length = 0.5;
        let center = nose + forward * (1.0 + half_length);
        world
            .oracle
            .add_prop(center, forward, half_length, 1.5, PropTag::Generic);
        self.prop_rear = nose.z + 1.0;
        self.uid = Some(uid);
        Ok(())
    }

    fn on_tick(&mut self, world: &mut SimWorld, _report: &TickReport) {
        let Some(body) = self.uid.and_then(|uid| world.oracle.body(uid)) else {
            return;
        };
        let nose = body.pose.position.z + body.half_length;
        if nose >= self.prop_rear {
            self.touched = true;
        }
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let uid = uid_of(world, self.uid)?;
        let agent = world.engine.agent(uid).ok_or("agent vanished")?;
        if self.touched {
            return Err("agent drove into the obstacle".to_string());
        }
        if agent.speed >= 0.05 {
            return Err(format!("still moving at {:.3}", agent.speed));
        }
        if !agent.blocked_by_traffic {
            return Err("agent does not report being blocked".to_string());
        }
        Ok("held in front of the obstacle".to_string())
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DeadEnd {
    uid: Option<VehicleUid>,
    despawned_at: Option<f64>,
}

impl ScenarioScript for DeadEnd {
    fn map(&self) -> SimMap {
        maps::dead_end(120.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(30.0, 60.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        self.uid = Some(world.spawn_with_speed(EntryId::new(1, 0), 0.5, 10.0)?);
        Ok(())
    }

    fn on_tick(&mut self, _world: &mut SimWorld, report: &TickReport) {
        let Some(uid) = self.uid else {
            return;
        };
        let hit = report.output.events.iter().any(|e| {
            *e == TrafficEvent::Despawned {
                uid,
                reason: RecycleReason::DeadEnd,
            }
        });
        if hit && self.despawned_at.is_none() {
            self.despawned_at = Some(report.time);
        }
    }

    fn finished(&self, _world: &SimWorld) -> bool {
        self.despawned_at.is_some()
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let uid = self.uid.ok_or("scenario was never staged")?;
        let at = self.despawned_at.ok_or("agent was never despawned")?;
        if world.engine.agent(uid).is_some() || world.oracle.body(uid).is_some() {
            return Err("despawned agent still present".to_string());
        }
        let pooled = world.engine.spawner().free_ids().filter(|id| **id == uid).count();
        if pooled != 1 {
            return Err(format!("uid pooled {} times", pooled));
        }
        Ok(format!("despawned at t={:.1}s, id pooled", at))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RedToGreen {
    uid: Option<VehicleUid>,
    stopped_since: Option<f64>,
    flipped_at: Option<f64>,
    released_next_tick: Option<bool>,
    resumed: bool,
}

impl RedToGreen {
    const LIGHT: LightId = LightId(1);
}

impl ScenarioScript for RedToGreen {
    fn map(&self) -> SimMap {
        maps::signal_crossing(100.0, 3000.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(40.0, 90.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        world.signals.set_manual(Self::LIGHT, LightState::Red);
        self.uid = Some(world.spawn_with_speed(EntryId::new(1, 0), 0.3, 10.0)?);
        Ok(())
    }

    fn on_tick(&mut self, world: &mut SimWorld, report: &TickReport) {
        let Some(agent) = self.uid.and_then(|uid| world.engine.agent(uid)) else {
            return;
        };
        match self.flipped_at {
            None => {
                let waiting = agent.approach.has_stop_target && agent.speed < 0.05;
                match (waiting, self.stopped_since) {
                    (true, None) => self.stopped_since = Some(report.time),
                    (true, Some(since)) if report.time - since > 1.0 => {
                        debug!("  t={:.1}s | light {} -> green", report.time, Self::LIGHT.0);
                        world.signals.set_manual(Self::LIGHT, LightState::Green);
                        self.flipped_at = Some(report.time);
                    }
                    (false, _) => self.stopped_since = None,
                    _ => {}
                }
            }
            Some(flipped) => {
                if self.released_next_tick.is_none() {
                    self.released_next_tick = Some(!agent.approach.has_stop_target);
                }
                if report.time - flipped > 2.0 && agent.speed > 1.0 {
                    self.resumed = true;
                }
            }
        }
    }

    fn finished(&self, _world: &SimWorld) -> bool {
        self.resumed
    }

    fn verdict(&self, _world: &SimWorld) -> Result<String, String> {
        let flipped = self.flipped_at.ok_or("agent never stopped at the red light")?;
        if self.released_next_tick != Some(true) {
            return Err("stop target survived the green light".to_string());
        }
        if !self.resumed {
            return Err("agent did not pull away after green".to_string());
        }
        Ok(format!("released at t={:.1}s and resumed", flipped))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GiveWay {
    main: Option<VehicleUid>,
    side: Option<VehicleUid>,
    side_yielded: bool,
}

impl GiveWay {
    const EXIT: EntryId = EntryId::new(11, 0);
}

impl ScenarioScript for GiveWay {
    fn map(&self) -> SimMap {
        maps::give_way_junction(200.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(40.0, 90.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        self.main = Some(world.spawn_with_speed(EntryId::new(10, 0), 0.8, 10.0)?);
        self.side = Some(world.spawn_with_speed(EntryId::new(12, 0), 0.75, 8.0)?);
        Ok(())
    }

    fn on_tick(&mut self, world: &mut SimWorld, _report: &TickReport) {
        if let Some(agent) = self.side.and_then(|uid| world.engine.agent(uid)) {
            self.side_yielded |= agent.approach.has_give_way_target;
        }
    }

    fn finished(&self, world: &SimWorld) -> bool {
        [self.main, self.side]
            .into_iter()
            .flatten()
            .all(|uid| world.engine.agent(uid).map(|a| a.entry) == Some(Self::EXIT))
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        for (name, uid) in [("main", self.main), ("side", self.side)] {
            let uid = uid_of(world, uid)?;
            let entry = world.engine.agent(uid).map(|a| a.entry);
            if entry != Some(Self::EXIT) {
                return Err(format!("{} road agent stuck on {:?}", name, entry));
            }
        }
        Ok(format!("both through, side yielded: {}", self.side_yielded))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LaneShift {
    uid: Option<VehicleUid>,
    requested: bool,
    started: bool,
    completed: Option<EntryId>,
}

impl LaneShift {
    const TARGET: EntryId = EntryId::new(20, 1);
}

impl ScenarioScript for LaneShift {
    fn map(&self) -> SimMap {
        maps::two_lane_road(3000.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(30.0, 60.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        self.uid = Some(world.spawn_with_speed(EntryId::new(20, 0), 0.05, 12.0)?);
        Ok(())
    }

    fn on_tick(&mut self, world: &mut SimWorld, report: &TickReport) {
        let Some(uid) = self.uid else {
            return;
        };
        if !self.requested {
            self.requested = world.engine.force_shift(uid);
        }
        for event in &report.output.events {
            match event {
                TrafficEvent::LaneShiftStarted { uid: who, .. } if *who == uid => self.started = true,
                TrafficEvent::LaneShiftCompleted { uid: who, entry } if *who == uid => {
                    self.completed = Some(*entry)
                }
                _ => {}
            }
        }
    }

    fn finished(&self, _world: &SimWorld) -> bool {
        self.completed.is_some()
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let uid = uid_of(world, self.uid)?;
        if !self.started {
            return Err("lane shift never started".to_string());
        }
        let entry = self.completed.ok_or("lane shift never completed")?;
        let agent = world.engine.agent(uid).ok_or("agent vanished")?;
        if entry != Self::TARGET || agent.entry != Self::TARGET {
            return Err(format!("merged onto {} instead of {}", agent.entry, Self::TARGET));
        }
        if agent.shift.is_some() {
            return Err("shift state not cleared".to_string());
        }
        let lateral = (agent.pose.position.x - (LANE_OFFSET + maps::LANE_WIDTH)).abs();
        Ok(format!("merged onto {} ({:.2} off centre)", entry, lateral))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ForceCollide {
    rammer: Option<VehicleUid>,
    target: Option<VehicleUid>,
    accident: bool,
    breakdown: bool,
}

impl ScenarioScript for ForceCollide {
    fn map(&self) -> SimMap {
        maps::straight_road(2000.0)
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.clamp(10.0, 30.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        let rammer = world.spawn_with_speed(EntryId::new(1, 0), 0.10, 10.0)?;
        let target = world.spawn_with_speed(EntryId::new(1, 0), 0.11, 10.0)?;

        // Park the target for good
        world.engine.trigger_emergency_brake(target);
        if let Some(brake) = world.engine.agent_mut(target).and_then(|a| a.emergency.as_mut()) {
            brake.until.at = f64::MAX;
        }
        if !world.engine.force_collide(rammer, target) {
            return Err(SimError::setup("force collide was refused"));
        }
        self.rammer = Some(rammer);
        self.target = Some(target);
        Ok(())
    }

    fn on_tick(&mut self, _world: &mut SimWorld, report: &TickReport) {
        let Some(rammer) = self.rammer else {
            return;
        };
        for event in &report.output.events {
            match event {
                TrafficEvent::Accident { uid } if *uid == rammer => self.accident = true,
                TrafficEvent::Breakdown { uid } if *uid == rammer => self.breakdown = true,
                _ => {}
            }
        }
    }

    fn finished(&self, _world: &SimWorld) -> bool {
        self.accident && self.breakdown
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let rammer = uid_of(world, self.rammer)?;
        if !self.accident {
            return Err("rammer never had an accident".to_string());
        }
        if !self.breakdown {
            return Err("rammer never broke down".to_string());
        }
        let agent = world.engine.agent(rammer).ok_or("rammer vanished")?;
        if agent.force_collide.is_some() {
            return Err("force collide still active after impact".to_string());
        }
        Ok("rammed and broke down".to_string())
    }
}

// ---------------------------------------------------------------------------

struct Recycling {
    density: usize,
    respawned: BTreeSet<VehicleUid>,
    silent: usize,
}

impl Recycling {
    fn new(num_agents: usize) -> Self {
        Self {
            density: num_agents.clamp(4, 40),
            respawned: BTreeSet::new(),
            silent: 0,
        }
    }
}

impl ScenarioScript for Recycling {
    fn map(&self) -> SimMap {
        maps::grid_town(3, 120.0)
    }

    fn traffic(&self) -> TrafficConfig {
        let mut config = TrafficConfig::default();
        config.target_density = self.density;
        config.lifecycle.invisible_secs = 8.0;
        config
    }

    fn horizon_secs(&self, requested: f64) -> f64 {
        requested.max(25.0)
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        world.spawn_heaps(self.density);
        Ok(())
    }

    fn on_tick(&mut self, _world: &mut SimWorld, report: &TickReport) {
        for event in &report.output.events {
            if let TrafficEvent::Respawned { uid, silent, .. } = event {
                self.respawned.insert(*uid);
                if *silent {
                    self.silent += 1;
                }
            }
        }
    }

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        if self.respawned.is_empty() {
            return Err("no hidden agent was ever respawned".to_string());
        }
        if world.agent_count() > self.density {
            return Err(format!("{} agents over a density of {}", world.agent_count(), self.density));
        }
        let free: BTreeSet<VehicleUid> = world.engine.spawner().free_ids().copied().collect();
        if free.len() != world.engine.spawner().free_ids().count() {
            return Err("duplicate ids in the free pool".to_string());
        }
        if let Some(uid) = free.iter().find(|uid| world.engine.agent(**uid).is_some()) {
            return Err(format!("live agent {} also in the free pool", uid));
        }
        if world.oracle.body_count() != world.agent_count() {
            return Err(format!(
                "{} bodies for {} agents",
                world.oracle.body_count(),
                world.agent_count()
            ));
        }
        Ok(format!(
            "{} agents respawned ({} silent respawns)",
            self.respawned.len(),
            self.silent
        ))
    }
}

// ---------------------------------------------------------------------------

struct CityStress {
    density: usize,
    parked: usize,
}

impl CityStress {
    fn new(num_agents: usize) -> Self {
        Self {
            density: num_agents,
            parked: 0,
        }
    }
}

impl ScenarioScript for CityStress {
    fn map(&self) -> SimMap {
        maps::grid_town(4, 150.0)
    }

    fn traffic(&self) -> TrafficConfig {
        let mut config = TrafficConfig::default();
        config.target_density = self.density;
        config
    }

    fn accepts_overrides(&self) -> bool {
        true
    }

    fn setup(&mut self, world: &mut SimWorld) -> SimResult<()> {
        let entries: Vec<_> = world.network().entries().map(|e| e.centroid()).collect();
        if entries.is_empty() {
            return Err(SimError::setup("network has no entries"));
        }
        let center = entries.iter().fold(Vector3::zeros(), |acc, p| acc + p) / entries.len() as f64;
        world.add_observer(center + Vector3::new(0.0, 30.0, -60.0), Vector3::new(0.0, -0.4, 1.0));
        self.parked = world.scatter_parked_cars(10)?;
        let target = world.engine.config().target_density;
        let spawned = world.spawn_heaps(target);
        info!("  city: {} spawned, {} parked", spawned, self.parked);
        Ok(())
    }

    fn on_tick(&mut self, _world: &mut SimWorld, _report: &TickReport) {}

    fn verdict(&self, world: &SimWorld) -> Result<String, String> {
        let target = world.engine.config().target_density;
        if target > 0 && world.agent_count() == 0 {
            return Err("population died out".to_string());
        }
        if world.agent_count() > target {
            return Err(format!("{} agents over a density of {}", world.agent_count(), target));
        }
        for ix in world.network().intersections() {
            let stale = world
                .engine
                .arbiter()
                .stop_queue(ix.id)
                .into_iter()
                .filter(|uid| world.engine.agent(*uid).is_none())
                .count();
            if stale > 0 {
                return Err(format!("{} stale uids queued at box {}", stale, ix.id.0));
            }
        }
        // No two vehicles share a spot
        let overlapping = world
            .oracle
            .bodies()
            .filter(|(uid, body)| {
                world
                    .oracle
                    .vehicles_within(body.pose.position, 0.5)
                    .into_iter()
                    .any(|other| other != **uid)
            })
            .count();
        if overlapping > 0 {
            return Err(format!("{} agents stacked on top of each other", overlapping));
        }
        Ok(format!("{} agents alive", world.agent_count()))
    }
}
