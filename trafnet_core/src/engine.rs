//! The traffic engine service object.
//!
//! [`TrafficEngine`] owns the network, the arbiter, the spawner, the LOD
//! manager and every agent. A host drives it with [`TrafficEngine::tick`]
//! and applies the returned [`TickOutput`] to its motion integrator.
//!
//! Each tick reads all body poses once, freezes them into a snapshot and
//! updates agents in uid order against that snapshot, so other agents are
//! always seen as they were at the start of the tick.

use crate::arbiter::IntersectionArbiter;
use crate::body::SnapshotMap;
use crate::config::TrafficConfig;
use crate::error::CoreResult;
use crate::events::{RecycleReason, TrafficEvent};
use crate::lane_shift::ShiftTrigger;
use crate::lod::{LodManager, OptimizationMode};
use crate::motor::{Agent, FixedRoute, MotorEnv};
use crate::road_network::RoadNetwork;
use crate::spawner::{silent_eligible, SpawnMode, SpawnSite, Spawner};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trafnet_env::{
    ColliderKind, EntryId, MotionCommand, MotionIntegrator, ObserverView, Pose, SignalState,
    VehicleUid, WorldQuery,
};

/// Collaborators consulted during a tick.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub world: &'a dyn WorldQuery,
    pub signals: &'a dyn SignalState,
    pub observers: &'a dyn ObserverView,
}

/// One integration step for one body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionIntent {
    pub uid: VehicleUid,
    pub command: MotionCommand,
    pub dt: f64,
}

/// A body to create or teleport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub uid: VehicleUid,
    pub pose: Pose,
}

/// Render classification of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderState {
    pub uid: VehicleUid,
    pub visible: bool,

    /// Forced off beyond render range
    pub headlights: bool,
}

/// Everything a host has to apply after a tick.
#[derive(Debug, Clone, Default)]
pub struct TickOutput {
    pub intents: Vec<MotionIntent>,
    pub placements: Vec<Placement>,
    pub removals: Vec<VehicleUid>,

    /// One entry per agent that was ticked
    pub render: Vec<RenderState>,
    pub events: Vec<TrafficEvent>,
}

impl TickOutput {
    /// Removals first, then placements, then motion.
    pub fn apply_to(&self, integrator: &mut dyn MotionIntegrator) {
        for uid in &self.removals {
            integrator.remove(*uid);
        }
        for placement in &self.placements {
            integrator.place(placement.uid, placement.pose);
        }
        for intent in &self.intents {
            integrator.apply(intent.uid, &intent.command, intent.dt);
        }
        for state in &self.render {
            integrator.set_render(state.uid, state.visible, state.headlights);
        }
    }

    pub fn merge(&mut self, other: TickOutput) {
        self.intents.extend(other.intents);
        self.placements.extend(other.placements);
        self.removals.extend(other.removals);
        self.render.extend(other.render);
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
            && self.placements.is_empty()
            && self.removals.is_empty()
            && self.render.is_empty()
            && self.events.is_empty()
    }
}

pub struct TrafficEngine {
    network: Arc<RoadNetwork>,
    arbiter: IntersectionArbiter,
    spawner: Spawner,
    lod: LodManager,
    agents: BTreeMap<VehicleUid, Agent>,
    config: TrafficConfig,
    rng: ChaCha8Rng,

    /// Fixed routes not yet handed to an agent
    routes: VecDeque<Vec<EntryId>>,

    /// Events raised between ticks (collisions, emergency brakes)
    staged_events: Vec<TrafficEvent>,
    next_density_check: f64,
    now: f64,
}

impl TrafficEngine {
    pub fn new(network: Arc<RoadNetwork>, config: TrafficConfig, seed: u64) -> CoreResult<Self> {
        config.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(seed.wrapping_mul(0x9e3779b97f4a7c15));
        info!(
            "Traffic engine created: {} entries, target density {}, seed {}",
            network.entry_count(),
            config.target_density,
            seed
        );
        Ok(Self {
            arbiter: IntersectionArbiter::new(network.clone()),
            network,
            spawner: Spawner::new(),
            lod: LodManager::new(config.lod.clone()),
            agents: BTreeMap::new(),
            routes: config.fixed_routes.iter().cloned().collect(),
            config,
            rng,
            staged_events: Vec::new(),
            next_density_check: 0.0,
            now: 0.0,
        })
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn arbiter(&self) -> &IntersectionArbiter {
        &self.arbiter
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn agent(&self, uid: VehicleUid) -> Option<&Agent> {
        self.agents.get(&uid)
    }

    /// Direct access for scripted scenarios.
    pub fn agent_mut(&mut self, uid: VehicleUid) -> Option<&mut Agent> {
        self.agents.get_mut(&uid)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn lod_mode(&self) -> OptimizationMode {
        self.lod.mode()
    }

    /// Advances every agent to `now`. `frame_dt` is the host frame step.
    pub fn tick(&mut self, now: f64, frame_dt: f64, services: &Services<'_>) -> TickOutput {
        self.now = now;
        let mut out = TickOutput {
            events: std::mem::take(&mut self.staged_events),
            ..TickOutput::default()
        };

        for agent in self.agents.values_mut() {
            if let Some(pose) = services.world.vehicle_pose(agent.uid) {
                agent.pose = pose;
            }
        }
        let snapshot: SnapshotMap = self
            .agents
            .iter()
            .map(|(uid, agent)| (*uid, agent.snapshot()))
            .collect();
        self.spawner.begin_cycle();

        let mut recycles = Vec::new();
        let uids: Vec<VehicleUid> = self.agents.keys().copied().collect();
        for uid in uids {
            let Some(agent) = self.agents.get_mut(&uid) else {
                continue;
            };
            let position = agent.pose.position;

            let distance = services.observers.nearest_observer_distance(position);
            if self.lod.update(&mut agent.lod, now, distance) {
                let radius = self.config.lifecycle.vehicle_visibility_radius;
                if services.observers.is_visible(position, radius) {
                    agent.hidden_since = None;
                } else if agent.hidden_since.is_none() {
                    agent.hidden_since = Some(now);
                }
            }
            out.render.push(RenderState {
                uid,
                visible: agent.lod.in_render_range,
                headlights: agent.lod.headlights_allowed(),
            });

            if let Some(reason) = agent.health_fault(now, &self.config) {
                let unnoticed = !self.config.lifecycle.silent_assisting
                    || silent_eligible(position, services.observers, &self.config);
                if unnoticed {
                    recycles.push((uid, reason));
                    continue;
                }
            }

            let reduced = agent.lod.is_reduced();
            let Some(logic_dt) = agent.lod.logic_gate.step(now, frame_dt, reduced) else {
                if let Some(dt) = agent.lod.physics_gate.step(now, frame_dt, reduced) {
                    out.intents.push(MotionIntent {
                        uid,
                        command: agent.last_command,
                        dt,
                    });
                }
                continue;
            };

            let pose = agent.pose;
            let mut env = MotorEnv {
                network: &self.network,
                arbiter: &self.arbiter,
                world: services.world,
                signals: services.signals,
                agents: &snapshot,
                config: &self.config,
                now,
                dt: logic_dt,
                rng: &mut self.rng,
                events: &mut out.events,
            };
            match agent.tick(&pose, &mut env) {
                Ok(command) => {
                    if let Some(dt) = agent.lod.physics_gate.step(now, frame_dt, reduced) {
                        out.intents.push(MotionIntent { uid, command, dt });
                    }
                }
                Err(reason) => recycles.push((uid, reason)),
            }
        }

        for (uid, reason) in recycles {
            self.recycle(uid, reason, services, &mut out);
        }

        if now >= self.next_density_check {
            self.next_density_check = now + self.config.lod.check_interval_secs;
            if self.agents.len() < self.config.target_density {
                let mode = if self.config.lifecycle.silent_assisting {
                    SpawnMode::SILENT
                } else {
                    SpawnMode::VISIBLE
                };
                self.spawn_one(mode, services, &mut out);
            }
        }

        for event in &out.events {
            debug!(?event, "traffic event");
        }
        out
    }

    /// Resets the arbiter and makes one placement attempt per slot.
    pub fn spawn_heaps(&mut self, count: usize, services: &Services<'_>) -> TickOutput {
        let mut out = TickOutput::default();
        self.arbiter.reset_all();
        for agent in self.agents.values_mut() {
            agent.registered_entry = None;
            agent.next_entry = None;
            agent.approach.clear();
        }
        self.spawner.begin_cycle();
        let mut spawned = 0;
        for _ in 0..count {
            if self.spawn_one(SpawnMode::VISIBLE, services, &mut out).is_some() {
                spawned += 1;
            }
        }
        info!("Spawned {}/{} agents", spawned, count);
        out
    }

    /// Places one agent at arc fraction `t` of `entry`, if the spot is free.
    pub fn spawn_at(
        &mut self,
        entry: EntryId,
        t: f64,
        services: &Services<'_>,
    ) -> Option<(VehicleUid, TickOutput)> {
        let mut out = TickOutput::default();
        let site = self
            .spawner
            .try_site(&self.network, entry, t, services.world, &self.config)?;
        let uid = self.spawner.acquire_id(&mut self.rng);
        self.admit(uid, site, None, &mut out)?;
        Some((uid, out))
    }

    /// Despawns every agent.
    pub fn kill_all(&mut self) -> TickOutput {
        let mut out = TickOutput::default();
        let uids: Vec<VehicleUid> = self.agents.keys().copied().collect();
        for uid in uids {
            self.despawn(uid, RecycleReason::Requested, &mut out);
        }
        info!("Killed all agents ({} despawned)", out.removals.len());
        out
    }

    /// Changes the target density; excess agents are despawned at once.
    pub fn set_density(&mut self, target: usize) -> TickOutput {
        let mut out = TickOutput::default();
        self.config.target_density = target;
        let excess: Vec<VehicleUid> = self
            .agents
            .keys()
            .rev()
            .take(self.agents.len().saturating_sub(target))
            .copied()
            .collect();
        for uid in excess {
            self.despawn(uid, RecycleReason::Requested, &mut out);
        }
        out
    }

    pub fn set_lod_mode(&mut self, mode: OptimizationMode) {
        let now = self.now;
        self.lod.set_mode(
            mode,
            self.agents.values_mut().map(|a| &mut a.lod),
            now,
            &mut self.rng,
        );
    }

    /// Feeds a physical contact reported by the host.
    pub fn report_collision(&mut self, uid: VehicleUid, other: ColliderKind) -> bool {
        let other_state = other
            .vehicle()
            .and_then(|o| self.agents.get(&o))
            .map(|a| a.snapshot());
        let Some(agent) = self.agents.get_mut(&uid) else {
            return false;
        };
        agent.on_collision(
            &other,
            other_state.as_ref(),
            &self.arbiter,
            self.now,
            &mut self.rng,
            &mut self.staged_events,
        )
    }

    pub fn trigger_emergency_brake(&mut self, uid: VehicleUid) -> bool {
        let Some(agent) = self.agents.get_mut(&uid) else {
            return false;
        };
        agent.trigger_emergency_brake(self.now, &self.config, &mut self.rng, &mut self.staged_events);
        true
    }

    /// Makes `uid` ram `target` until contact or timeout.
    pub fn force_collide(&mut self, uid: VehicleUid, target: VehicleUid) -> bool {
        let Some(position) = self.agents.get(&target).map(|a| a.pose.position) else {
            return false;
        };
        match self.agents.get_mut(&uid) {
            Some(agent) if uid != target => {
                agent.start_force_collide(target, position, self.now);
                true
            }
            _ => false,
        }
    }

    pub fn force_shift(&mut self, uid: VehicleUid) -> bool {
        self.request_shift(uid, ShiftTrigger::Forced)
    }

    /// Asks `uid` to merge into the lane closest to `point`.
    pub fn shift_toward(&mut self, uid: VehicleUid, point: Vector3<f64>) -> bool {
        self.request_shift(uid, ShiftTrigger::Toward(point))
    }

    fn request_shift(&mut self, uid: VehicleUid, trigger: ShiftTrigger) -> bool {
        match self.agents.get_mut(&uid) {
            Some(agent) => {
                agent.request_shift(trigger);
                true
            }
            None => false,
        }
    }

    /// Makes `uid` follow `entries` from its next lane end on.
    pub fn assign_fixed_route(&mut self, uid: VehicleUid, entries: Vec<EntryId>) -> bool {
        let Some(mut route) = FixedRoute::new(entries) else {
            return false;
        };
        let Some(agent) = self.agents.get_mut(&uid) else {
            return false;
        };
        if let Some(pos) = route.entries.iter().position(|e| *e == agent.entry) {
            route.cursor = pos;
        }
        agent.fixed_route = Some(route);
        true
    }

    fn spawn_one(
        &mut self,
        mode: SpawnMode,
        services: &Services<'_>,
        out: &mut TickOutput,
    ) -> Option<VehicleUid> {
        let route = self.routes.pop_front().and_then(FixedRoute::new);
        let site = match &route {
            Some(route) => self.spawner.find_site_on(
                &self.network,
                route.start(),
                services.world,
                &self.config,
                &mut self.rng,
            ),
            None => self.spawner.find_site(
                &self.network,
                mode,
                services.world,
                services.observers,
                &self.config,
                &mut self.rng,
            ),
        };
        let Some(site) = site else {
            if let Some(route) = route {
                self.routes.push_front(route.entries);
            }
            warn!("Spawn attempt failed, no free spot");
            out.events.push(TrafficEvent::SpawnFailed {
                attempts: self.config.lifecycle.placement_retries,
            });
            return None;
        };
        let uid = self.spawner.acquire_id(&mut self.rng);
        self.admit(uid, site, route, out)?;
        Some(uid)
    }

    fn admit(
        &mut self,
        uid: VehicleUid,
        site: SpawnSite,
        route: Option<FixedRoute>,
        out: &mut TickOutput,
    ) -> Option<()> {
        let Some(mut agent) =
            self.spawner
                .build_agent(uid, &self.network, &site, self.now, &self.config, &mut self.rng)
        else {
            self.spawner.release_id(uid);
            return None;
        };
        agent.fixed_route = route;
        self.agents.insert(uid, agent);
        out.placements.push(Placement {
            uid,
            pose: site.pose,
        });
        out.events.push(TrafficEvent::Spawned {
            uid,
            entry: site.entry,
        });
        Some(())
    }

    /// Topology faults despawn, health faults respawn under the same id.
    fn recycle(
        &mut self,
        uid: VehicleUid,
        reason: RecycleReason,
        services: &Services<'_>,
        out: &mut TickOutput,
    ) {
        if reason.is_topology_fault() {
            warn!("Agent {} hit a topology fault ({}), despawning", uid, reason);
            self.despawn(uid, reason, out);
            return;
        }
        let Some(old) = self.agents.get_mut(&uid) else {
            return;
        };
        old.release_registration(&self.arbiter);
        let route = old.fixed_route.take();

        let silent = self.config.lifecycle.silent_assisting;
        let area = if self.config.lifecycle.only_respawn_in_spawn_area {
            self.config.lifecycle.spawn_area
        } else {
            None
        };
        let site = match &route {
            Some(r) => self.spawner.find_site_on(
                &self.network,
                r.start(),
                services.world,
                &self.config,
                &mut self.rng,
            ),
            None => self.spawner.find_site(
                &self.network,
                SpawnMode { silent, area },
                services.world,
                services.observers,
                &self.config,
                &mut self.rng,
            ),
        };
        let fresh = site.and_then(|site| {
            self.spawner
                .build_agent(uid, &self.network, &site, self.now, &self.config, &mut self.rng)
                .map(|agent| (site, agent))
        });

        match fresh {
            Some((site, mut agent)) => {
                agent.fixed_route = route.map(|r| FixedRoute { cursor: 0, ..r });
                self.agents.insert(uid, agent);
                out.placements.push(Placement {
                    uid,
                    pose: site.pose,
                });
                info!("Agent {} respawned on {} ({})", uid, site.entry, reason);
                out.events.push(TrafficEvent::Respawned {
                    uid,
                    entry: site.entry,
                    reason,
                    silent,
                });
            }
            None => {
                if let Some(agent) = self.agents.get_mut(&uid) {
                    agent.fixed_route = route;
                }
                warn!("Agent {} could not be respawned ({}), despawning", uid, reason);
                self.despawn(uid, reason, out);
            }
        }
    }

    /// Removes an agent. Safe to call twice; the second call does nothing.
    fn despawn(&mut self, uid: VehicleUid, reason: RecycleReason, out: &mut TickOutput) {
        let Some(mut agent) = self.agents.remove(&uid) else {
            return;
        };
        agent.release_registration(&self.arbiter);
        if let Some(route) = agent.fixed_route.take() {
            self.routes.push_back(route.entries);
        }
        self.spawner.release_id(uid);
        out.removals.push(uid);
        out.events.push(TrafficEvent::Despawned { uid, reason });
        debug!("Agent {} despawned ({})", uid, reason);
    }
}
