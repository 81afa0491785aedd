//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::error::{SimError, SimResult};
use crate::maps::{SimMap, LANE_OFFSET};
use crate::oracle::{Observer, Oracle};
use crate::signals::SignalController;

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use trafnet_core::{RoadNetwork, Services, TickOutput, TrafficConfig, TrafficEngine};
use trafnet_env::{EntryId, PropTag, TrafficContext, VehicleUid};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Agents for free-running scenarios
    pub num_agents: usize,

    pub tick_rate_hz: u32,

    /// Maximum simulation duration in seconds
    pub max_duration_secs: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_agents: 40,
            tick_rate_hz: 30,
            max_duration_secs: 60.0,
        }
    }
}

impl SimConfig {
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }

    pub fn target_ticks(&self) -> u64 {
        (self.max_duration_secs * self.tick_rate_hz as f64) as u64
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub time: f64,
    pub output: TickOutput,

    /// Contacts that turned into accidents
    pub accidents: usize,
}

/// The SimWorld - engine, ground truth and signals under one clock.
pub struct SimWorld {
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    pub oracle: Oracle,
    pub signals: SignalController,
    pub engine: TrafficEngine,

    /// RNG for scenery, separate from the engine's
    physics_rng: ChaCha8Rng,
    tick_count: u64,
}

impl SimWorld {
    pub fn new(config: SimConfig, map: SimMap, traffic: TrafficConfig) -> SimResult<Self> {
        // Derive separate seeds for different subsystems
        let context = SimContext::shared(config.seed);
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let engine_seed = context.derive_seed(1);

        let name = map.name.clone();
        let (network, signals) = map.build()?;
        let engine = TrafficEngine::new(network, traffic, engine_seed)?;
        debug!("SimWorld on {} (seed={})", name, config.seed);

        Ok(Self {
            config,
            context,
            oracle: Oracle::new(),
            signals,
            engine,
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            tick_count: 0,
        })
    }

    pub fn network(&self) -> &RoadNetwork {
        self.engine.network()
    }

    /// Applies an engine output to the bodies and resizes new ones.
    pub fn apply(&mut self, output: &TickOutput) {
        output.apply_to(&mut self.oracle);
        for placement in &output.placements {
            if let Some(agent) = self.engine.agent(placement.uid) {
                self.oracle.set_profile(placement.uid, &agent.profile);
            }
        }
    }

    /// Initial population: one placement attempt per slot.
    pub fn spawn_heaps(&mut self, count: usize) -> usize {
        let output = {
            let services = Services {
                world: &self.oracle,
                signals: &self.signals,
                observers: &self.oracle,
            };
            self.engine.spawn_heaps(count, &services)
        };
        self.apply(&output);
        output.placements.len()
    }

    /// Places one agent on `entry` at arc fraction `t`.
    pub fn spawn_at(&mut self, entry: EntryId, t: f64) -> SimResult<VehicleUid> {
        let spawned = {
            let services = Services {
                world: &self.oracle,
                signals: &self.signals,
                observers: &self.oracle,
            };
            self.engine.spawn_at(entry, t, &services)
        };
        let (uid, output) =
            spawned.ok_or_else(|| SimError::setup(format!("no free spot on {} at {:.2}", entry, t)))?;
        self.apply(&output);
        Ok(uid)
    }

    /// Spawns at `t` and pins the agent's top speed.
    pub fn spawn_with_speed(&mut self, entry: EntryId, t: f64, max_speed: f64) -> SimResult<VehicleUid> {
        let uid = self.spawn_at(entry, t)?;
        if let Some(agent) = self.engine.agent_mut(uid) {
            agent.max_speed = max_speed;
        }
        Ok(uid)
    }

    /// Puts a camera at `position` looking along `forward`.
    pub fn add_observer(&mut self, position: Vector3<f64>, forward: Vector3<f64>) {
        self.oracle.add_observer(Observer {
            position,
            forward,
            view_distance: 250.0,
            fov_deg: 100.0,
        });
    }

    /// Parks `count` static cars along random lanes, just off the carriageway.
    pub fn scatter_parked_cars(&mut self, count: usize) -> SimResult<usize> {
        let jitter = Normal::new(0.0, 0.4).map_err(|e| SimError::setup(e.to_string()))?;
        let lanes = self.network().lane_entries().to_vec();
        if lanes.is_empty() {
            return Ok(0);
        }
        let mut placed = 0;
        for _ in 0..count {
            let id = lanes[self.physics_rng.gen_range(0..lanes.len())];
            let t = self.physics_rng.gen_range(0.2..0.8);
            let Some(lane) = self.engine.network().entry(id) else {
                continue;
            };
            let (_, point) = lane.interpolated_position(t);
            let dir = lane.span().normalize();
            let right = Vector3::y().cross(&dir);
            let kerb = LANE_OFFSET + 3.5 + jitter.sample(&mut self.physics_rng);
            self.oracle
                .add_prop(point + right * kerb, dir, 2.2, 0.9, PropTag::Generic);
            placed += 1;
        }
        Ok(placed)
    }

    /// Advances simulation by one tick.
    pub fn tick(&mut self) -> TickReport {
        let dt = self.config.dt();
        self.context.advance_time(Duration::from_secs_f64(dt));
        let now = self.context.now_secs();
        self.oracle.step(dt);
        self.signals.advance(now);

        let output = {
            let services = Services {
                world: &self.oracle,
                signals: &self.signals,
                observers: &self.oracle,
            };
            self.engine.tick(now, dt, &services)
        };
        self.apply(&output);

        let mut accidents = 0;
        for contact in self.oracle.contacts() {
            if self.engine.report_collision(contact.uid, contact.other) {
                accidents += 1;
            }
        }

        self.tick_count += 1;
        TickReport {
            tick: self.tick_count,
            time: now,
            output,
            accidents,
        }
    }

    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn agent_count(&self) -> usize {
        self.engine.agent_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps;

    fn quiet() -> TrafficConfig {
        let mut config = TrafficConfig::default();
        config.target_density = 0;
        config
    }

    #[test]
    fn test_sim_world_tick() {
        let mut world = SimWorld::new(SimConfig::default(), maps::straight_road(500.0), quiet()).unwrap();
        assert_eq!(world.tick_count(), 0);
        assert_eq!(world.time(), 0.0);

        world.tick();
        assert_eq!(world.tick_count(), 1);
        assert!((world.time() - 1.0 / 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_spawned_bodies_follow_engine() {
        let mut world = SimWorld::new(SimConfig::default(), maps::straight_road(2000.0), quiet()).unwrap();
        let uid = world.spawn_with_speed(EntryId::new(1, 0), 0.1, 10.0).unwrap();
        let start = world.oracle.body(uid).unwrap().pose.position;
        for _ in 0..90 {
            world.tick();
        }
        let body = world.oracle.body(uid).unwrap();
        let agent = world.engine.agent(uid).unwrap();
        assert!(body.pose.position.z > start.z + 5.0);
        assert_eq!(body.half_length, agent.profile.half_length);
    }

    #[test]
    fn test_same_seed_same_trajectories() {
        let run = || {
            let mut config = TrafficConfig::default();
            config.target_density = 12;
            let mut world = SimWorld::new(SimConfig::default(), maps::grid_town(3, 120.0), config).unwrap();
            world.spawn_heaps(12);
            for _ in 0..150 {
                world.tick();
            }
            world
                .oracle
                .bodies()
                .map(|(uid, b)| (*uid, b.pose.position))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_parked_cars_stay_off_the_lane() {
        let mut world = SimWorld::new(SimConfig::default(), maps::straight_road(1000.0), quiet()).unwrap();
        assert_eq!(world.scatter_parked_cars(5).unwrap(), 5);
        let lane = world.network().entry(EntryId::new(1, 0)).unwrap().clone();
        for t in [0.2, 0.5, 0.8] {
            let (_, p) = lane.interpolated_position(t);
            assert!(!trafnet_env::WorldQuery::sphere_occupied(
                &world.oracle,
                p,
                0.9,
                trafnet_env::LayerMask::PROP
            ));
        }
    }
}
