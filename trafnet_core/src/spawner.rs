//! Agent placement and the free-id pool.
//!
//! The spawner does not own agents; the engine does. It finds free spots on
//! lane entries, hands out ids (recycled ones first) and builds fresh
//! [`Agent`]s with sampled dynamics.

use crate::config::{SpawnArea, TrafficConfig};
use crate::geometry::remap;
use crate::lod::LodState;
use crate::motor::Agent;
use crate::body::VehicleProfile;
use crate::road_network::RoadNetwork;
use nalgebra::Vector3;
use rand::Rng;
use std::collections::VecDeque;
use tracing::debug;
use trafnet_env::{EntryId, LayerMask, ObserverView, Pose, VehicleUid, WorldQuery};

/// Where and how to look for a spot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnMode {
    /// Only accept spots no observer can see
    pub silent: bool,

    /// Restrict to lanes with a waypoint inside this area
    pub area: Option<SpawnArea>,
}

impl SpawnMode {
    pub const VISIBLE: SpawnMode = SpawnMode {
        silent: false,
        area: None,
    };

    pub const SILENT: SpawnMode = SpawnMode {
        silent: true,
        area: None,
    };
}

/// A free spot on a lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnSite {
    pub entry: EntryId,

    /// Index of the waypoint following the spot
    pub index: usize,
    pub pose: Pose,
}

/// Whether a respawn at `point` would go unnoticed.
pub fn silent_eligible(point: Vector3<f64>, observers: &dyn ObserverView, config: &TrafficConfig) -> bool {
    let lifecycle = &config.lifecycle;
    let distance = observers.nearest_observer_distance(point);
    distance > lifecycle.silent_far_distance
        || (distance > lifecycle.silent_hidden_distance
            && !observers.is_visible(point, lifecycle.vehicle_visibility_radius))
}

#[derive(Debug, Default)]
pub struct Spawner {
    free_ids: VecDeque<VehicleUid>,

    /// Spots handed out since the last `begin_cycle`
    pending: Vec<Vector3<f64>>,
}

impl Spawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the spots handed out in the previous cycle.
    pub fn begin_cycle(&mut self) {
        self.pending.clear();
    }

    /// Next id: the oldest released one, else a fresh one.
    pub fn acquire_id<R: Rng + ?Sized>(&mut self, rng: &mut R) -> VehicleUid {
        self.free_ids
            .pop_front()
            .unwrap_or_else(|| VehicleUid::generate(rng))
    }

    /// Returns an id to the pool. Returns false when it was already there.
    pub fn release_id(&mut self, uid: VehicleUid) -> bool {
        if self.free_ids.contains(&uid) {
            return false;
        }
        self.free_ids.push_back(uid);
        true
    }

    pub fn free_ids(&self) -> impl Iterator<Item = &VehicleUid> {
        self.free_ids.iter()
    }

    /// One placement attempt on `entry` at arc fraction `t`.
    pub fn try_site(
        &mut self,
        network: &RoadNetwork,
        entry: EntryId,
        t: f64,
        world: &dyn WorldQuery,
        config: &TrafficConfig,
    ) -> Option<SpawnSite> {
        let lane = network.entry(entry)?;
        if lane.is_intersection() {
            return None;
        }
        let (index, point) = lane.interpolated_position(t);
        let radius = config.lifecycle.check_radius;
        if world.sphere_occupied(point, radius, LayerMask::VEHICLE.union(LayerMask::PLAYER)) {
            return None;
        }
        if self.pending.iter().any(|p| (p - point).norm() < radius) {
            return None;
        }
        self.pending.push(point);
        Some(SpawnSite {
            entry,
            index,
            pose: Pose::looking_at(point, lane.waypoints[index]),
        })
    }

    /// Searches random lanes for a free spot, with the retry budget of `mode`.
    ///
    /// Silent searches give up after `silent_retries` and fall back to a
    /// visible search.
    pub fn find_site<R: Rng + ?Sized>(
        &mut self,
        network: &RoadNetwork,
        mode: SpawnMode,
        world: &dyn WorldQuery,
        observers: &dyn ObserverView,
        config: &TrafficConfig,
        rng: &mut R,
    ) -> Option<SpawnSite> {
        let lanes: Vec<EntryId> = match mode.area {
            Some(area) => network
                .entries_within(Vector3::from(area.center), area.radius)
                .into_iter()
                .filter(|id| network.entry(*id).map(|e| !e.is_intersection()).unwrap_or(false))
                .collect(),
            None => network.lane_entries().to_vec(),
        };
        if lanes.is_empty() {
            return None;
        }

        let lifecycle = &config.lifecycle;
        if mode.silent {
            for _ in 0..lifecycle.silent_retries {
                let entry = lanes[rng.gen_range(0..lanes.len())];
                let t = rng.gen_range(0.1..0.9);
                let Some(lane) = network.entry(entry) else {
                    continue;
                };
                let (_, point) = lane.interpolated_position(t);
                if !silent_eligible(point, observers, config) {
                    continue;
                }
                if let Some(site) = self.try_site(network, entry, t, world, config) {
                    return Some(site);
                }
            }
            debug!("No silent spawn spot after {} tries", lifecycle.silent_retries);
        }

        for _ in 0..lifecycle.placement_retries {
            let entry = lanes[rng.gen_range(0..lanes.len())];
            let t = rng.gen_range(0.1..0.9);
            if let Some(site) = self.try_site(network, entry, t, world, config) {
                return Some(site);
            }
        }
        None
    }

    /// Searches one specific lane (fixed-route starts).
    pub fn find_site_on<R: Rng + ?Sized>(
        &mut self,
        network: &RoadNetwork,
        entry: EntryId,
        world: &dyn WorldQuery,
        config: &TrafficConfig,
        rng: &mut R,
    ) -> Option<SpawnSite> {
        (0..config.lifecycle.placement_retries).find_map(|_| {
            let t = rng.gen_range(0.1..0.9);
            self.try_site(network, entry, t, world, config)
        })
    }

    /// Builds an agent at `site` with sampled dynamics.
    pub fn build_agent<R: Rng + ?Sized>(
        &self,
        uid: VehicleUid,
        network: &RoadNetwork,
        site: &SpawnSite,
        now: f64,
        config: &TrafficConfig,
        rng: &mut R,
    ) -> Option<Agent> {
        let lane = network.entry(site.entry)?;
        let profile = if rng.gen::<f64>() < config.lifecycle.large_vehicle_ratio {
            VehicleProfile::TRUCK
        } else {
            VehicleProfile::CAR
        };
        let speeds = config.dynamics.max_speed_range;
        let brakes = config.dynamics.max_brake_range;
        let max_speed = speeds.sample(rng);
        let max_brake = if speeds.max > speeds.min {
            remap(max_speed, speeds.min, speeds.max, brakes.min, brakes.max)
        } else {
            brakes.min
        };
        let lod = LodState::new(now, &config.lod, rng);
        Some(Agent::new(uid, profile, max_speed, max_brake, lane, site.index, &site.pose, lod))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::tests::SphereWorld;
    use crate::road_network::NetworkDescription;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use trafnet_env::ColliderKind;

    struct Observer {
        at: Vector3<f64>,
        sees: bool,
    }

    impl ObserverView for Observer {
        fn nearest_observer_distance(&self, point: Vector3<f64>) -> f64 {
            (point - self.at).norm()
        }

        fn is_visible(&self, _point: Vector3<f64>, _radius: f64) -> bool {
            self.sees
        }
    }

    fn v(x: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, 0.0, z)
    }

    fn network() -> RoadNetwork {
        let mut desc = NetworkDescription::new();
        desc.add_lane(EntryId::new(1, 0), &[v(0.0, 0.0), v(0.0, 100.0)]);
        desc.add_lane(EntryId::new(2, 0), &[v(500.0, 0.0), v(500.0, 100.0)]);
        RoadNetwork::from_description(desc).unwrap()
    }

    #[test]
    fn test_id_pool_is_fifo_and_idempotent() {
        let mut spawner = Spawner::new();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let a = spawner.acquire_id(&mut rng);
        let b = spawner.acquire_id(&mut rng);
        assert_ne!(a, b);

        assert!(spawner.release_id(b));
        assert!(spawner.release_id(a));
        assert!(!spawner.release_id(a), "double release ignored");
        assert_eq!(spawner.free_ids().count(), 2);

        assert_eq!(spawner.acquire_id(&mut rng), b);
        assert_eq!(spawner.acquire_id(&mut rng), a);
        let fresh = spawner.acquire_id(&mut rng);
        assert!(fresh != a && fresh != b);
    }

    #[test]
    fn test_sites_respect_occupancy_and_pending() {
        let net = network();
        let config = TrafficConfig::default();
        let mut spawner = Spawner::new();
        let world = SphereWorld {
            spheres: vec![(v(0.0, 50.0), 1.0, ColliderKind::Vehicle(VehicleUid::from_seed(9)))],
        };
        assert!(spawner.try_site(&net, EntryId::new(1, 0), 0.5, &world, &config).is_none());

        let site = spawner
            .try_site(&net, EntryId::new(1, 0), 0.2, &world, &config)
            .unwrap();
        assert_eq!(site.index, 1);
        assert!((site.pose.position - v(0.0, 20.0)).norm() < 1e-9);
        assert!((site.pose.forward.into_inner() - Vector3::z()).norm() < 1e-9);

        // Same spot again in the same cycle
        assert!(spawner.try_site(&net, EntryId::new(1, 0), 0.22, &world, &config).is_none());
        spawner.begin_cycle();
        assert!(spawner.try_site(&net, EntryId::new(1, 0), 0.22, &world, &config).is_some());
    }

    #[test]
    fn test_silent_eligibility() {
        let config = TrafficConfig::default();
        let near = Observer { at: v(0.0, 0.0), sees: false };
        assert!(!silent_eligible(v(0.0, 50.0), &near, &config));
        assert!(silent_eligible(v(0.0, 100.0), &near, &config));
        let watching = Observer { at: v(0.0, 0.0), sees: true };
        assert!(!silent_eligible(v(0.0, 100.0), &watching, &config));
        assert!(silent_eligible(v(0.0, 400.0), &watching, &config));
    }

    #[test]
    fn test_silent_search_prefers_hidden_lanes() {
        let net = network();
        let config = TrafficConfig::default();
        let mut spawner = Spawner::new();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let observer = Observer { at: v(0.0, 50.0), sees: true };
        for _ in 0..10 {
            spawner.begin_cycle();
            let site = spawner
                .find_site(&net, SpawnMode::SILENT, &SphereWorld::default(), &observer, &config, &mut rng)
                .unwrap();
            assert_eq!(site.entry, EntryId::new(2, 0));
        }
    }

    #[test]
    fn test_area_restricts_lanes() {
        let net = network();
        let config = TrafficConfig::default();
        let mut spawner = Spawner::new();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let observer = Observer { at: v(0.0, 0.0), sees: true };
        let mode = SpawnMode {
            silent: false,
            area: Some(SpawnArea { center: [0.0, 0.0, 50.0], radius: 60.0 }),
        };
        for _ in 0..10 {
            spawner.begin_cycle();
            let site = spawner
                .find_site(&net, mode, &SphereWorld::default(), &observer, &config, &mut rng)
                .unwrap();
            assert_eq!(site.entry, EntryId::new(1, 0));
        }
    }

    #[test]
    fn test_built_agent_dynamics() {
        let net = network();
        let config = TrafficConfig::default();
        let mut spawner = Spawner::new();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for _ in 0..50 {
            spawner.begin_cycle();
            let site = spawner
                .try_site(&net, EntryId::new(1, 0), 0.5, &SphereWorld::default(), &config)
                .unwrap();
            let uid = spawner.acquire_id(&mut rng);
            let agent = spawner.build_agent(uid, &net, &site, 0.0, &config, &mut rng).unwrap();
            assert!(agent.max_speed >= 10.0 && agent.max_speed <= 16.0);
            let expected = remap(agent.max_speed, 10.0, 16.0, 8.5, 18.0);
            assert!((agent.max_brake - expected).abs() < 1e-9);
            assert_eq!(agent.speed, 0.0);
            assert_eq!(agent.index, 1);
        }
    }
}
