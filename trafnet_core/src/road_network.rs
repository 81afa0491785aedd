//! Static road graph: lane entries, intersection connectors and adjacency.
//!
//! The network is loaded once and shared read-only (`Arc<RoadNetwork>`).
//! Everything that changes during a run (interest counters, stop queues)
//! lives in the [`crate::arbiter::IntersectionArbiter`].
//!
//! Lookups never fail hard: a missing entry, a missing node or a node without
//! edges is reported as `None` and the caller recycles the agent.

use crate::error::{CoreError, CoreResult};
use crate::geometry::{centroid, closest_point_on_segment_xz, flat};
use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};
use trafnet_env::{EntryId, IntersectionId, LightId};

/// A directed lane segment or intersection connector.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadEntry {
    pub id: EntryId,

    /// Ordered polyline, at least two points
    pub waypoints: Vec<Vector3<f64>>,

    /// Set for intersection connectors
    pub intersection: Option<IntersectionId>,

    pub light: Option<LightId>,

    /// Entries that must be free of registered interest before this one may be used
    pub give_way_to: Vec<EntryId>,
}

impl RoadEntry {
    pub fn is_intersection(&self) -> bool {
        self.intersection.is_some()
    }

    pub fn first(&self) -> Vector3<f64> {
        self.waypoints[0]
    }

    pub fn last(&self) -> Vector3<f64> {
        self.waypoints[self.waypoints.len() - 1]
    }

    /// Start-to-end vector.
    pub fn span(&self) -> Vector3<f64> {
        self.last() - self.first()
    }

    /// Polyline length.
    pub fn total_length(&self) -> f64 {
        self.waypoints.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
    }

    /// Point at arc-length fraction `t` (0..=1) together with the index of the
    /// waypoint that follows it.
    pub fn interpolated_position(&self, t: f64) -> (usize, Vector3<f64>) {
        let total = self.total_length();
        let last = self.waypoints.len() - 1;
        if total <= 0.0 {
            return (last, self.last());
        }

        let wanted = t.clamp(0.0, 1.0) * total;
        let mut walked = 0.0;
        for i in 1..self.waypoints.len() {
            let seg = (self.waypoints[i] - self.waypoints[i - 1]).norm();
            if walked + seg >= wanted && seg > 0.0 {
                let local = (wanted - walked) / seg;
                return (i, self.waypoints[i - 1].lerp(&self.waypoints[i], local));
            }
            walked += seg;
        }
        (last, self.last())
    }

    /// Mean of the waypoints.
    pub fn centroid(&self) -> Vector3<f64> {
        centroid(&self.waypoints)
    }

    /// Index of the closest waypoint that lies ahead of `position` along
    /// `forward`, searching from `from_index`. Falls back to the last index.
    pub fn nearest_forward_waypoint(
        &self,
        position: Vector3<f64>,
        forward: Vector3<f64>,
        from_index: usize,
    ) -> usize {
        let mut best = self.waypoints.len() - 1;
        let mut best_dist = f64::INFINITY;
        for (i, wp) in self.waypoints.iter().enumerate().skip(from_index) {
            let to = wp - position;
            if forward.dot(&to) > 0.0 {
                let d = to.norm();
                if d < best_dist {
                    best_dist = d;
                    best = i;
                }
            }
        }
        best
    }

    /// First waypoint at or after `from_index` that lies ahead, if any.
    pub fn first_forward_waypoint(
        &self,
        position: Vector3<f64>,
        forward: Vector3<f64>,
        from_index: usize,
    ) -> Option<usize> {
        (from_index..self.waypoints.len())
            .find(|&i| forward.dot(&(self.waypoints[i] - position)) > 0.0)
    }

    /// Closest point on the polyline segment nearest to `position`, paired with
    /// the travel direction of that segment. Evaluated on the ground plane.
    pub fn nearest_segment_point(
        &self,
        position: Vector3<f64>,
        forward: Vector3<f64>,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let mut nearest = 0;
        let mut nearest_dist = f64::INFINITY;
        for (i, wp) in self.waypoints.iter().enumerate() {
            let d = (wp - position).norm();
            if d < nearest_dist {
                nearest_dist = d;
                nearest = i;
            }
        }

        let last = self.waypoints.len() - 1;
        // Pick the neighbour on the side the car has not passed yet
        let (from, to) = if forward.dot(&(self.waypoints[nearest] - position)) > 0.0 {
            if nearest == 0 {
                (0, 1)
            } else {
                (nearest - 1, nearest)
            }
        } else if nearest == last {
            (last - 1, last)
        } else {
            (nearest, nearest + 1)
        };

        let a = self.waypoints[from];
        let b = self.waypoints[to];
        let point = closest_point_on_segment_xz(position, a, b);
        let dir = (b - a).try_normalize(1e-9).unwrap_or_else(Vector3::zeros);
        (point, dir)
    }

    /// Unit direction of the first segment, flattened.
    pub fn start_direction(&self) -> Vector3<f64> {
        flat(self.waypoints[1] - self.waypoints[0])
            .try_normalize(1e-9)
            .unwrap_or_else(Vector3::zeros)
    }

    /// Unit direction of the last segment, flattened.
    pub fn end_direction(&self) -> Vector3<f64> {
        let n = self.waypoints.len();
        flat(self.waypoints[n - 1] - self.waypoints[n - 2])
            .try_normalize(1e-9)
            .unwrap_or_else(Vector3::zeros)
    }
}

/// Edge of the road graph pointing at the next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoadGraphEdge {
    pub target: EntryId,
}

/// Adjacency of one entry. No edges means a dead end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoadGraphNode {
    pub edges: Vec<RoadGraphEdge>,
}

impl RoadGraphNode {
    pub fn has_edges(&self) -> bool {
        !self.edges.is_empty()
    }

    /// Uniform choice among the outgoing edges.
    pub fn select_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<RoadGraphEdge> {
        if self.edges.is_empty() {
            return None;
        }
        Some(self.edges[rng.gen_range(0..self.edges.len())])
    }

    pub fn contains(&self, target: EntryId) -> bool {
        self.edges.iter().any(|e| e.target == target)
    }
}

/// Intersection metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: IntersectionId,
    #[serde(default)]
    pub stop_sign: bool,
}

/// Serialized form of one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDescription {
    pub id: EntryId,
    pub waypoints: Vec<[f64; 3]>,
    #[serde(default)]
    pub intersection: Option<IntersectionId>,
    #[serde(default)]
    pub light: Option<LightId>,
    #[serde(default)]
    pub give_way_to: Vec<EntryId>,
}

/// Serialized adjacency of one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub from: EntryId,
    pub to: Vec<EntryId>,
}

/// Static network description loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default)]
    pub intersections: Vec<Intersection>,
    pub entries: Vec<EntryDescription>,
    #[serde(default)]
    pub graph: Vec<NodeDescription>,
}

impl NetworkDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_intersection(&mut self, id: u32, stop_sign: bool) -> IntersectionId {
        let id = IntersectionId(id);
        self.intersections.push(Intersection { id, stop_sign });
        id
    }

    /// Adds a plain lane entry.
    pub fn add_lane(&mut self, id: EntryId, waypoints: &[Vector3<f64>]) -> &mut EntryDescription {
        self.entries.push(EntryDescription {
            id,
            waypoints: waypoints.iter().map(|p| [p.x, p.y, p.z]).collect(),
            intersection: None,
            light: None,
            give_way_to: Vec::new(),
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Adds an intersection connector.
    pub fn add_connector(
        &mut self,
        id: EntryId,
        intersection: IntersectionId,
        waypoints: &[Vector3<f64>],
    ) -> &mut EntryDescription {
        let entry = self.add_lane(id, waypoints);
        entry.intersection = Some(intersection);
        entry
    }

    /// Appends a directed edge `from -> to`.
    pub fn connect(&mut self, from: EntryId, to: EntryId) {
        match self.graph.iter_mut().find(|n| n.from == from) {
            Some(node) => node.to.push(to),
            None => self.graph.push(NodeDescription { from, to: vec![to] }),
        }
    }
}

/// The loaded, immutable road network.
#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    entries: HashMap<EntryId, RoadEntry>,
    nodes: HashMap<EntryId, RoadGraphNode>,
    intersections: HashMap<IntersectionId, Intersection>,

    /// Plain lane ids in sorted order (deterministic sampling)
    lanes: Vec<EntryId>,

    /// Connector ids grouped by intersection
    connectors: HashMap<IntersectionId, Vec<EntryId>>,
}

impl RoadNetwork {
    /// Builds the network from its description.
    ///
    /// Entries with fewer than two waypoints are dropped with a warning and
    /// behave as missing at run time. Duplicate ids and references to
    /// undeclared intersections are load errors.
    pub fn from_description(desc: NetworkDescription) -> CoreResult<Self> {
        let mut network = RoadNetwork::default();

        for intersection in desc.intersections {
            if network
                .intersections
                .insert(intersection.id, intersection)
                .is_some()
            {
                return Err(CoreError::network(format!(
                    "duplicate intersection {}",
                    intersection.id.0
                )));
            }
        }

        let mut seen = HashSet::new();
        for e in desc.entries {
            if !seen.insert(e.id) {
                return Err(CoreError::network(format!("duplicate entry {}", e.id)));
            }
            if let Some(ix) = e.intersection {
                if !network.intersections.contains_key(&ix) {
                    return Err(CoreError::network(format!(
                        "entry {} references unknown intersection {}",
                        e.id, ix.0
                    )));
                }
            }
            if e.waypoints.len() < 2 {
                warn!(
                    "Entry {} has {} waypoint(s), treating it as missing",
                    e.id,
                    e.waypoints.len()
                );
                continue;
            }

            let entry = RoadEntry {
                id: e.id,
                waypoints: e
                    .waypoints
                    .iter()
                    .map(|p| Vector3::new(p[0], p[1], p[2]))
                    .collect(),
                intersection: e.intersection,
                light: e.light,
                give_way_to: e.give_way_to,
            };
            match entry.intersection {
                Some(ix) => network.connectors.entry(ix).or_default().push(entry.id),
                None => network.lanes.push(entry.id),
            }
            network.entries.insert(entry.id, entry);
        }

        for node in desc.graph {
            let slot = network.nodes.entry(node.from).or_default();
            slot.edges
                .extend(node.to.into_iter().map(|target| RoadGraphEdge { target }));
        }

        network.lanes.sort();
        for ids in network.connectors.values_mut() {
            ids.sort();
        }

        debug!(
            "Road network loaded: {} lanes, {} connectors, {} intersections",
            network.lanes.len(),
            network.entries.len() - network.lanes.len(),
            network.intersections.len()
        );
        Ok(network)
    }

    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let desc: NetworkDescription = serde_json::from_str(json)?;
        Self::from_description(desc)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn entry(&self, id: EntryId) -> Option<&RoadEntry> {
        self.entries.get(&id)
    }

    /// Adjacency of `id`; `None` when the entry has no node at all.
    pub fn node(&self, id: EntryId) -> Option<&RoadGraphNode> {
        self.nodes.get(&id)
    }

    pub fn intersection(&self, id: IntersectionId) -> Option<&Intersection> {
        self.intersections.get(&id)
    }

    /// Whether `id` is a connector of a stop-controlled intersection.
    pub fn is_stop_controlled(&self, id: EntryId) -> bool {
        self.entry(id)
            .and_then(|e| e.intersection)
            .and_then(|ix| self.intersection(ix))
            .map(|ix| ix.stop_sign)
            .unwrap_or(false)
    }

    /// The edge out of `from` whose own node leads on to `target`.
    ///
    /// Used to follow a fixed route of lane entries through the connectors
    /// that join them. A direct edge to `target` is taken as-is.
    pub fn find_connecting_edge(&self, from: EntryId, target: EntryId) -> Option<RoadGraphEdge> {
        let node = self.node(from)?;
        if let Some(direct) = node.edges.iter().find(|e| e.target == target) {
            return Some(*direct);
        }
        node.edges
            .iter()
            .find(|e| {
                self.node(e.target)
                    .map(|next| next.contains(target))
                    .unwrap_or(false)
            })
            .copied()
    }

    /// Uniform random successor of `from`.
    pub fn select_random_edge<R: Rng + ?Sized>(
        &self,
        from: EntryId,
        rng: &mut R,
    ) -> Option<RoadGraphEdge> {
        self.node(from)?.select_random(rng)
    }

    /// Plain (non-connector) lanes, sorted.
    pub fn lane_entries(&self) -> &[EntryId] {
        &self.lanes
    }

    /// Lanes with at least one waypoint within `radius` of `center` (ground plane).
    pub fn entries_within(&self, center: Vector3<f64>, radius: f64) -> Vec<EntryId> {
        self.lanes
            .iter()
            .copied()
            .filter(|id| {
                self.entries[id]
                    .waypoints
                    .iter()
                    .any(|wp| flat(wp - center).norm() <= radius)
            })
            .collect()
    }

    /// Connector ids of an intersection, sorted.
    pub fn connectors_of(&self, intersection: IntersectionId) -> &[EntryId] {
        self.connectors
            .get(&intersection)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn intersections(&self) -> impl Iterator<Item = &Intersection> {
        self.intersections.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RoadEntry> {
        self.entries.values()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn v(x: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, 0.0, z)
    }

    fn t_junction() -> NetworkDescription {
        let mut desc = NetworkDescription::new();
        let ix = desc.add_intersection(1000, true);
        desc.add_lane(EntryId::new(1, 0), &[v(0.0, 0.0), v(0.0, 50.0)]);
        desc.add_connector(EntryId::new(1000, 0), ix, &[v(0.0, 50.0), v(0.0, 60.0)]);
        desc.add_connector(EntryId::new(1000, 1), ix, &[v(0.0, 50.0), v(10.0, 60.0)]);
        desc.add_lane(EntryId::new(2, 0), &[v(0.0, 60.0), v(0.0, 100.0)]);
        desc.add_lane(EntryId::new(3, 0), &[v(10.0, 60.0), v(50.0, 60.0)]);
        desc.connect(EntryId::new(1, 0), EntryId::new(1000, 0));
        desc.connect(EntryId::new(1, 0), EntryId::new(1000, 1));
        desc.connect(EntryId::new(1000, 0), EntryId::new(2, 0));
        desc.connect(EntryId::new(1000, 1), EntryId::new(3, 0));
        desc
    }

    #[test]
    fn test_lookup_and_missing() {
        let net = RoadNetwork::from_description(t_junction()).unwrap();
        assert!(net.entry(EntryId::new(1, 0)).is_some());
        assert!(net.entry(EntryId::new(9, 9)).is_none());
        assert!(net.node(EntryId::new(9, 9)).is_none());
        assert!(net.is_stop_controlled(EntryId::new(1000, 1)));
        assert!(!net.is_stop_controlled(EntryId::new(1, 0)));
        assert_eq!(net.lane_entries().len(), 3);
        assert_eq!(net.connectors_of(IntersectionId(1000)).len(), 2);
    }

    #[test]
    fn test_find_connecting_edge() {
        let net = RoadNetwork::from_description(t_junction()).unwrap();
        let edge = net
            .find_connecting_edge(EntryId::new(1, 0), EntryId::new(3, 0))
            .unwrap();
        assert_eq!(edge.target, EntryId::new(1000, 1));

        let direct = net
            .find_connecting_edge(EntryId::new(1000, 0), EntryId::new(2, 0))
            .unwrap();
        assert_eq!(direct.target, EntryId::new(2, 0));

        assert!(net
            .find_connecting_edge(EntryId::new(2, 0), EntryId::new(3, 0))
            .is_none());
    }

    #[test]
    fn test_dead_end_has_no_edges() {
        let net = RoadNetwork::from_description(t_junction()).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        assert!(net.select_random_edge(EntryId::new(2, 0), &mut rng).is_none());
        let e = net.select_random_edge(EntryId::new(1, 0), &mut rng).unwrap();
        assert_eq!(e.target.major, 1000);
    }

    #[test]
    fn test_short_entry_rejected() {
        let mut desc = t_junction();
        desc.add_lane(EntryId::new(4, 0), &[v(0.0, 0.0)]);
        let net = RoadNetwork::from_description(desc).unwrap();
        assert!(net.entry(EntryId::new(4, 0)).is_none());
    }

    #[test]
    fn test_duplicate_entry_is_error() {
        let mut desc = t_junction();
        desc.add_lane(EntryId::new(1, 0), &[v(0.0, 0.0), v(1.0, 0.0)]);
        assert!(RoadNetwork::from_description(desc).is_err());
    }

    #[test]
    fn test_unknown_intersection_is_error() {
        let mut desc = NetworkDescription::new();
        desc.add_connector(EntryId::new(1000, 0), IntersectionId(7), &[v(0.0, 0.0), v(1.0, 0.0)]);
        assert!(matches!(
            RoadNetwork::from_description(desc),
            Err(CoreError::NetworkError(_))
        ));
    }

    #[test]
    fn test_interpolated_position_by_arc_length() {
        let net = RoadNetwork::from_description(t_junction()).unwrap();
        let mut desc = NetworkDescription::new();
        desc.add_lane(EntryId::new(5, 0), &[v(0.0, 0.0), v(0.0, 10.0), v(30.0, 10.0)]);
        let bent = RoadNetwork::from_description(desc).unwrap();
        let entry = bent.entry(EntryId::new(5, 0)).unwrap();
        assert_relative_eq!(entry.total_length(), 40.0);

        let (idx, p) = entry.interpolated_position(0.5);
        assert_eq!(idx, 2);
        assert_relative_eq!(p, v(10.0, 10.0), epsilon = 1e-9);

        let (idx, p) = entry.interpolated_position(0.1);
        assert_eq!(idx, 1);
        assert_relative_eq!(p, v(0.0, 4.0), epsilon = 1e-9);

        let straight = net.entry(EntryId::new(1, 0)).unwrap();
        let (idx, p) = straight.interpolated_position(1.0);
        assert_eq!(idx, 1);
        assert_relative_eq!(p, v(0.0, 50.0), epsilon = 1e-9);
    }

    #[test]
    fn test_json_round_trip_load() {
        let json = serde_json::to_string(&t_junction()).unwrap();
        let net = RoadNetwork::from_json_str(&json).unwrap();
        assert_eq!(net.entry_count(), 5);
    }

    #[test]
    fn test_entries_within() {
        let net = RoadNetwork::from_description(t_junction()).unwrap();
        let near = net.entries_within(v(45.0, 60.0), 10.0);
        assert_eq!(near, vec![EntryId::new(3, 0)]);
    }

    #[test]
    fn test_nearest_forward_waypoint() {
        let mut desc = NetworkDescription::new();
        desc.add_lane(
            EntryId::new(1, 0),
            &[v(0.0, 0.0), v(0.0, 10.0), v(0.0, 20.0), v(0.0, 30.0)],
        );
        let net = RoadNetwork::from_description(desc).unwrap();
        let entry = net.entry(EntryId::new(1, 0)).unwrap();
        assert_eq!(entry.nearest_forward_waypoint(v(0.0, 12.0), Vector3::z(), 0), 2);
        assert_eq!(entry.first_forward_waypoint(v(0.0, 35.0), Vector3::z(), 0), None);
    }
}
