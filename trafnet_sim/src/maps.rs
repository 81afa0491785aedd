//! Built-in road networks for scenarios and the CLI.
//!
//! Traffic keeps right: a lane heading along `d` sits `LANE_OFFSET` to the
//! right of the street centre line (`y × d`).

use crate::error::SimResult;
use crate::signals::{LightCycle, LightPlan, SignalController};
use nalgebra::Vector3;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use trafnet_core::{NetworkDescription, RoadNetwork};
use trafnet_env::{EntryId, LightId};

pub const LANE_OFFSET: f64 = 2.0;
pub const LANE_WIDTH: f64 = 4.0;

/// Distance from a grid node to where its lanes end
const SETBACK: f64 = 10.0;

fn v(x: f64, z: f64) -> Vector3<f64> {
    Vector3::new(x, 0.0, z)
}

/// A network plus the light plans that go with it.
#[derive(Debug, Clone)]
pub struct SimMap {
    pub name: String,
    pub description: NetworkDescription,
    pub lights: Vec<(LightId, LightPlan)>,
}

impl SimMap {
    pub fn new(name: &str, description: NetworkDescription) -> Self {
        Self {
            name: name.to_string(),
            description,
            lights: Vec::new(),
        }
    }

    /// Loads a JSON network. Every referenced light gets a default cycle,
    /// odd ids running the crossing phase.
    pub fn from_json_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let description: NetworkDescription = serde_json::from_str(&json)?;
        let ids: BTreeSet<u32> = description
            .entries
            .iter()
            .filter_map(|e| e.light.map(|l| l.0))
            .collect();
        let base = LightCycle::default();
        let lights = ids
            .into_iter()
            .map(|id| {
                let cycle = if id % 2 == 0 { base } else { base.crossing() };
                (LightId(id), LightPlan::Cycle(cycle))
            })
            .collect();
        Ok(Self {
            name: path.as_ref().display().to_string(),
            description,
            lights,
        })
    }

    pub fn build(self) -> SimResult<(Arc<RoadNetwork>, SignalController)> {
        let network = RoadNetwork::from_description(self.description)?;
        let mut signals = SignalController::new();
        for (light, plan) in self.lights {
            signals.set_plan(light, plan);
        }
        Ok((Arc::new(network), signals))
    }
}

/// One northbound lane `1_0` of `length` with two waypoints.
pub fn straight_road(length: f64) -> SimMap {
    let mut desc = NetworkDescription::new();
    desc.add_lane(EntryId::new(1, 0), &[v(0.0, 0.0), v(0.0, length)]);
    SimMap::new("straight_road", desc)
}

/// A lane `1_0` whose graph node has no edges.
pub fn dead_end(length: f64) -> SimMap {
    let mut desc = NetworkDescription::new();
    desc.add_lane(
        EntryId::new(1, 0),
        &[v(0.0, 0.0), v(0.0, length * 0.5), v(0.0, length)],
    );
    SimMap::new("dead_end", desc)
}

/// Two parallel northbound lanes `20_0` (x = 2) and `20_1` (x = 6), both
/// running into the single exit lane `21_0`.
pub fn two_lane_road(length: f64) -> SimMap {
    let mut desc = NetworkDescription::new();
    let exit = EntryId::new(21, 0);
    desc.add_lane(exit, &[v(LANE_OFFSET, length), v(LANE_OFFSET, length + 200.0)]);
    for (sub, x) in [(0, LANE_OFFSET), (1, LANE_OFFSET + LANE_WIDTH)] {
        let lane = EntryId::new(20, sub);
        desc.add_lane(lane, &[v(x, 0.0), v(x, length * 0.5), v(x, length)]);
        desc.connect(lane, exit);
    }
    SimMap::new("two_lane_road", desc)
}

/// Box 500 with approaches from the south (`1_0`), west (`2_0`) and east
/// (`3_0`), each going straight across through `500_0..=500_2`.
pub fn stop_crossing(approach: f64, exit: f64) -> SimMap {
    crossing("stop_crossing", true, approach, exit)
}

/// Same geometry as [`stop_crossing`] but signalised: `LightId(1)` for the
/// north-south axis, `LightId(2)` for east-west, both pinned green.
pub fn signal_crossing(approach: f64, exit: f64) -> SimMap {
    let mut map = crossing("signal_crossing", false, approach, exit);
    for entry in map.description.entries.iter_mut() {
        entry.light = match (entry.id.major, entry.id.sub) {
            (500, 0) => Some(LightId(1)),
            (500, _) => Some(LightId(2)),
            _ => None,
        };
    }
    map.lights = vec![
        (LightId(1), LightPlan::Manual(trafnet_env::LightState::Green)),
        (LightId(2), LightPlan::Manual(trafnet_env::LightState::Green)),
    ];
    map
}

fn crossing(name: &str, stop_sign: bool, approach: f64, exit: f64) -> SimMap {
    let mut desc = NetworkDescription::new();
    let ix = desc.add_intersection(500, stop_sign);
    let o = LANE_OFFSET;
    let s = SETBACK;
    let legs = [
        // (approach, connector sub, exit, start, stop line, far side, end)
        (1, 0, 4, v(o, -approach), v(o, -s), v(o, s), v(o, exit)),
        (2, 1, 5, v(-approach, -o), v(-s, -o), v(s, -o), v(exit, -o)),
        (3, 2, 6, v(approach, o), v(s, o), v(-s, o), v(-exit, o)),
    ];
    for (lane, sub, out, start, stop_line, far, end) in legs {
        let lane = EntryId::new(lane, 0);
        let connector = EntryId::new(500, sub);
        let out = EntryId::new(out, 0);
        desc.add_lane(lane, &[start, (start + stop_line) * 0.5, stop_line]);
        desc.add_connector(connector, ix, &[stop_line, far]);
        desc.add_lane(out, &[far, (far + end) * 0.5, end]);
        desc.connect(lane, connector);
        desc.connect(connector, out);
    }
    SimMap::new(name, desc)
}

/// A major road west to east through box 600 and a side road from the south
/// turning right onto it. The side connector `600_1` gives way to `600_0`.
pub fn give_way_junction(length: f64) -> SimMap {
    let mut desc = NetworkDescription::new();
    let ix = desc.add_intersection(600, false);
    let o = LANE_OFFSET;
    let s = SETBACK;

    let main_in = EntryId::new(10, 0);
    let main_out = EntryId::new(11, 0);
    let side_in = EntryId::new(12, 0);
    let through = EntryId::new(600, 0);
    let merge = EntryId::new(600, 1);

    desc.add_lane(main_in, &[v(-length, -o), v(-length * 0.5, -o), v(-s, -o)]);
    desc.add_lane(main_out, &[v(s, -o), v(length * 5.0, -o), v(length * 10.0, -o)]);
    desc.add_lane(side_in, &[v(o, -length), v(o, -length * 0.5), v(o, -s)]);
    desc.add_connector(through, ix, &[v(-s, -o), v(s, -o)]);
    desc.add_connector(merge, ix, &[v(o, -s), v(o, -o), v(s, -o)])
        .give_way_to = vec![through];

    desc.connect(main_in, through);
    desc.connect(side_in, merge);
    desc.connect(through, main_out);
    desc.connect(merge, main_out);
    SimMap::new("give_way_junction", desc)
}

#[derive(Debug, Clone, Copy)]
struct Street {
    id: EntryId,
    from: (usize, usize),
    to: (usize, usize),
    start: Vector3<f64>,
    end: Vector3<f64>,
    dir: Vector3<f64>,
}

/// A closed `size` x `size` street grid, one lane each way.
///
/// Four-way nodes are signalised (`LightId(2 * node)` for north-south,
/// `LightId(2 * node + 1)` for east-west), the rest are stop-controlled.
/// U-turns are not connected, so every lane end has a way out.
pub fn grid_town(size: usize, spacing: f64) -> SimMap {
    let size = size.max(2);
    let node = |(i, j): (usize, usize)| v(i as f64 * spacing, j as f64 * spacing);
    let mut desc = NetworkDescription::new();

    let mut streets = Vec::new();
    let mut major = 1;
    for i in 0..size {
        for j in 0..size {
            let neighbours = [
                (i + 1 < size).then(|| (i + 1, j)),
                i.checked_sub(1).map(|ni| (ni, j)),
                (j + 1 < size).then(|| (i, j + 1)),
                j.checked_sub(1).map(|nj| (i, nj)),
            ];
            for to in neighbours.into_iter().flatten() {
                let (a, b) = (node((i, j)), node(to));
                let dir = (b - a).normalize();
                let right = Vector3::y().cross(&dir);
                let start = a + dir * SETBACK + right * LANE_OFFSET;
                let end = b - dir * SETBACK + right * LANE_OFFSET;
                let id = EntryId::new(major, 0);
                major += 1;
                desc.add_lane(id, &[start, (start + end) * 0.5, end]);
                streets.push(Street {
                    id,
                    from: (i, j),
                    to,
                    start,
                    end,
                    dir,
                });
            }
        }
    }

    let base = LightCycle::default();
    let mut lights = Vec::new();
    for i in 0..size {
        for j in 0..size {
            let index = (i * size + j) as u32;
            let incoming: Vec<&Street> = streets.iter().filter(|s| s.to == (i, j)).collect();
            let outgoing: Vec<&Street> = streets.iter().filter(|s| s.from == (i, j)).collect();
            let signalised = outgoing.len() == 4;
            let major = 10_000 + index;
            let ix = desc.add_intersection(major, !signalised);

            let mut sub = 0;
            for inc in &incoming {
                for out in outgoing.iter().filter(|out| out.to != inc.from) {
                    let id = EntryId::new(major, sub);
                    sub += 1;
                    let waypoints = if inc.dir.dot(&out.dir) > 0.9 {
                        vec![inc.end, out.start]
                    } else {
                        let corner = inc.end + inc.dir * (out.start - inc.end).dot(&inc.dir);
                        vec![inc.end, corner, out.start]
                    };
                    let connector = desc.add_connector(id, ix, &waypoints);
                    if signalised {
                        let axis = u32::from(inc.dir.x.abs() > 0.5);
                        connector.light = Some(LightId(index * 2 + axis));
                    }
                    desc.connect(inc.id, id);
                    desc.connect(id, out.id);
                }
            }

            if signalised {
                // Stagger neighbouring nodes so platoons don't all stop together
                let cycle = LightCycle {
                    offset: index as f64 * 7.0,
                    ..base
                };
                lights.push((LightId(index * 2), LightPlan::Cycle(cycle)));
                lights.push((LightId(index * 2 + 1), LightPlan::Cycle(cycle.crossing())));
            }
        }
    }

    SimMap {
        name: format!("grid_town_{}x{}", size, size),
        description: desc,
        lights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_has_no_dead_ends() {
        let (network, signals) = grid_town(3, 120.0).build().unwrap();
        // 3x3 grid: 12 streets, two lanes each
        assert_eq!(network.lane_entries().len(), 24);
        for entry in network.entries() {
            let node = network.node(entry.id).unwrap();
            assert!(node.has_edges(), "{} is a dead end", entry.id);
        }
        // Only the centre node has four neighbours
        assert_eq!(signals.light_count(), 2);
        assert!(!network.is_stop_controlled(EntryId::new(10_004, 0)));
        assert!(network.is_stop_controlled(EntryId::new(10_000, 0)));
    }

    #[test]
    fn test_grid_lanes_keep_right() {
        let (network, _) = grid_town(2, 100.0).build().unwrap();
        for id in network.lane_entries() {
            let entry = network.entry(*id).unwrap();
            let dir = entry.span().normalize();
            // The street centre line is on the lane's left
            let mid = entry.centroid();
            let on_axis = if dir.x.abs() > 0.5 { mid.z } else { mid.x };
            let rounded = (on_axis / 100.0).round() * 100.0;
            let offset = Vector3::new(mid.x, 0.0, mid.z)
                - if dir.x.abs() > 0.5 { v(mid.x, rounded) } else { v(rounded, mid.z) };
            let right = Vector3::y().cross(&dir);
            assert!((offset.dot(&right) - LANE_OFFSET).abs() < 1e-9, "{}", id);
        }
    }

    #[test]
    fn test_two_lane_road_lanes_have_a_way_out() {
        let (network, _) = two_lane_road(500.0).build().unwrap();
        for sub in 0..2 {
            let node = network.node(EntryId::new(20, sub)).unwrap();
            assert!(node.has_edges(), "20_{} is a dead end", sub);
        }
        let lane = network.entry(EntryId::new(20, 0)).unwrap();
        assert_eq!(
            trafnet_core::lane_shift::candidate_lanes(&network, lane),
            vec![EntryId::new(20, 1)]
        );
    }

    #[test]
    fn test_give_way_and_crossings_build() {
        let (network, _) = give_way_junction(200.0).build().unwrap();
        let merge = network.entry(EntryId::new(600, 1)).unwrap();
        assert_eq!(merge.give_way_to, vec![EntryId::new(600, 0)]);

        let (network, signals) = signal_crossing(100.0, 500.0).build().unwrap();
        assert_eq!(network.entry(EntryId::new(500, 0)).unwrap().light, Some(LightId(1)));
        assert_eq!(network.entry(EntryId::new(500, 2)).unwrap().light, Some(LightId(2)));
        assert_eq!(signals.light_count(), 2);

        let (network, _) = stop_crossing(100.0, 500.0).build().unwrap();
        assert!(network.is_stop_controlled(EntryId::new(500, 1)));
        assert_eq!(network.lane_entries().len(), 6);
    }

    #[test]
    fn test_json_network_gets_light_plans() {
        let map = signal_crossing(100.0, 500.0);
        let path = std::env::temp_dir().join("trafnet_sim_maps_test.json");
        std::fs::write(&path, serde_json::to_string(&map.description).unwrap()).unwrap();
        let loaded = SimMap::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.lights.len(), 2);
        assert!(loaded.build().is_ok());
    }
}
