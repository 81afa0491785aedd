//! Opportunistic and forced lane changes.
//!
//! A shift picks a parallel, same-direction lane (`sub ± 1` on the same
//! major id), steers at a merge point a little ahead on that lane, and either
//! completes once the merge point is behind the nose or gives up after a
//! timeout and returns to the original lane.

use crate::body::{BodyFrame, SnapshotMap};
use crate::config::LaneShiftConfig;
use crate::geometry::{cross_y, flat_distance, normalize_or_zero};
use crate::road_network::{RoadEntry, RoadNetwork};
use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trafnet_env::{EntryId, VehicleUid, WorldQuery};

/// Why a shift is being attempted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShiftTrigger {
    /// The per-second random roll fired
    Random,
    /// Externally forced onto any candidate lane
    Forced,
    /// Merge into the lane nearest to a point (e.g. to cut in front of a player)
    Toward(Vector3<f64>),
}

/// An ongoing lane change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneShift {
    pub from_entry: EntryId,
    pub target_entry: EntryId,
    pub merge_point: Vector3<f64>,
    pub started_at: f64,
    pub left_signal: bool,
    pub right_signal: bool,
}

/// Result of checking an ongoing shift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShiftProgress {
    Continuing,
    /// Timed out; resume the original entry at `index`
    Aborted { index: usize },
    /// Arrived; continue on `entry` at `index`
    Completed { entry: EntryId, index: usize },
}

/// Inputs for starting a shift.
#[derive(Debug, Clone, Copy)]
pub struct ShiftContext<'a> {
    pub uid: VehicleUid,
    pub entry: &'a RoadEntry,
    pub frame: &'a BodyFrame,
    pub large_vehicle: bool,
    pub now: f64,
}

/// Whether the geometry allows a shift to start on this entry.
///
/// Speed and trigger checks are the caller's; this checks lane type,
/// distance to the end and that the nose is past the first two waypoints.
pub fn position_allows_shift(entry: &RoadEntry, frame: &BodyFrame, config: &LaneShiftConfig) -> bool {
    if entry.is_intersection() {
        return false;
    }
    let dist_to_end = (frame.nose - entry.last()).norm();
    if dist_to_end <= config.min_distance_to_end {
        return false;
    }
    let ahead = |p: Vector3<f64>| frame.forward.dot(&normalize_or_zero(p - frame.nose)) > 0.0;
    !(ahead(entry.waypoints[0]) && ahead(entry.waypoints[1]))
}

/// Same-direction neighbour lanes of `entry`.
pub fn candidate_lanes(network: &RoadNetwork, entry: &RoadEntry) -> Vec<EntryId> {
    let span = entry.span();
    [-1i32, 1]
        .iter()
        .filter_map(|offset| entry.id.sibling(*offset))
        .filter(|id| {
            network
                .entry(*id)
                .map(|other| !other.is_intersection() && span.dot(&other.span()) > 0.0)
                .unwrap_or(false)
        })
        .collect()
}

/// Tries to start a lane change. Returns `None` when no lane qualifies.
pub fn try_start<R: Rng + ?Sized>(
    network: &RoadNetwork,
    ctx: &ShiftContext<'_>,
    trigger: ShiftTrigger,
    world: &dyn WorldQuery,
    agents: &SnapshotMap,
    config: &LaneShiftConfig,
    rng: &mut R,
) -> Option<LaneShift> {
    let candidates = candidate_lanes(network, ctx.entry);
    if candidates.is_empty() {
        return None;
    }
    let frame = ctx.frame;

    let target = match trigger {
        ShiftTrigger::Toward(point) => {
            if (frame.nose - point).norm() <= config.min_merge_request_distance {
                return None;
            }
            candidates
                .iter()
                .copied()
                .filter_map(|id| network.entry(id).map(|e| (id, (e.centroid() - point).norm())))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id)?
        }
        ShiftTrigger::Random | ShiftTrigger::Forced => {
            let id = candidates[rng.gen_range(0..candidates.len())];
            let radius = config.scan_radius_range.sample(rng);
            let occupied = world
                .vehicles_within(frame.nose, radius)
                .into_iter()
                .filter(|other| *other != ctx.uid)
                .filter_map(|other| agents.get(&other))
                .any(|other| {
                    other.entry == id
                        && frame
                            .forward
                            .dot(&normalize_or_zero(other.frame().nose - frame.nose))
                            < config.beside_dot_threshold
                });
            if occupied {
                debug!("Lane shift {} -> {} vetoed: neighbour alongside", ctx.entry.id, id);
                return None;
            }
            id
        }
    };

    if !network.node(target).map(|n| n.has_edges()).unwrap_or(false) {
        return None;
    }
    let lane = network.entry(target)?;

    let (closest, direction) = lane.nearest_segment_point(frame.nose, frame.forward);
    let mut advance = config.advance_range.sample(rng);
    if ctx.large_vehicle {
        advance *= config.large_vehicle_advance_scale;
    }
    let merge_point = closest + direction * advance;

    let left = cross_y(&frame.forward, &(merge_point - frame.nose)) < 0.0;
    Some(LaneShift {
        from_entry: ctx.entry.id,
        target_entry: target,
        merge_point,
        started_at: ctx.now,
        left_signal: left,
        right_signal: !left,
    })
}

/// Checks an ongoing shift for timeout or arrival.
pub fn progress(
    shift: &LaneShift,
    network: &RoadNetwork,
    current: &RoadEntry,
    current_index: usize,
    frame: &BodyFrame,
    now: f64,
    config: &LaneShiftConfig,
) -> ShiftProgress {
    if now - shift.started_at > config.timeout_secs {
        let index = current
            .first_forward_waypoint(frame.nose, frame.forward, current_index)
            .unwrap_or(current.waypoints.len() - 1);
        return ShiftProgress::Aborted { index };
    }

    let to_merge = shift.merge_point - frame.nose;
    if flat_distance(frame.nose, shift.merge_point) < config.merge_reached_distance
        && frame.forward.dot(&normalize_or_zero(to_merge)) < 0.0
    {
        if let Some(lane) = network.entry(shift.target_entry) {
            let index = lane.nearest_forward_waypoint(frame.nose, frame.forward, 0);
            return ShiftProgress::Completed {
                entry: shift.target_entry,
                index,
            };
        }
        // Target lane vanished; fall back to the original entry
        let index = current
            .first_forward_waypoint(frame.nose, frame.forward, current_index)
            .unwrap_or(current.waypoints.len() - 1);
        return ShiftProgress::Aborted { index };
    }

    ShiftProgress::Continuing
}
