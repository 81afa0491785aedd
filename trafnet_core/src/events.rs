//! Domain events emitted by the engine.
//!
//! Events are returned from every tick (and logged through `tracing`), so a
//! host can drive effects such as smoke, hazard lights or telemetry without
//! the engine knowing about them.

use serde::{Deserialize, Serialize};
use std::fmt;
use trafnet_env::{EntryId, VehicleUid};

/// Why an agent left the active set or was repositioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecycleReason {
    /// Near-zero displacement for too long
    Stuck,
    /// Current waypoint never reached for too long
    Unreachable,
    /// Not seen by any observer for too long
    Invisible,
    /// The graph node has no outgoing edge
    DeadEnd,
    /// An entry or node lookup failed
    MissingEntry,
    /// The fixed route cannot be followed from here
    InvalidRoute,
    /// Removed on request (kill-all, density change)
    Requested,
}

impl RecycleReason {
    /// Topology faults despawn the agent; health faults respawn it in place.
    pub fn is_topology_fault(&self) -> bool {
        matches!(
            self,
            RecycleReason::DeadEnd | RecycleReason::MissingEntry | RecycleReason::InvalidRoute
        )
    }
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecycleReason::Stuck => "stuck",
            RecycleReason::Unreachable => "unreachable",
            RecycleReason::Invisible => "invisible",
            RecycleReason::DeadEnd => "dead end",
            RecycleReason::MissingEntry => "missing entry",
            RecycleReason::InvalidRoute => "invalid route",
            RecycleReason::Requested => "requested",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrafficEvent {
    Spawned {
        uid: VehicleUid,
        entry: EntryId,
    },
    Respawned {
        uid: VehicleUid,
        entry: EntryId,
        reason: RecycleReason,
        silent: bool,
    },
    Despawned {
        uid: VehicleUid,
        reason: RecycleReason,
    },
    SpawnFailed {
        attempts: usize,
    },
    EnteredEntry {
        uid: VehicleUid,
        entry: EntryId,
    },
    StopSignCleared {
        uid: VehicleUid,
        entry: EntryId,
    },
    LaneShiftStarted {
        uid: VehicleUid,
        from: EntryId,
        to: EntryId,
    },
    LaneShiftCompleted {
        uid: VehicleUid,
        entry: EntryId,
    },
    LaneShiftAborted {
        uid: VehicleUid,
        entry: EntryId,
    },
    EmergencyBrake {
        uid: VehicleUid,
        until: f64,
    },
    Accident {
        uid: VehicleUid,
    },
    /// Visible engine failure (smoke) after a collision or a failed force-collide
    Breakdown {
        uid: VehicleUid,
    },
}

impl TrafficEvent {
    pub fn uid(&self) -> Option<VehicleUid> {
        match self {
            TrafficEvent::Spawned { uid, .. }
            | TrafficEvent::Respawned { uid, .. }
            | TrafficEvent::Despawned { uid, .. }
            | TrafficEvent::EnteredEntry { uid, .. }
            | TrafficEvent::StopSignCleared { uid, .. }
            | TrafficEvent::LaneShiftStarted { uid, .. }
            | TrafficEvent::LaneShiftCompleted { uid, .. }
            | TrafficEvent::LaneShiftAborted { uid, .. }
            | TrafficEvent::EmergencyBrake { uid, .. }
            | TrafficEvent::Accident { uid }
            | TrafficEvent::Breakdown { uid } => Some(*uid),
            TrafficEvent::SpawnFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_faults() {
        assert!(RecycleReason::DeadEnd.is_topology_fault());
        assert!(RecycleReason::InvalidRoute.is_topology_fault());
        assert!(!RecycleReason::Stuck.is_topology_fault());
        assert!(!RecycleReason::Invisible.is_topology_fault());
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = TrafficEvent::Despawned {
            uid: VehicleUid::from_seed(1),
            reason: RecycleReason::DeadEnd,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "despawned");
        assert_eq!(json["reason"], "dead_end");
    }
}
