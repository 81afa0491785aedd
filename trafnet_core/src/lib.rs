//! trafnet Core - Background Traffic Engine
//!
//! A population of autonomous vehicles driving a directed lane graph:
//! 1. **Navigation**: waypoint following, turn selection and fixed routes over a
//!    [`RoadNetwork`] of lanes and intersection connectors
//! 2. **Right of way**: traffic lights, give-way rules and a FIFO queue for
//!    stop-sign boxes, arbitrated by the shared [`IntersectionArbiter`]
//! 3. **Perception**: forward and side probes with avoidance and emergency braking
//! 4. **Lifecycle**: density top-up, silent respawns of stuck or hidden agents,
//!    and distance-based level of detail
//!
//! The engine never owns geometry or bodies. Everything physical is read
//! through the traits of `trafnet_env` and every motion decision is returned
//! as an intent from [`TrafficEngine::tick`].

pub mod arbiter;
pub mod body;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod geometry;
pub mod lane_shift;
pub mod lod;
pub mod motor;
pub mod perception;
pub mod road_network;
pub mod spawner;

// Re-export key types for convenience
pub use arbiter::{ArbiterPhase, IntersectionArbiter};
pub use body::{AgentSnapshot, VehicleProfile};
pub use config::{DensityPreset, TrafficConfig};
pub use engine::{MotionIntent, Placement, RenderState, Services, TickOutput, TrafficEngine};
pub use error::{CoreError, CoreResult};
pub use events::{RecycleReason, TrafficEvent};
pub use lane_shift::ShiftTrigger;
pub use lod::OptimizationMode;
pub use motor::{Agent, MotorState};
pub use road_network::{NetworkDescription, RoadEntry, RoadNetwork};
