//! trafnet Environment Abstraction Layer
//!
//! This crate provides the seams between the traffic engine and the world it
//! drives. The engine never owns geometry, bodies, lights or cameras; it
//! consumes them through traits:
//!
//! - **World queries**: ray casts, capsule overlaps, occupancy tests, body poses
//! - **Motion**: steering/speed intents handed to an integrator
//! - **Signals**: read-only traffic light state
//! - **Observers**: distance/visibility for LOD and silent respawns
//! - **Time**: the authoritative clock (`TrafficContext`)
//!
//! # Example
//!
//! ```ignore
//! use trafnet_env::{TrafficContext, TokioContext};
//!
//! async fn pace<Ctx: TrafficContext>(ctx: &Ctx) {
//!     loop {
//!         let now = ctx.now_secs();
//!         engine.tick(now, dt, &services);
//!         ctx.sleep(Duration::from_millis(33)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod tokio_impl;
mod types;
mod world;

pub use context::TrafficContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use types::{EntryId, IntersectionId, LayerMask, LightId, LightState, Pose, VehicleUid};
pub use world::{
    ColliderKind, Hit, MotionCommand, MotionIntegrator, ObserverView, PropTag, SignalState,
    WorldQuery,
};
