//! trafnet Deterministic Simulation Harness
//!
//! A controlled environment in which the traffic engine runs against a
//! ground-truth world, reproducibly from a single seed.
//!
//! # Core Principle
//!
//! Every collaborator the engine reads through `trafnet_env` is provided
//! here and owned by one loop:
//! - **Time**: virtual clock advanced once per tick
//! - **World**: oriented boxes for vehicles, props and the player (the `Oracle`)
//! - **Signals**: fixed-time or pinned traffic lights
//! - **Randomness**: all entropy derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                     SimWorld                       │
//! │  SimContext (virtual clock)                        │
//! │       │                                            │
//! │  ┌────▼──────────┐ intents  ┌──────────────────┐   │
//! │  │ TrafficEngine │─────────►│      Oracle      │   │
//! │  │  (trafnet_core)│◄─────────│ (ground truth)   │   │
//! │  └───────────────┘ queries  └──────────────────┘   │
//! │       ▲                                            │
//! │  SignalController                                  │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trafnet_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 40)
//!     .with_duration(30.0)
//!     .run(ScenarioId::CityStress);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
pub mod maps;
mod oracle;
mod runner;
pub mod scenarios;
mod signals;
mod world;

pub use context::SimContext;
pub use error::{SimError, SimResult};
pub use exporter::{AgentFrame, SimExport, SimFrame};
pub use maps::SimMap;
pub use oracle::{Body, Contact, Obb, Observer, Oracle, Player, Prop};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, Session};
pub use signals::{LightCycle, LightPlan, SignalController};
pub use world::{SimConfig, SimWorld, TickReport};
