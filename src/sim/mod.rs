// src/sim/mod.rs
//! Perception and mapping simulation built on the bus
//!
//! A clock drives cameras, LiDAR workers and a pose source; a fusion
//! service turns their output into a landmark map and writes the run
//! report.
//!
//! # Message flow
//!
//! ```text
//!  TimeService ──Tick──▶ Camera n ──DetectObjects──▶ LiDar n ──TrackedObjects──┐
//!       │                                                                      ▼
//!       └──────Tick──▶ PoseService ─────────PoseUpdate─────────────────▶ FusionSlam
//!
//!  Terminated / Crashed fan out to every service and decide when the run ends
//! ```

pub mod fixtures;
pub mod messages;
pub mod model;
pub mod report;
pub mod runner;
pub mod sensors;
pub mod services;
pub mod slam;
pub mod state;

// Re-export commonly used types
pub use fixtures::Fixture;
pub use runner::{Simulation, SimulationRun, SimulationSummary};
pub use state::SimulationState;
