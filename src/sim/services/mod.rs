// src/sim/services/mod.rs
//! Simulation agents

pub mod camera;
pub mod clock;
pub mod fusion;
pub mod lidar;
pub mod pose;

pub use camera::CameraService;
pub use clock::Clock;
pub use fusion::FusionSlamService;
pub use lidar::LiDarService;
pub use pose::PoseService;
