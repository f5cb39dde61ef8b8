// src/sim/model.rs
//! Domain data shared by sensors, services and reports
//!
//! Field names on the wire follow the fixture files (`detectedObjects`,
//! `cloudPoints`).

use serde::{Deserialize, Serialize};

/// 2-D point in the robot's or the map's frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudPoint {
    pub x: f64,
    pub y: f64,
}

impl CloudPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: String,
    pub description: String,
}

impl DetectedObject {
    /// Camera fault marker
    pub fn is_error(&self) -> bool {
        self.id == ERROR_ID
    }
}

/// Object id that marks a faulty reading in camera and LiDAR data
pub const ERROR_ID: &str = "ERROR";

/// One camera frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedDetectedObjects {
    pub time: u32,
    #[serde(rename = "detectedObjects")]
    pub detected_objects: Vec<DetectedObject>,
}

impl StampedDetectedObjects {
    pub fn error(&self) -> Option<&DetectedObject> {
        self.detected_objects.iter().find(|o| o.is_error())
    }
}

/// LiDAR reading of one object at one time
///
/// Raw points may carry a third coordinate; only x and y are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedCloudPoints {
    pub id: String,
    pub time: u32,
    #[serde(rename = "cloudPoints", default)]
    pub cloud_points: Vec<Vec<f64>>,
}

impl StampedCloudPoints {
    pub fn is_error(&self) -> bool {
        self.id == ERROR_ID
    }

    pub fn points(&self) -> Vec<CloudPoint> {
        self.cloud_points
            .iter()
            .filter(|p| p.len() >= 2)
            .map(|p| CloudPoint::new(p[0], p[1]))
            .collect()
    }
}

/// Detected object enriched with LiDAR coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: String,
    pub time: u32,
    pub description: String,
    pub coordinates: Vec<CloudPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub time: u32,
    pub x: f64,
    pub y: f64,
    /// Heading in degrees
    pub yaw: f64,
}

/// Object placed on the global map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandMark {
    pub id: String,
    pub description: String,
    pub coordinates: Vec<CloudPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorStatus {
    #[default]
    Up,
    Down,
    Error,
}
