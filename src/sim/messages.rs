// src/sim/messages.rs
//! Messages exchanged by the simulation services

use crate::bus::{Notification, Request};
use crate::sim::model::{DetectedObject, Pose, StampedDetectedObjects, TrackedObject};

/// Name of the clock agent
pub const TIME_SERVICE: &str = "TimeService";

/// Name of the mapping agent
pub const FUSION_SLAM: &str = "FusionSlam";

/// Name of the pose agent
pub const POSE_SERVICE: &str = "PoseService";

/// Clock tick, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub tick: u32,
}

impl Notification for Tick {}

/// `sender` has stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminated {
    pub sender: String,
}

impl Terminated {
    pub fn from(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }

    pub fn is_from(&self, name: &str) -> bool {
        self.sender == name
    }
}

impl Notification for Terminated {}

/// `sender` hit a sensor fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crashed {
    pub sender: String,
    pub description: String,
}

impl Notification for Crashed {}

/// Camera detections due for LiDAR tracking
#[derive(Debug, Clone)]
pub struct DetectObjects {
    pub time: u32,
    pub objects: Vec<DetectedObject>,
}

impl From<StampedDetectedObjects> for DetectObjects {
    fn from(frame: StampedDetectedObjects) -> Self {
        Self {
            time: frame.time,
            objects: frame.detected_objects,
        }
    }
}

impl Request for DetectObjects {
    type Reply = bool;
}

/// LiDAR-tracked objects for the map
#[derive(Debug, Clone)]
pub struct TrackedObjects {
    pub time: u32,
    pub objects: Vec<TrackedObject>,
}

impl Request for TrackedObjects {
    type Reply = bool;
}

/// Robot pose at one tick
#[derive(Debug, Clone, Copy)]
pub struct PoseUpdate {
    pub pose: Pose,
}

impl Request for PoseUpdate {
    type Reply = bool;
}
