// src/sim/sensors.rs
//! Sensor data sources replayed by the services

use crate::sim::model::{Pose, StampedCloudPoints, StampedDetectedObjects};

/// Camera with its recorded frames
#[derive(Debug, Clone)]
pub struct Camera {
    pub id: u32,
    /// Ticks between capturing a frame and publishing it
    pub frequency: u32,
    frames: Vec<StampedDetectedObjects>,
}

impl Camera {
    pub fn new(id: u32, frequency: u32, mut frames: Vec<StampedDetectedObjects>) -> Self {
        frames.sort_by_key(|f| f.time);
        Self {
            id,
            frequency,
            frames,
        }
    }

    /// Agent name, also used as the sensor name in reports
    pub fn name(&self) -> String {
        format!("Camera {}", self.id)
    }

    pub fn frame_at(&self, time: u32) -> Option<&StampedDetectedObjects> {
        self.frames.iter().find(|f| f.time == time)
    }

    pub fn has_frames_after(&self, time: u32) -> bool {
        self.frames.last().is_some_and(|f| f.time > time)
    }

    pub fn frames(&self) -> &[StampedDetectedObjects] {
        &self.frames
    }
}

/// Recorded LiDAR readings shared by every worker
#[derive(Debug, Clone, Default)]
pub struct LiDarDatabase {
    readings: Vec<StampedCloudPoints>,
}

impl LiDarDatabase {
    pub fn new(readings: Vec<StampedCloudPoints>) -> Self {
        Self { readings }
    }

    /// Reading of object `id` at `time`
    pub fn lookup(&self, id: &str, time: u32) -> Option<&StampedCloudPoints> {
        self.readings.iter().find(|r| r.id == id && r.time == time)
    }

    /// A fault entry stamped `time`
    pub fn error_at(&self, time: u32) -> Option<&StampedCloudPoints> {
        self.readings.iter().find(|r| r.is_error() && r.time == time)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Recorded GPS/IMU poses
#[derive(Debug, Clone, Default)]
pub struct PoseTrack {
    poses: Vec<Pose>,
}

impl PoseTrack {
    pub fn new(mut poses: Vec<Pose>) -> Self {
        poses.sort_by_key(|p| p.time);
        Self { poses }
    }

    pub fn pose_at(&self, time: u32) -> Option<Pose> {
        self.poses.iter().find(|p| p.time == time).copied()
    }

    /// Whether any pose is stamped at or after `time`
    pub fn has_poses_from(&self, time: u32) -> bool {
        self.poses.last().is_some_and(|p| p.time >= time)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}
