// src/sim/slam.rs
//! Landmark map built from tracked objects and robot poses

use crate::sim::model::{CloudPoint, LandMark, Pose, TrackedObject};
use std::collections::BTreeMap;

/// Map state owned by the fusion service
#[derive(Debug, Default)]
pub struct FusionSlam {
    landmarks: BTreeMap<String, LandMark>,
    poses: Vec<Pose>,
}

impl FusionSlam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pose(&mut self, pose: Pose) {
        self.poses.push(pose);
    }

    pub fn pose_at(&self, time: u32) -> Option<Pose> {
        self.poses.iter().find(|p| p.time == time).copied()
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn landmarks(&self) -> &BTreeMap<String, LandMark> {
        &self.landmarks
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    /// Place `object` on the map using the robot `pose` it was seen from
    ///
    /// Returns `true` when a new landmark was created. A known landmark is
    /// refined by averaging point by point; extra points are appended.
    pub fn process(&mut self, object: &TrackedObject, pose: &Pose) -> bool {
        let global = transform_to_global(&object.coordinates, pose);

        match self.landmarks.get_mut(&object.id) {
            Some(landmark) => {
                for (i, point) in global.into_iter().enumerate() {
                    match landmark.coordinates.get_mut(i) {
                        Some(existing) => {
                            existing.x = (existing.x + point.x) / 2.0;
                            existing.y = (existing.y + point.y) / 2.0;
                        }
                        None => landmark.coordinates.push(point),
                    }
                }
                false
            }
            None => {
                self.landmarks.insert(
                    object.id.clone(),
                    LandMark {
                        id: object.id.clone(),
                        description: object.description.clone(),
                        coordinates: global,
                    },
                );
                true
            }
        }
    }
}

/// Rotate by the pose's yaw (degrees) and translate by its position
pub fn transform_to_global(points: &[CloudPoint], pose: &Pose) -> Vec<CloudPoint> {
    let (sin, cos) = pose.yaw.to_radians().sin_cos();
    points
        .iter()
        .map(|p| CloudPoint::new(p.x * cos - p.y * sin + pose.x, p.x * sin + p.y * cos + pose.y))
        .collect()
}
