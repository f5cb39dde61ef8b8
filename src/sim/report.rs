// src/sim/report.rs
//! Run reports
//!
//! A normal run writes `output_file.json`; a run that saw a sensor fault
//! writes `OutputError.json`. Both are pretty-printed JSON.

use crate::sim::model::{LandMark, Pose, StampedDetectedObjects, TrackedObject};
use crate::sim::slam::FusionSlam;
use crate::sim::state::{Failure, SimulationState, StatisticsSnapshot};
use crate::utils::errors::{BusError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const OUTPUT_FILE: &str = "output_file.json";
pub const CRASH_FILE: &str = "OutputError.json";

/// Report of a run that completed without faults
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputReport {
    pub system_runtime: u64,
    pub num_detected_objects: u64,
    pub num_tracked_objects: u64,
    pub num_landmarks: u64,
    pub land_marks: BTreeMap<String, LandMark>,
}

impl OutputReport {
    pub fn new(stats: StatisticsSnapshot, slam: &FusionSlam) -> Self {
        Self {
            system_runtime: stats.system_runtime,
            num_detected_objects: stats.num_detected_objects,
            num_tracked_objects: stats.num_tracked_objects,
            num_landmarks: stats.num_landmarks,
            land_marks: slam.landmarks().clone(),
        }
    }
}

/// Report of a run stopped by a sensor fault
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    pub error: String,
    pub faulty_sensor: String,
    pub last_cameras_frame: BTreeMap<String, StampedDetectedObjects>,
    #[serde(rename = "lastLiDarWorkerTrackersFrame")]
    pub last_lidar_frames: BTreeMap<String, Vec<TrackedObject>>,
    pub poses: Vec<Pose>,
    pub statistics: CrashStatistics,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashStatistics {
    #[serde(flatten)]
    pub counters: StatisticsSnapshot,
    pub landmarks: BTreeMap<String, LandMark>,
}

impl CrashReport {
    pub fn new(failure: Failure, state: &SimulationState, slam: &FusionSlam) -> Self {
        Self {
            error: failure.description,
            faulty_sensor: failure.sensor,
            last_cameras_frame: state.crash.last_camera_frames(),
            last_lidar_frames: state.crash.last_lidar_frames(),
            poses: slam.poses().to_vec(),
            statistics: CrashStatistics {
                counters: state.statistics.snapshot(),
                landmarks: slam.landmarks().clone(),
            },
        }
    }
}

/// Write the report matching the run's outcome into `dir`
pub fn write_final_report(dir: &Path, state: &SimulationState, slam: &FusionSlam) -> Result<PathBuf> {
    match state.crash.failure() {
        Some(failure) => write_json(dir, CRASH_FILE, &CrashReport::new(failure, state, slam)),
        None => write_json(
            dir,
            OUTPUT_FILE,
            &OutputReport::new(state.statistics.snapshot(), slam),
        ),
    }
}

fn write_json<T: Serialize>(dir: &Path, file_name: &str, report: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, report)
        .map_err(|e| BusError::ReportError(format!("JSON serialization error: {}", e)))?;
    writer.flush()?;

    info!("Report written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::model::{CloudPoint, DetectedObject};
    use tempfile::TempDir;

    fn slam_with_wall() -> FusionSlam {
        let mut slam = FusionSlam::new();
        let pose = Pose {
            time: 2,
            x: 1.0,
            y: 1.0,
            yaw: 0.0,
        };
        slam.add_pose(pose);
        slam.process(
            &TrackedObject {
                id: "Wall_1".to_string(),
                time: 2,
                description: "Wall".to_string(),
                coordinates: vec![CloudPoint::new(0.5, 0.5)],
            },
            &pose,
        );
        slam
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_output_report() {
        let dir = TempDir::new().unwrap();
        let state = SimulationState::new(0);
        state.statistics.record_tick();
        state.statistics.set_landmarks(1);

        let path = write_final_report(dir.path(), &state, &slam_with_wall()).unwrap();
        assert_eq!(path.file_name().unwrap(), OUTPUT_FILE);

        let json = read(&path);
        assert_eq!(json["systemRuntime"], 1);
        assert_eq!(json["numLandmarks"], 1);
        assert_eq!(json["landMarks"]["Wall_1"]["description"], "Wall");
        assert_eq!(json["landMarks"]["Wall_1"]["coordinates"][0]["x"], 1.5);
    }

    #[test]
    fn test_crash_report() {
        let dir = TempDir::new().unwrap();
        let state = SimulationState::new(1);
        state.crash.record_failure("Camera 1", "Camera disconnected");
        state.crash.record_camera_frame(
            "Camera 1",
            &StampedDetectedObjects {
                time: 2,
                detected_objects: vec![DetectedObject {
                    id: "Wall_1".to_string(),
                    description: "Wall".to_string(),
                }],
            },
        );

        let path = write_final_report(dir.path(), &state, &slam_with_wall()).unwrap();
        assert_eq!(path.file_name().unwrap(), CRASH_FILE);

        let json = read(&path);
        assert_eq!(json["error"], "Camera disconnected");
        assert_eq!(json["faultySensor"], "Camera 1");
        assert_eq!(json["lastCamerasFrame"]["Camera 1"]["time"], 2);
        assert_eq!(json["poses"][0]["time"], 2);
        assert_eq!(json["statistics"]["systemRuntime"], 0);
        assert!(json["statistics"]["landmarks"]["Wall_1"].is_object());
        assert!(json["lastLiDarWorkerTrackersFrame"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("reports").join("run-1");

        let path = write_final_report(&nested, &SimulationState::new(0), &FusionSlam::new()).unwrap();
        assert!(path.exists());
    }
}
