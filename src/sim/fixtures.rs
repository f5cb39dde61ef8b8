// src/sim/fixtures.rs
//! Loading a simulation from its JSON configuration
//!
//! The configuration file names the camera, LiDAR and pose data files.
//! Relative data paths are resolved against the configuration file's
//! directory.

use crate::sim::model::{Pose, StampedCloudPoints, StampedDetectedObjects};
use crate::sim::sensors::{Camera, LiDarDatabase, PoseTrack};
use crate::utils::errors::{BusError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(rename = "Cameras")]
    pub cameras: CamerasSection,

    #[serde(rename = "LiDarWorkers", alias = "LidarWorkers")]
    pub lidar_workers: LidarSection,

    #[serde(rename = "poseJsonFile")]
    pub pose_json_file: PathBuf,

    /// Milliseconds between ticks
    #[serde(rename = "TickTime")]
    pub tick_time: u64,

    /// Number of ticks
    #[serde(rename = "Duration")]
    pub duration: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CamerasSection {
    #[serde(rename = "CamerasConfigurations", default)]
    pub configurations: Vec<CameraConfig>,
    pub camera_datas_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: u32,
    pub frequency: u32,
    pub camera_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LidarSection {
    #[serde(rename = "LidarConfigurations", default)]
    pub configurations: Vec<LidarConfig>,
    pub lidars_data_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LidarConfig {
    pub id: u32,
    pub frequency: u32,
}

/// A fully loaded simulation
#[derive(Debug, Clone)]
pub struct Fixture {
    /// Directory of the configuration file
    pub base_dir: PathBuf,
    pub tick_time: Duration,
    pub duration: u32,
    pub cameras: Vec<Camera>,
    pub lidars: Vec<LidarConfig>,
    pub lidar_db: LiDarDatabase,
    pub poses: PoseTrack,
}

impl Fixture {
    pub fn load(config_path: &Path) -> Result<Self> {
        info!("Loading simulation from {}", config_path.display());

        let config: SimulationConfig = read_json(config_path)?;
        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self::from_config(config, base_dir)
    }

    pub fn from_config(config: SimulationConfig, base_dir: PathBuf) -> Result<Self> {
        if config.duration == 0 {
            return Err(BusError::FixtureError("Duration must be greater than 0".to_string()));
        }

        let camera_data: HashMap<String, Vec<StampedDetectedObjects>> =
            read_json(&resolve(&base_dir, &config.cameras.camera_datas_path))?;

        let cameras = config
            .cameras
            .configurations
            .iter()
            .map(|c| {
                let frames = camera_data.get(&c.camera_key).cloned().ok_or_else(|| {
                    BusError::FixtureError(format!(
                        "no camera data for key '{}' (camera {})",
                        c.camera_key, c.id
                    ))
                })?;
                Ok(Camera::new(c.id, c.frequency, frames))
            })
            .collect::<Result<Vec<_>>>()?;

        let readings: Vec<StampedCloudPoints> =
            read_json(&resolve(&base_dir, &config.lidar_workers.lidars_data_path))?;
        let poses: Vec<Pose> = read_json(&resolve(&base_dir, &config.pose_json_file))?;

        debug!(
            "Loaded {} cameras, {} LiDAR readings, {} poses",
            cameras.len(),
            readings.len(),
            poses.len()
        );

        Ok(Self {
            base_dir,
            tick_time: Duration::from_millis(config.tick_time),
            duration: config.duration,
            cameras,
            lidars: config.lidar_workers.configurations,
            lidar_db: LiDarDatabase::new(readings),
            poses: PoseTrack::new(poses),
        })
    }

    /// Names of every sensor service (cameras, then LiDAR workers)
    pub fn sensor_names(&self) -> Vec<String> {
        self.cameras
            .iter()
            .map(Camera::name)
            .chain(self.lidars.iter().map(|l| lidar_name(l.id)))
            .collect()
    }
}

/// Agent name of LiDAR worker `id`
pub fn lidar_name(id: u32) -> String {
    format!("LiDar {}", id)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        BusError::FixtureError(format!("cannot open {}: {}", path.display(), e))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        BusError::FixtureError(format!("cannot parse {}: {}", path.display(), e))
    })
}
