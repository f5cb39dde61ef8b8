// src/sim/state.rs
//! State shared by every simulation service
//!
//! One [`SimulationState`] is created per run and handed to each service as
//! an `Arc`. Counters are plain atomics; the crash record uses short
//! critical sections only.

use crate::sim::model::{StampedDetectedObjects, TrackedObject};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Run-wide counters
#[derive(Debug, Default)]
pub struct Statistics {
    system_runtime: AtomicU64,
    num_detected_objects: AtomicU64,
    num_tracked_objects: AtomicU64,
    num_landmarks: AtomicU64,
}

impl Statistics {
    pub fn record_tick(&self) {
        self.system_runtime.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_detected(&self, count: usize) {
        self.num_detected_objects
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_tracked(&self, count: usize) {
        self.num_tracked_objects
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn set_landmarks(&self, count: usize) {
        self.num_landmarks.store(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            system_runtime: self.system_runtime.load(Ordering::Relaxed),
            num_detected_objects: self.num_detected_objects.load(Ordering::Relaxed),
            num_tracked_objects: self.num_tracked_objects.load(Ordering::Relaxed),
            num_landmarks: self.num_landmarks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Statistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub system_runtime: u64,
    pub num_detected_objects: u64,
    pub num_tracked_objects: u64,
    pub num_landmarks: u64,
}

/// First sensor fault of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub sensor: String,
    pub description: String,
}

/// Data needed for the crash report
#[derive(Debug, Default)]
pub struct CrashRecord {
    failure: Mutex<Option<Failure>>,
    last_camera_frames: Mutex<BTreeMap<String, StampedDetectedObjects>>,
    last_lidar_frames: Mutex<BTreeMap<String, Vec<TrackedObject>>>,
}

impl CrashRecord {
    /// Record a fault; only the first one is kept
    pub fn record_failure(&self, sensor: &str, description: &str) -> bool {
        let mut failure = self.failure.lock();
        if failure.is_some() {
            return false;
        }
        *failure = Some(Failure {
            sensor: sensor.to_string(),
            description: description.to_string(),
        });
        true
    }

    pub fn failure(&self) -> Option<Failure> {
        self.failure.lock().clone()
    }

    pub fn is_crashed(&self) -> bool {
        self.failure.lock().is_some()
    }

    pub fn record_camera_frame(&self, camera: &str, frame: &StampedDetectedObjects) {
        self.last_camera_frames
            .lock()
            .insert(camera.to_string(), frame.clone());
    }

    pub fn record_lidar_frame(&self, worker: &str, frame: &[TrackedObject]) {
        self.last_lidar_frames
            .lock()
            .insert(worker.to_string(), frame.to_vec());
    }

    pub fn last_camera_frames(&self) -> BTreeMap<String, StampedDetectedObjects> {
        self.last_camera_frames.lock().clone()
    }

    pub fn last_lidar_frames(&self) -> BTreeMap<String, Vec<TrackedObject>> {
        self.last_lidar_frames.lock().clone()
    }
}

/// Everything the services of one run share
#[derive(Debug)]
pub struct SimulationState {
    pub statistics: Statistics,
    pub crash: CrashRecord,
    active_cameras: AtomicUsize,
    report_path: Mutex<Option<PathBuf>>,
}

impl SimulationState {
    pub fn new(cameras: usize) -> Self {
        Self {
            statistics: Statistics::default(),
            crash: CrashRecord::default(),
            active_cameras: AtomicUsize::new(cameras),
            report_path: Mutex::new(None),
        }
    }

    /// Called once by each camera service when it stops
    pub fn camera_stopped(&self) {
        let _ = self
            .active_cameras
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn active_cameras(&self) -> usize {
        self.active_cameras.load(Ordering::SeqCst)
    }

    pub fn set_report_path(&self, path: PathBuf) {
        *self.report_path.lock() = Some(path);
    }

    /// Report written by the fusion service, if any
    pub fn report_path(&self) -> Option<PathBuf> {
        self.report_path.lock().clone()
    }
}
