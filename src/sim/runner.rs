// src/sim/runner.rs
//! Simulation bootstrap
//!
//! Every service except the clock is spawned first; the clock starts only
//! once the others have subscribed, so no tick is lost.
//!
//! ```text
//! Fixture ──▶ Simulation::start(pool)
//!               ├─ FusionSlam
//!               ├─ LiDar 1..n
//!               ├─ Camera 1..n
//!               ├─ PoseService
//!               │    (wait until Running)
//!               └─ TimeService
//! ```

use crate::agent::{AgentPool, PoolReport};
use crate::sim::fixtures::Fixture;
use crate::sim::services::{CameraService, Clock, FusionSlamService, LiDarService, PoseService};
use crate::sim::state::{Failure, SimulationState, StatisticsSnapshot};
use crate::utils::config::SimulationSettings;
use crate::utils::errors::{BusError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use ulid::Ulid;

/// A loaded simulation, ready to start
pub struct Simulation {
    fixture: Fixture,
    output_dir: PathBuf,
}

impl Simulation {
    /// Load the fixture; reports go to `settings.output_dir` or next to the
    /// configuration file
    pub fn load(config_path: &Path, settings: &SimulationSettings) -> Result<Self> {
        let fixture = Fixture::load(config_path)?;
        let output_dir = settings
            .output_dir
            .clone()
            .unwrap_or_else(|| fixture.base_dir.clone());
        Ok(Self::new(fixture, output_dir))
    }

    pub fn new(fixture: Fixture, output_dir: PathBuf) -> Self {
        Self {
            fixture,
            output_dir,
        }
    }

    /// Spawn every service on `pool`
    ///
    /// The pool's join timeout bounds the wait for the sensors to subscribe
    /// before the clock starts.
    pub fn start(self, pool: &mut AgentPool) -> Result<SimulationRun> {
        let startup_timeout = pool.join_timeout();
        let run_id = Ulid::new();
        let started_at = Utc::now();
        let sensors = self.fixture.sensor_names();
        let Fixture {
            tick_time,
            duration,
            cameras,
            lidars,
            lidar_db,
            poses,
            ..
        } = self.fixture;

        let state = Arc::new(SimulationState::new(cameras.len()));

        info!(
            "Starting run {}: {} cameras, {} LiDAR workers, {} ticks of {:?}",
            run_id,
            cameras.len(),
            lidars.len(),
            duration,
            tick_time
        );

        pool.spawn(FusionSlamService::new(
            sensors,
            self.output_dir.clone(),
            Arc::clone(&state),
        ))?;

        let database = Arc::new(lidar_db);
        for lidar in &lidars {
            pool.spawn(LiDarService::new(
                lidar.id,
                lidar.frequency,
                Arc::clone(&database),
                Arc::clone(&state),
            ))?;
        }
        for camera in cameras {
            pool.spawn(CameraService::new(camera, Arc::clone(&state)))?;
        }
        pool.spawn(PoseService::new(poses))?;

        if !pool.wait_until_running(startup_timeout) {
            return Err(BusError::ConfigError(format!(
                "services did not start within {:?}",
                startup_timeout
            )));
        }
        pool.spawn(Clock::new(tick_time, duration, Arc::clone(&state)))?;

        Ok(SimulationRun {
            run_id,
            started_at,
            output_dir: self.output_dir,
            state,
        })
    }
}

/// A started simulation
pub struct SimulationRun {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    state: Arc<SimulationState>,
}

impl SimulationRun {
    pub fn state(&self) -> &Arc<SimulationState> {
        &self.state
    }

    /// Combine the shared state with the pool's outcome
    pub fn summarize(&self, report: &PoolReport) -> SimulationSummary {
        SimulationSummary {
            run_id: self.run_id,
            elapsed: Utc::now() - self.started_at,
            statistics: self.state.statistics.snapshot(),
            failure: self.state.crash.failure(),
            report_path: self.state.report_path(),
            failed_agents: report
                .failures()
                .map(|o| o.agent.to_string())
                .collect(),
        }
    }
}

/// Outcome of a finished run
#[derive(Debug)]
pub struct SimulationSummary {
    pub run_id: Ulid,
    pub elapsed: chrono::Duration,
    pub statistics: StatisticsSnapshot,
    pub failure: Option<Failure>,
    pub report_path: Option<PathBuf>,
    pub failed_agents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentPoolConfig, Bindings};
    use crate::bus::Broker;
    use crate::sim::messages::{Terminated, TIME_SERVICE};
    use crate::sim::report::{CRASH_FILE, OUTPUT_FILE};
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "Cameras": {
            "CamerasConfigurations": [{"id": 1, "frequency": 0, "camera_key": "camera1"}],
            "camera_datas_path": "camera_data.json"
        },
        "LiDarWorkers": {
            "LidarConfigurations": [{"id": 1, "frequency": 0}],
            "lidars_data_path": "lidar_data.json"
        },
        "poseJsonFile": "pose_data.json",
        "TickTime": 20,
        "Duration": 50
    }"#;

    const LIDAR: &str = r#"[
        {"time": 2, "id": "Wall_1", "cloudPoints": [[0.5, 1.0, 0.1], [1.0, 1.0, 0.1]]},
        {"time": 4, "id": "Door", "cloudPoints": [[2.0, 0.0, 0.1]]}
    ]"#;

    const POSES: &str = r#"[
        {"time": 1, "x": 0.0, "y": 0.0, "yaw": 0.0},
        {"time": 2, "x": 0.0, "y": 0.0, "yaw": 0.0},
        {"time": 3, "x": 0.0, "y": 0.0, "yaw": 0.0},
        {"time": 4, "x": 1.0, "y": 0.0, "yaw": 0.0}
    ]"#;

    fn fixture_dir(camera_data: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("configuration.json"), CONFIG).unwrap();
        fs::write(dir.path().join("camera_data.json"), camera_data).unwrap();
        fs::write(dir.path().join("lidar_data.json"), LIDAR).unwrap();
        fs::write(dir.path().join("pose_data.json"), POSES).unwrap();
        dir
    }

    fn run(dir: &TempDir) -> SimulationSummary {
        let simulation = Simulation::load(
            &dir.path().join("configuration.json"),
            &SimulationSettings::default(),
        )
        .unwrap();

        let mut pool = AgentPool::new(Arc::new(Broker::new()));
        let run = simulation.start(&mut pool).unwrap();
        let report = pool.join_all();
        assert!(report.is_success(), "{:?}", report);
        run.summarize(&report)
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_normal_run() {
        let dir = fixture_dir(
            r#"{"camera1": [
                {"time": 2, "detectedObjects": [{"id": "Wall_1", "description": "Wall"}]},
                {"time": 4, "detectedObjects": [{"id": "Door", "description": "Door"}]}
            ]}"#,
        );
        let summary = run(&dir);

        assert!(summary.failure.is_none());
        assert!(summary.failed_agents.is_empty());
        assert_eq!(summary.statistics.num_detected_objects, 2);
        assert_eq!(summary.statistics.num_tracked_objects, 2);
        assert_eq!(summary.statistics.num_landmarks, 2);
        assert!(summary.statistics.system_runtime < 50);

        let path = summary.report_path.unwrap();
        assert_eq!(path, dir.path().join(OUTPUT_FILE));

        let json = read(&path);
        assert_eq!(json["numLandmarks"], 2);
        assert_eq!(json["landMarks"]["Wall_1"]["coordinates"][0]["x"], 0.5);
        assert_eq!(json["landMarks"]["Wall_1"]["coordinates"][1]["y"], 1.0);
        assert_eq!(json["landMarks"]["Door"]["coordinates"][0]["x"], 3.0);
    }

    #[test]
    fn test_camera_crash_run() {
        let dir = fixture_dir(
            r#"{"camera1": [
                {"time": 2, "detectedObjects": [{"id": "Wall_1", "description": "Wall"}]},
                {"time": 3, "detectedObjects": [{"id": "ERROR", "description": "Camera disconnected"}]}
            ]}"#,
        );
        let summary = run(&dir);

        let failure = summary.failure.unwrap();
        assert_eq!(failure.sensor, "Camera 1");
        assert_eq!(failure.description, "Camera disconnected");
        assert!(summary.statistics.system_runtime < 50);

        let path = summary.report_path.unwrap();
        assert_eq!(path, dir.path().join(CRASH_FILE));

        let json = read(&path);
        assert_eq!(json["faultySensor"], "Camera 1");
        assert_eq!(json["lastCamerasFrame"]["Camera 1"]["time"], 2);
    }

    #[test]
    fn test_output_dir_override() {
        let dir = fixture_dir(r#"{"camera1": []}"#);
        let out = TempDir::new().unwrap();
        let settings = SimulationSettings {
            output_dir: Some(out.path().to_path_buf()),
        };

        let simulation = Simulation::load(&dir.path().join("configuration.json"), &settings).unwrap();
        let mut pool = AgentPool::new(Arc::new(Broker::new()));
        let run = simulation.start(&mut pool).unwrap();
        let summary = run.summarize(&pool.join_all());

        assert_eq!(summary.report_path.unwrap(), out.path().join(OUTPUT_FILE));
    }

    /// Takes longer to initialize than the pool allows
    struct Sluggish;

    impl Agent for Sluggish {
        fn name(&self) -> &str {
            "sluggish"
        }

        fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
            thread::sleep(Duration::from_millis(300));
            bindings.on_notification::<Terminated, _>(|_agent, ctx, terminated| {
                if terminated.is_from(TIME_SERVICE) {
                    ctx.terminate();
                }
                Ok(())
            });
            Ok(())
        }
    }

    #[test]
    fn test_start_bounded_by_pool_join_timeout() {
        let dir = fixture_dir(r#"{"camera1": []}"#);
        let simulation = Simulation::load(
            &dir.path().join("configuration.json"),
            &SimulationSettings::default(),
        )
        .unwrap();

        let mut pool = AgentPool::with_config(
            Arc::new(Broker::new()),
            AgentPoolConfig {
                join_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        pool.spawn(Sluggish).unwrap();

        let err = simulation.start(&mut pool).err().unwrap();
        assert!(matches!(err, BusError::ConfigError(ref msg) if msg.contains("did not start")));
        assert!(pool.handle(TIME_SERVICE).is_none());

        // Nothing ticks without the clock; stop everyone by hand
        assert!(pool.wait_until_running(Duration::from_secs(2)));
        pool.broker().send_notification(Terminated::from(TIME_SERVICE));
        assert!(pool.join_all().is_success());
    }
}
