// src/sim/services/fusion.rs
//! Fusion SLAM service
//!
//! Builds the landmark map from tracked objects and poses. Objects whose
//! pose has not arrived yet are parked by time. The service tracks which
//! sensors are still running; once all of them have stopped it asks the
//! clock to stop, and once the clock has finished it writes the report.

use crate::agent::{Agent, Bindings, Context};
use crate::sim::messages::{
    Crashed, PoseUpdate, Terminated, TrackedObjects, FUSION_SLAM, TIME_SERVICE,
};
use crate::sim::model::{Pose, TrackedObject};
use crate::sim::report;
use crate::sim::slam::FusionSlam;
use crate::sim::state::SimulationState;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub struct FusionSlamService {
    slam: FusionSlam,
    /// Tracked objects waiting for the pose of their time
    parked: HashMap<u32, Vec<TrackedObject>>,
    active_sensors: HashSet<String>,
    clock_finished: bool,
    stop_requested: bool,
    output_dir: PathBuf,
    state: Arc<SimulationState>,
}

impl FusionSlamService {
    pub fn new(
        sensors: impl IntoIterator<Item = String>,
        output_dir: PathBuf,
        state: Arc<SimulationState>,
    ) -> Self {
        Self {
            slam: FusionSlam::new(),
            parked: HashMap::new(),
            active_sensors: sensors.into_iter().collect(),
            clock_finished: false,
            stop_requested: false,
            output_dir,
            state,
        }
    }

    pub fn slam(&self) -> &FusionSlam {
        &self.slam
    }

    fn on_tracked(&mut self, objects: Vec<TrackedObject>) {
        for object in objects {
            match self.slam.pose_at(object.time) {
                Some(pose) => self.place(&object, &pose),
                None => {
                    debug!("Parking {} until pose {} arrives", object.id, object.time);
                    self.parked.entry(object.time).or_default().push(object);
                }
            }
        }
    }

    fn on_pose(&mut self, pose: Pose) {
        self.slam.add_pose(pose);
        for object in self.parked.remove(&pose.time).unwrap_or_default() {
            self.place(&object, &pose);
        }
    }

    fn place(&mut self, object: &TrackedObject, pose: &Pose) {
        if self.slam.process(object, pose) {
            debug!("New landmark {}", object.id);
        }
        self.state
            .statistics
            .set_landmarks(self.slam.landmark_count());
    }

    fn sensor_stopped(&mut self, ctx: &mut Context, sensor: &str) -> anyhow::Result<()> {
        if self.active_sensors.remove(sensor) {
            debug!("{} stopped; {} sensors left", sensor, self.active_sensors.len());
        }
        self.check_done(ctx)
    }

    fn check_done(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        if !self.active_sensors.is_empty() {
            return Ok(());
        }

        if !self.clock_finished {
            if !self.stop_requested {
                info!("Every sensor stopped; asking the clock to stop");
                self.stop_requested = true;
                ctx.send_notification(Terminated::from(FUSION_SLAM));
            }
            return Ok(());
        }

        let path = report::write_final_report(&self.output_dir, &self.state, &self.slam)?;
        self.state.set_report_path(path);
        ctx.terminate();
        Ok(())
    }
}

impl Agent for FusionSlamService {
    fn name(&self) -> &str {
        FUSION_SLAM
    }

    fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
        bindings
            .on_request::<TrackedObjects, _>(|fusion, ctx, id, request| {
                fusion.on_tracked(request.objects);
                ctx.complete::<TrackedObjects>(id, true);
                Ok(())
            })
            .on_request::<PoseUpdate, _>(|fusion, ctx, id, update| {
                fusion.on_pose(update.pose);
                ctx.complete::<PoseUpdate>(id, true);
                Ok(())
            })
            .on_notification::<Terminated, _>(|fusion, ctx, terminated| {
                if terminated.is_from(TIME_SERVICE) {
                    fusion.clock_finished = true;
                    fusion.check_done(ctx)
                } else {
                    fusion.sensor_stopped(ctx, &terminated.sender)
                }
            })
            .on_notification::<Crashed, _>(|fusion, ctx, crashed| {
                info!("{} crashed: {}", crashed.sender, crashed.description);
                fusion.sensor_stopped(ctx, &crashed.sender)
            });
        Ok(())
    }
}
