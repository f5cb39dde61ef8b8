// src/sim/services/lidar.rs
//! LiDAR worker service
//!
//! Buffers `DetectObjects` requests and, on tick `t`, tracks every request
//! whose `time + frequency <= t` against the shared LiDAR database. Tracked
//! objects go to the fusion service; the camera's request is resolved with
//! `true` once tracked, `false` if the worker stops first.

use crate::agent::{Agent, Bindings, Context};
use crate::bus::RequestId;
use crate::sim::fixtures::lidar_name;
use crate::sim::messages::{Crashed, DetectObjects, Terminated, Tick, TrackedObjects, TIME_SERVICE};
use crate::sim::model::{SensorStatus, TrackedObject};
use crate::sim::sensors::LiDarDatabase;
use crate::sim::state::SimulationState;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Crash description used when the database holds a fault entry
pub const LIDAR_FAULT: &str = "LiDar disconnected";

pub struct LiDarService {
    name: String,
    frequency: u32,
    status: SensorStatus,
    database: Arc<LiDarDatabase>,
    /// Pending requests ordered by detection time
    buffer: Vec<(RequestId, DetectObjects)>,
    state: Arc<SimulationState>,
}

impl LiDarService {
    pub fn new(
        id: u32,
        frequency: u32,
        database: Arc<LiDarDatabase>,
        state: Arc<SimulationState>,
    ) -> Self {
        Self {
            name: lidar_name(id),
            frequency,
            status: SensorStatus::Up,
            database,
            buffer: Vec::new(),
            state,
        }
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    fn on_detect(&mut self, ctx: &mut Context, id: RequestId, request: DetectObjects) {
        if self.status != SensorStatus::Up {
            ctx.complete::<DetectObjects>(id, false);
            return;
        }

        debug!("{} buffered detections from time {}", self.name, request.time);
        let at = self.buffer.partition_point(|(_, r)| r.time <= request.time);
        self.buffer.insert(at, (id, request));
    }

    fn on_tick(&mut self, ctx: &mut Context, now: u32) {
        if self.status != SensorStatus::Up {
            return;
        }

        if self.database.error_at(now).is_some() {
            self.crash(ctx, now);
            return;
        }

        let due = self
            .buffer
            .partition_point(|(_, r)| r.time + self.frequency <= now);
        let ready: Vec<_> = self.buffer.drain(..due).collect();

        for (id, request) in ready {
            let tracked = self.track(&request);
            self.state.statistics.add_tracked(tracked.len());
            self.state.crash.record_lidar_frame(&self.name, &tracked);

            let time = request.time;
            if ctx
                .send_request(TrackedObjects {
                    time,
                    objects: tracked,
                })
                .is_none()
            {
                warn!("{} found no fusion service for time {}", self.name, time);
            }
            ctx.complete::<DetectObjects>(id, true);
        }

        // A request may be in flight from a camera that has just stopped
        if self.buffer.is_empty()
            && self.state.active_cameras() == 0
            && ctx.broker().mailbox_len(ctx.id()) == Some(0)
        {
            info!("{} has no more work", self.name);
            self.shut_down(ctx);
        }
    }

    fn track(&self, request: &DetectObjects) -> Vec<TrackedObject> {
        request
            .objects
            .iter()
            .filter_map(|object| {
                let Some(reading) = self.database.lookup(&object.id, request.time) else {
                    warn!(
                        "{} has no reading for {} at time {}",
                        self.name, object.id, request.time
                    );
                    return None;
                };
                Some(TrackedObject {
                    id: object.id.clone(),
                    time: reading.time,
                    description: object.description.clone(),
                    coordinates: reading.points(),
                })
            })
            .collect()
    }

    fn crash(&mut self, ctx: &mut Context, now: u32) {
        warn!("{} failed at tick {}", self.name, now);
        self.status = SensorStatus::Error;
        self.state.crash.record_failure(&self.name, LIDAR_FAULT);
        ctx.send_notification(Crashed {
            sender: self.name.clone(),
            description: LIDAR_FAULT.to_string(),
        });
        ctx.terminate();
    }

    fn shut_down(&mut self, ctx: &mut Context) {
        if self.status == SensorStatus::Up {
            self.status = SensorStatus::Down;
            ctx.send_notification(Terminated::from(self.name.as_str()));
        }
        ctx.terminate();
    }
}

impl Agent for LiDarService {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
        bindings
            .on_request::<DetectObjects, _>(|lidar, ctx, id, request| {
                lidar.on_detect(ctx, id, request);
                Ok(())
            })
            .on_notification::<Tick, _>(|lidar, ctx, tick| {
                lidar.on_tick(ctx, tick.tick);
                Ok(())
            })
            .on_notification::<Crashed, _>(|lidar, ctx, crashed| {
                debug!("{} stopping after {} crashed", lidar.name, crashed.sender);
                lidar.shut_down(ctx);
                Ok(())
            })
            .on_notification::<Terminated, _>(|lidar, ctx, terminated| {
                if terminated.is_from(TIME_SERVICE) {
                    lidar.shut_down(ctx);
                }
                Ok(())
            });
        Ok(())
    }

    fn on_shutdown(&mut self, ctx: &Context) {
        for (id, _) in self.buffer.drain(..) {
            ctx.complete::<DetectObjects>(id, false);
        }
    }
}
