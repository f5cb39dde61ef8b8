// src/sim/services/camera.rs
//! Camera service
//!
//! On tick `t` the camera queues its frame stamped `t` and publishes queued
//! frames once `time + frequency` is reached. A frame containing an
//! `ERROR` object crashes the camera.

use crate::agent::{Agent, Bindings, Context};
use crate::sim::messages::{Crashed, DetectObjects, Terminated, Tick, TIME_SERVICE};
use crate::sim::model::{SensorStatus, StampedDetectedObjects};
use crate::sim::sensors::Camera;
use crate::sim::state::SimulationState;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CameraService {
    name: String,
    camera: Camera,
    status: SensorStatus,
    queue: VecDeque<StampedDetectedObjects>,
    state: Arc<SimulationState>,
}

impl CameraService {
    pub fn new(camera: Camera, state: Arc<SimulationState>) -> Self {
        Self {
            name: camera.name(),
            camera,
            status: SensorStatus::Up,
            queue: VecDeque::new(),
            state,
        }
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    fn on_tick(&mut self, ctx: &mut Context, now: u32) {
        if self.status != SensorStatus::Up {
            return;
        }

        if let Some(frame) = self.camera.frame_at(now).cloned() {
            if let Some(fault) = frame.error() {
                let description = fault.description.clone();
                self.crash(ctx, now, description);
                return;
            }

            self.state.statistics.add_detected(frame.detected_objects.len());
            self.state.crash.record_camera_frame(&self.name, &frame);
            debug!("{} queued {} objects at tick {}", self.name, frame.detected_objects.len(), now);
            self.queue.push_back(frame);
        }

        if self.queue.is_empty() && !self.camera.has_frames_after(now) {
            info!("{} has no more detections", self.name);
            self.shut_down(ctx);
            return;
        }

        while self
            .queue
            .front()
            .is_some_and(|f| f.time + self.camera.frequency <= now)
        {
            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            let time = frame.time;
            if ctx.send_request(DetectObjects::from(frame)).is_none() {
                warn!("{} found no LiDAR worker for frame {}", self.name, time);
            }
        }
    }

    fn crash(&mut self, ctx: &mut Context, now: u32, description: String) {
        warn!("{} failed at tick {}: {}", self.name, now, description);
        self.status = SensorStatus::Error;
        self.state.crash.record_failure(&self.name, &description);
        ctx.send_notification(Crashed {
            sender: self.name.clone(),
            description,
        });
        self.state.camera_stopped();
        ctx.terminate();
    }

    fn shut_down(&mut self, ctx: &mut Context) {
        if self.status == SensorStatus::Up {
            self.status = SensorStatus::Down;
            ctx.send_notification(Terminated::from(self.name.as_str()));
            self.state.camera_stopped();
        }
        ctx.terminate();
    }
}

impl Agent for CameraService {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
        bindings
            .on_notification::<Tick, _>(|camera, ctx, tick| {
                camera.on_tick(ctx, tick.tick);
                Ok(())
            })
            .on_notification::<Crashed, _>(|camera, ctx, crashed| {
                debug!("{} stopping after {} crashed", camera.name, crashed.sender);
                camera.shut_down(ctx);
                Ok(())
            })
            .on_notification::<Terminated, _>(|camera, ctx, terminated| {
                if terminated.is_from(TIME_SERVICE) {
                    camera.shut_down(ctx);
                }
                Ok(())
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AgentId, Broker, Envelope};
    use crate::sim::model::DetectedObject;
    use std::time::Duration;

    fn frame(time: u32, ids: &[&str]) -> StampedDetectedObjects {
        StampedDetectedObjects {
            time,
            detected_objects: ids
                .iter()
                .map(|id| DetectedObject {
                    id: id.to_string(),
                    description: format!("{id} description"),
                })
                .collect(),
        }
    }

    /// A camera driven by hand, with a fake LiDAR mailbox
    struct Harness {
        broker: Arc<Broker>,
        lidar: AgentId,
        state: Arc<SimulationState>,
        service: CameraService,
        ctx: Context,
    }

    impl Harness {
        fn new(frequency: u32, frames: Vec<StampedDetectedObjects>) -> Self {
            let broker = Arc::new(Broker::new());
            let lidar = AgentId::new("LiDar 1");
            broker.register(&lidar);
            broker.subscribe_request::<DetectObjects>(&lidar);
            broker.subscribe_notification::<Crashed>(&lidar);
            broker.subscribe_notification::<Terminated>(&lidar);

            let state = Arc::new(SimulationState::new(1));
            let service = CameraService::new(Camera::new(1, frequency, frames), Arc::clone(&state));
            let ctx = Context::new(AgentId::new("Camera 1"), Arc::clone(&broker));
            Self {
                broker,
                lidar,
                state,
                service,
                ctx,
            }
        }

        fn tick(&mut self, now: u32) {
            self.service.on_tick(&mut self.ctx, now);
        }

        fn next(&self) -> Option<Envelope> {
            self.broker
                .receive_timeout(&self.lidar, Duration::from_millis(10))
                .unwrap()
        }
    }

    #[test]
    fn test_publishes_after_frequency() {
        let mut h = Harness::new(2, vec![frame(1, &["Wall_1", "Wall_2"]), frame(5, &["Door"])]);

        h.tick(1);
        h.tick(2);
        assert!(h.next().is_none());
        assert_eq!(h.state.statistics.snapshot().num_detected_objects, 2);

        h.tick(3);
        let (_, request) = h.next().unwrap().into_request::<DetectObjects>().unwrap();
        assert_eq!(request.time, 1);
        assert_eq!(request.objects.len(), 2);
        assert!(!h.ctx.is_terminated());
    }

    #[test]
    fn test_stops_when_out_of_frames() {
        let mut h = Harness::new(0, vec![frame(1, &["Wall_1"])]);

        h.tick(1);
        assert!(h.next().unwrap().is::<DetectObjects>());
        assert!(!h.ctx.is_terminated());

        h.tick(2);
        assert!(h.ctx.is_terminated());
        assert_eq!(h.service.status(), SensorStatus::Down);
        assert_eq!(h.state.active_cameras(), 0);
        let envelope = h.next().unwrap();
        assert_eq!(
            envelope.notification_ref::<Terminated>().unwrap().sender,
            "Camera 1"
        );
    }

    #[test]
    fn test_error_frame_crashes() {
        let mut h = Harness::new(0, vec![frame(1, &["Wall_1"]), frame(2, &["ERROR"])]);

        h.tick(1);
        h.tick(2);
        assert!(h.ctx.is_terminated());
        assert_eq!(h.service.status(), SensorStatus::Error);

        let failure = h.state.crash.failure().unwrap();
        assert_eq!(failure.sensor, "Camera 1");
        assert_eq!(failure.description, "ERROR description");
        assert_eq!(h.state.crash.last_camera_frames()["Camera 1"].time, 1);

        assert!(h.next().unwrap().is::<DetectObjects>());
        let crashed = h.next().unwrap();
        assert_eq!(crashed.notification_ref::<Crashed>().unwrap().sender, "Camera 1");
    }

    #[test]
    fn test_ignores_ticks_after_stop() {
        let mut h = Harness::new(0, vec![frame(3, &["Wall_1"])]);
        h.service.shut_down(&mut h.ctx);
        assert!(h.next().unwrap().is::<Terminated>());

        h.tick(3);
        assert!(h.next().is_none());
        assert_eq!(h.state.active_cameras(), 0);
    }
}
