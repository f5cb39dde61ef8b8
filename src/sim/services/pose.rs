// src/sim/services/pose.rs
//! Pose service: replays the GPS/IMU track, one pose per tick

use crate::agent::{Agent, Bindings, Context};
use crate::sim::messages::{Crashed, PoseUpdate, Terminated, Tick, POSE_SERVICE, TIME_SERVICE};
use crate::sim::sensors::PoseTrack;
use tracing::{debug, info, warn};

pub struct PoseService {
    track: PoseTrack,
}

impl PoseService {
    pub fn new(track: PoseTrack) -> Self {
        Self { track }
    }

    fn on_tick(&mut self, ctx: &mut Context, now: u32) {
        if let Some(pose) = self.track.pose_at(now) {
            if ctx.send_request(PoseUpdate { pose }).is_none() {
                warn!("No fusion service for pose at {}", now);
            }
        } else if !self.track.has_poses_from(now) {
            info!("No more poses after tick {}", now);
            ctx.send_notification(Terminated::from(POSE_SERVICE));
            ctx.terminate();
        }
    }
}

impl Agent for PoseService {
    fn name(&self) -> &str {
        POSE_SERVICE
    }

    fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
        bindings
            .on_notification::<Tick, _>(|pose, ctx, tick| {
                pose.on_tick(ctx, tick.tick);
                Ok(())
            })
            .on_notification::<Crashed, _>(|_pose, ctx, crashed| {
                debug!("Pose service stopping after {} crashed", crashed.sender);
                ctx.terminate();
                Ok(())
            })
            .on_notification::<Terminated, _>(|_pose, ctx, terminated| {
                if terminated.is_from(TIME_SERVICE) {
                    ctx.terminate();
                }
                Ok(())
            });
        Ok(())
    }
}
