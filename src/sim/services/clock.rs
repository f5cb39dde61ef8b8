// src/sim/services/clock.rs
//! Global clock
//!
//! A helper thread broadcasts `Tick(1..=duration)` one `tick_time` apart,
//! then `Terminated` from the clock. The agent itself only listens for the
//! signals that stop the ticker early: a sensor crash, or the fusion
//! service reporting that every sensor is done.

use crate::agent::{Agent, Bindings, Context};
use crate::bus::Broker;
use crate::sim::messages::{Crashed, Terminated, Tick, FUSION_SLAM, TIME_SERVICE};
use crate::sim::state::SimulationState;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Clock {
    tick_time: Duration,
    duration: u32,
    state: Arc<SimulationState>,
    stop: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl Clock {
    pub fn new(tick_time: Duration, duration: u32, state: Arc<SimulationState>) -> Self {
        Self {
            tick_time,
            duration,
            state,
            stop: None,
            ticker: None,
        }
    }

    fn halt(&self) {
        if let Some(stop) = &self.stop {
            let _ = stop.try_send(());
        }
    }
}

impl Agent for Clock {
    fn name(&self) -> &str {
        TIME_SERVICE
    }

    fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
        bindings
            .on_notification::<Crashed, _>(|clock, _ctx, crashed| {
                info!("Clock stopping: {} crashed", crashed.sender);
                clock.halt();
                Ok(())
            })
            .on_notification::<Terminated, _>(|clock, ctx, terminated| {
                if terminated.is_from(TIME_SERVICE) {
                    ctx.terminate();
                } else if terminated.is_from(FUSION_SLAM) {
                    info!("Clock stopping: every sensor is done");
                    clock.halt();
                }
                Ok(())
            });

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let broker = Arc::clone(bindings.context().broker());
        let state = Arc::clone(&self.state);
        let (tick_time, duration) = (self.tick_time, self.duration);

        let ticker = thread::Builder::new()
            .name(format!("{}-ticker", TIME_SERVICE))
            .spawn(move || tick_loop(&broker, &stop_rx, &state, tick_time, duration))?;

        self.stop = Some(stop_tx);
        self.ticker = Some(ticker);
        Ok(())
    }

    fn on_shutdown(&mut self, _ctx: &Context) {
        self.halt();
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                warn!("Clock ticker thread panicked");
            }
        }
    }
}

fn tick_loop(
    broker: &Broker,
    stop: &Receiver<()>,
    state: &SimulationState,
    tick_time: Duration,
    duration: u32,
) {
    for tick in 1..=duration {
        if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        state.statistics.record_tick();
        let delivered = broker.send_notification(Tick { tick });
        debug!("Tick {} delivered to {} agents", tick, delivered);

        if !matches!(stop.recv_timeout(tick_time), Err(RecvTimeoutError::Timeout)) {
            break;
        }
    }

    info!("Clock finished");
    broker.send_notification(Terminated::from(TIME_SERVICE));
}
