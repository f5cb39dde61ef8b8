// src/agent/runtime.rs
//! Agent run-loop contract
//!
//! Every agent goes through the same lifecycle:
//!
//! ```text
//! Created ──▶ Initializing ──▶ Running ──▶ Terminated
//!             register         receive      unregister
//!             bind handlers    dispatch
//! ```
//!
//! Handlers are bound once during [`Agent::initialize`]. The loop blocks on
//! the agent's mailbox, runs the handler bound to the message's type on the
//! agent's own thread, and exits after the handler that called
//! [`Context::terminate`] returns. A handler error stops the loop and is
//! returned to whoever runs the agent; the core does not restart agents.

use crate::bus::{AgentId, Broker, Envelope, MessageKind, Notification, Promise, Request, RequestId};
use crate::utils::errors::{BusError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentState {
    Created,
    Initializing,
    Running,
    Terminated,
}

/// Observable lifecycle state, shared between an agent's thread and its handle
#[derive(Clone)]
pub struct StateCell {
    inner: Arc<(Mutex<AgentState>, Condvar)>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(AgentState::Created), Condvar::new())),
        }
    }

    pub fn get(&self) -> AgentState {
        *self.inner.0.lock()
    }

    pub(crate) fn set(&self, state: AgentState) {
        let (lock, changed) = &*self.inner;
        *lock.lock() = state;
        changed.notify_all();
    }

    /// Wait until the state is at least `target`
    ///
    /// Returns `false` on timeout.
    pub fn wait_for(&self, target: AgentState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, changed) = &*self.inner;
        let mut state = lock.lock();
        while *state < target {
            if changed.wait_until(&mut state, deadline).timed_out() {
                return *state >= target;
            }
        }
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker unit driven by the run loop
pub trait Agent: Send + Sized + 'static {
    /// Unique name; becomes the agent's [`AgentId`]
    fn name(&self) -> &str;

    /// Bind handlers (and optionally send first messages)
    fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()>;

    /// Called after the loop exits, before the agent is unregistered
    fn on_shutdown(&mut self, _ctx: &Context) {}
}

/// Bus access for a running agent
pub struct Context {
    id: AgentId,
    broker: Arc<Broker>,
    terminated: bool,
}

impl Context {
    pub fn new(id: AgentId, broker: Arc<Broker>) -> Self {
        Self {
            id,
            broker,
            terminated: false,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn send_request<R: Request>(&self, request: R) -> Option<Promise<R::Reply>> {
        self.broker.send_request(request)
    }

    pub fn send_notification<N: Notification>(&self, notification: N) -> usize {
        self.broker.send_notification(notification)
    }

    /// Resolve the sender's promise for request `id`
    pub fn complete<R: Request>(&self, id: RequestId, value: R::Reply) -> bool {
        self.broker.resolve::<R>(id, value)
    }

    /// Leave the loop once the current handler returns
    pub fn terminate(&mut self) {
        debug!("Agent {} requested termination", self.id);
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

type Handler<A> = Box<dyn FnMut(&mut A, &mut Context, Envelope) -> anyhow::Result<()>>;

/// Message-type → handler table, filled during initialization
pub struct Bindings<A> {
    ctx: Context,
    handlers: HashMap<MessageKind, Handler<A>>,
}

impl<A: Agent> Bindings<A> {
    fn new(ctx: Context) -> Self {
        Self {
            ctx,
            handlers: HashMap::new(),
        }
    }

    /// Subscribe to request type `R` and bind its handler
    pub fn on_request<R, F>(&mut self, mut handler: F) -> &mut Self
    where
        R: Request,
        F: FnMut(&mut A, &mut Context, RequestId, R) -> anyhow::Result<()> + 'static,
    {
        let kind = MessageKind::of::<R>();
        self.bind(
            kind,
            Box::new(move |agent, ctx, envelope| match envelope.into_request::<R>() {
                Ok((id, request)) => handler(agent, ctx, id, request),
                Err(envelope) => {
                    warn!("{} expected request {:?}, got {:?}", ctx.id(), kind, envelope);
                    Ok(())
                }
            }),
        );
        self.ctx.broker.subscribe_request::<R>(&self.ctx.id);
        self
    }

    /// Subscribe to notification type `N` and bind its handler
    pub fn on_notification<N, F>(&mut self, mut handler: F) -> &mut Self
    where
        N: Notification,
        F: FnMut(&mut A, &mut Context, &N) -> anyhow::Result<()> + 'static,
    {
        let kind = MessageKind::of::<N>();
        self.bind(
            kind,
            Box::new(move |agent, ctx, envelope| match envelope.notification_ref::<N>() {
                Some(notification) => handler(agent, ctx, notification),
                None => {
                    warn!("{} expected notification {:?}, got {:?}", ctx.id(), kind, envelope);
                    Ok(())
                }
            }),
        );
        self.ctx.broker.subscribe_notification::<N>(&self.ctx.id);
        self
    }

    /// Bus access during initialization
    pub fn context(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn bind(&mut self, kind: MessageKind, handler: Handler<A>) {
        if self.handlers.insert(kind, handler).is_some() {
            warn!("{} rebound handler for {:?}", self.ctx.id, kind);
        }
    }
}

/// Unregisters the agent and marks it terminated on every exit path
struct Registration {
    broker: Arc<Broker>,
    id: AgentId,
    state: StateCell,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broker.unregister(&self.id);
        self.state.set(AgentState::Terminated);
    }
}

/// Run `agent` on the current thread until it terminates or fails
pub fn run_agent<A: Agent>(mut agent: A, broker: Arc<Broker>, state: StateCell) -> Result<()> {
    let id = AgentId::new(agent.name());

    state.set(AgentState::Initializing);
    broker.register(&id);
    let _registration = Registration {
        broker: Arc::clone(&broker),
        id: id.clone(),
        state: state.clone(),
    };

    let mut bindings = Bindings::new(Context::new(id.clone(), broker));
    agent.initialize(&mut bindings).map_err(|source| {
        error!("Agent {} failed to initialize: {:#}", id, source);
        BusError::InitializationFailed {
            agent: id.to_string(),
            source,
        }
    })?;

    let Bindings {
        mut ctx,
        mut handlers,
    } = bindings;

    info!("Agent {} running with {} handlers", id, handlers.len());
    state.set(AgentState::Running);

    let outcome = dispatch_loop(&mut agent, &mut ctx, &mut handlers);
    agent.on_shutdown(&ctx);

    match &outcome {
        Ok(()) => info!("Agent {} terminated", id),
        Err(e) => error!("Agent {} stopped: {}", id, e),
    }
    outcome
}

fn dispatch_loop<A: Agent>(
    agent: &mut A,
    ctx: &mut Context,
    handlers: &mut HashMap<MessageKind, Handler<A>>,
) -> Result<()> {
    while !ctx.is_terminated() {
        let envelope = ctx.broker.receive(&ctx.id)?;
        let kind = envelope.kind();

        let Some(handler) = handlers.get_mut(&kind) else {
            warn!("Agent {} has no handler for {:?}; dropping it", ctx.id, kind);
            continue;
        };

        handler(agent, ctx, envelope).map_err(|source| BusError::HandlerFailed {
            agent: ctx.id.to_string(),
            message: kind.short_name(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug)]
    struct Work(String);

    impl Request for Work {
        type Reply = String;
    }

    #[derive(Debug)]
    struct Shout(String);

    impl Notification for Shout {}

    #[derive(Debug)]
    struct Stop;

    impl Notification for Stop {}

    #[derive(Debug)]
    struct Explode;

    impl Notification for Explode {}

    #[derive(Debug)]
    struct Unbound;

    impl Notification for Unbound {}

    struct Worker {
        name: String,
        heard: Arc<Mutex<Vec<String>>>,
        shut_down: Arc<Mutex<bool>>,
    }

    impl Worker {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                heard: Arc::new(Mutex::new(Vec::new())),
                shut_down: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl Agent for Worker {
        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
            bindings
                .on_request::<Work, _>(|agent, ctx, id, work| {
                    ctx.complete::<Work>(id, format!("{} handled {}", agent.name, work.0));
                    Ok(())
                })
                .on_notification::<Shout, _>(|agent, _ctx, shout| {
                    agent.heard.lock().push(shout.0.clone());
                    Ok(())
                })
                .on_notification::<Stop, _>(|_agent, ctx, _| {
                    ctx.terminate();
                    Ok(())
                })
                .on_notification::<Explode, _>(|_agent, _ctx, _| {
                    anyhow::bail!("sensor exploded")
                });
            Ok(())
        }

        fn on_shutdown(&mut self, _ctx: &Context) {
            *self.shut_down.lock() = true;
        }
    }

    fn start(worker: Worker, broker: &Arc<Broker>) -> (StateCell, thread::JoinHandle<Result<()>>) {
        let state = StateCell::new();
        let handle = {
            let broker = Arc::clone(broker);
            let state = state.clone();
            thread::spawn(move || run_agent(worker, broker, state))
        };
        assert!(state.wait_for(AgentState::Running, Duration::from_secs(2)));
        (state, handle)
    }

    #[test]
    fn test_lifecycle_and_dispatch() {
        let broker = Arc::new(Broker::new());
        let worker = Worker::new("worker-1");
        let heard = Arc::clone(&worker.heard);
        let shut_down = Arc::clone(&worker.shut_down);

        let (state, handle) = start(worker, &broker);
        assert_eq!(state.get(), AgentState::Running);
        assert!(broker.is_registered(&AgentId::new("worker-1")));

        let promise = broker.send_request(Work("job".to_string())).unwrap();
        assert_eq!(
            promise.get_timeout(Duration::from_secs(2)),
            Some("worker-1 handled job".to_string())
        );

        broker.send_notification(Shout("hello".to_string()));
        broker.send_notification(Stop);
        handle.join().unwrap().unwrap();

        assert_eq!(state.get(), AgentState::Terminated);
        assert_eq!(*heard.lock(), vec!["hello".to_string()]);
        assert!(*shut_down.lock());
        assert!(!broker.is_registered(&AgentId::new("worker-1")));
        assert!(broker.request_subscribers::<Work>().is_empty());
    }

    #[test]
    fn test_handler_failure_stops_agent() {
        let broker = Arc::new(Broker::new());
        let (state, handle) = start(Worker::new("fragile"), &broker);

        broker.send_notification(Explode);
        let err = handle.join().unwrap().unwrap_err();

        match err {
            BusError::HandlerFailed { agent, message, .. } => {
                assert_eq!(agent, "fragile");
                assert_eq!(message, "Explode");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state.get(), AgentState::Terminated);
        assert!(!broker.is_registered(&AgentId::new("fragile")));
    }

    #[test]
    fn test_unbound_message_is_dropped() {
        let broker = Arc::new(Broker::new());
        let (_state, handle) = start(Worker::new("picky"), &broker);

        // Routed by hand: the agent never subscribed to Unbound
        let id = AgentId::new("picky");
        broker.subscribe_notification::<Unbound>(&id);
        broker.send_notification(Unbound);
        broker.send_notification(Stop);

        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_terminate_during_initialize() {
        struct OneShot;

        impl Agent for OneShot {
            fn name(&self) -> &str {
                "one-shot"
            }

            fn initialize(&mut self, bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
                bindings.context().send_notification(Shout("bye".to_string()));
                bindings.context().terminate();
                Ok(())
            }
        }

        let broker = Arc::new(Broker::new());
        let state = StateCell::new();
        run_agent(OneShot, Arc::clone(&broker), state.clone()).unwrap();

        assert_eq!(state.get(), AgentState::Terminated);
        assert!(!broker.is_registered(&AgentId::new("one-shot")));
    }

    #[test]
    fn test_initialize_failure() {
        struct Broken;

        impl Agent for Broken {
            fn name(&self) -> &str {
                "broken"
            }

            fn initialize(&mut self, _bindings: &mut Bindings<Self>) -> anyhow::Result<()> {
                anyhow::bail!("missing calibration")
            }
        }

        let broker = Arc::new(Broker::new());
        let state = StateCell::new();
        let err = run_agent(Broken, Arc::clone(&broker), state.clone()).unwrap_err();

        assert!(matches!(err, BusError::InitializationFailed { .. }));
        assert_eq!(state.get(), AgentState::Terminated);
        assert!(!broker.is_registered(&AgentId::new("broken")));
    }

    #[test]
    fn test_wait_for_times_out() {
        let state = StateCell::new();
        assert!(!state.wait_for(AgentState::Running, Duration::from_millis(20)));
        state.set(AgentState::Terminated);
        assert!(state.wait_for(AgentState::Running, Duration::from_millis(20)));
    }

    #[test]
    fn test_bindings_count() {
        let broker = Arc::new(Broker::new());
        let mut bindings: Bindings<Worker> =
            Bindings::new(Context::new(AgentId::new("counted"), Arc::clone(&broker)));
        assert!(bindings.is_empty());

        let mut worker = Worker::new("counted");
        worker.initialize(&mut bindings).unwrap();
        assert_eq!(bindings.len(), 4);
        assert_eq!(broker.request_subscribers::<Work>(), vec![AgentId::new("counted")]);
    }
}
