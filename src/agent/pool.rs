// src/agent/pool.rs
//! Thread-per-agent pool
//!
//! Each agent gets a dedicated named OS thread running [`run_agent`]. The
//! pool keeps one [`AgentHandle`] per agent so callers can observe its
//! lifecycle state and, at the end, join every thread.
//!
//! # Architecture
//!
//! ```text
//! AgentPool ── Arc<Broker> (shared by every agent)
//! ├─ agent-TimeService   [Running]
//! ├─ agent-Camera 1      [Running]
//! └─ agent-FusionSlam    [Initializing]
//! ```

use crate::agent::runtime::{run_agent, Agent, AgentState, StateCell};
use crate::bus::{AgentId, Broker};
use crate::utils::config::BusConfig;
use crate::utils::errors::{BusError, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for the agent pool
#[derive(Debug, Clone)]
pub struct AgentPoolConfig {
    /// Stack size of each agent thread in bytes (default: 2 MiB)
    pub thread_stack_size: usize,

    /// Bound on start-up and shutdown waits (default: 10s)
    pub join_timeout: Duration,
}

impl Default for AgentPoolConfig {
    fn default() -> Self {
        Self {
            thread_stack_size: 2 * 1024 * 1024,
            join_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&BusConfig> for AgentPoolConfig {
    fn from(config: &BusConfig) -> Self {
        Self {
            thread_stack_size: config.thread_stack_bytes(),
            join_timeout: config.join_timeout(),
        }
    }
}

/// Handle to one spawned agent
pub struct AgentHandle {
    id: AgentId,
    state: StateCell,
    thread: JoinHandle<Result<()>>,
}

impl AgentHandle {
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    /// Block until the agent reaches at least `target`; `false` on timeout
    pub fn wait_for(&self, target: AgentState, timeout: Duration) -> bool {
        self.state.wait_for(target, timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    fn join(self) -> AgentOutcome {
        let result = match self.thread.join() {
            Ok(result) => result,
            Err(_) => {
                // Panics raised before registration never reach the guard
                self.state.set(AgentState::Terminated);
                Err(BusError::AgentPanicked(self.id.to_string()))
            }
        };
        AgentOutcome {
            agent: self.id,
            result,
        }
    }
}

/// How one agent ended
#[derive(Debug)]
pub struct AgentOutcome {
    pub agent: AgentId,
    pub result: Result<()>,
}

/// Outcome of every agent in the pool, in spawn order
#[derive(Debug, Default)]
pub struct PoolReport {
    pub outcomes: Vec<AgentOutcome>,
}

impl PoolReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &AgentOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn outcome(&self, agent: &str) -> Option<&AgentOutcome> {
        self.outcomes.iter().find(|o| o.agent.as_str() == agent)
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub running: usize,
    pub terminated: usize,
}

/// Owns the threads of every agent sharing one broker
pub struct AgentPool {
    broker: Arc<Broker>,
    config: AgentPoolConfig,
    agents: Vec<AgentHandle>,
}

impl AgentPool {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self::with_config(broker, AgentPoolConfig::default())
    }

    pub fn with_config(broker: Arc<Broker>, config: AgentPoolConfig) -> Self {
        info!(
            "Creating agent pool (stack: {} KiB)",
            config.thread_stack_size / 1024
        );
        Self {
            broker,
            config,
            agents: Vec::new(),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn config(&self) -> &AgentPoolConfig {
        &self.config
    }

    /// Configured bound on start-up and shutdown waits
    pub fn join_timeout(&self) -> Duration {
        self.config.join_timeout
    }

    /// Start `agent` on its own thread
    pub fn spawn<A: Agent>(&mut self, agent: A) -> Result<&AgentHandle> {
        let id = AgentId::new(agent.name());
        // Two live agents would share one mailbox and one registration
        if self.agents.iter().any(|h| h.id == id && !h.is_finished()) {
            warn!("Refusing to spawn a second agent named {}", id);
            return Err(BusError::DuplicateAgent(id.to_string()));
        }

        let state = StateCell::new();
        let thread = {
            let broker = Arc::clone(&self.broker);
            let state = state.clone();
            thread::Builder::new()
                .name(format!("agent-{}", id))
                .stack_size(self.config.thread_stack_size)
                .spawn(move || run_agent(agent, broker, state))
                .map_err(|source| BusError::ThreadSpawn {
                    agent: id.to_string(),
                    source,
                })?
        };

        debug!("Spawned thread for agent {}", id);
        self.agents.push(AgentHandle { id, state, thread });
        Ok(&self.agents[self.agents.len() - 1])
    }

    pub fn handles(&self) -> &[AgentHandle] {
        &self.agents
    }

    pub fn handle(&self, agent: &str) -> Option<&AgentHandle> {
        self.agents.iter().find(|h| h.id.as_str() == agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Wait until every agent has finished initializing
    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        self.wait_all(AgentState::Running, timeout)
    }

    /// Wait until every agent has left its loop
    pub fn wait_until_terminated(&self, timeout: Duration) -> bool {
        self.wait_all(AgentState::Terminated, timeout)
    }

    fn wait_all(&self, target: AgentState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.agents.iter().all(|h| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            h.wait_for(target, remaining)
        })
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total: self.agents.len(),
            ..Default::default()
        };
        for handle in &self.agents {
            match handle.state() {
                AgentState::Running => stats.running += 1,
                AgentState::Terminated => stats.terminated += 1,
                _ => {}
            }
        }
        stats
    }

    /// Join every agent thread
    ///
    /// Blocks until all agents have terminated. Panics become
    /// [`BusError::AgentPanicked`] in the report.
    pub fn join_all(self) -> PoolReport {
        let outcomes: Vec<AgentOutcome> = self.agents.into_iter().map(AgentHandle::join).collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed == 0 {
            info!("All {} agents terminated cleanly", outcomes.len());
        } else {
            warn!("{} of {} agents failed", failed, outcomes.len());
        }

        PoolReport { outcomes }
    }
}
