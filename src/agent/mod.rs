// src/agent/mod.rs
//! Agent execution
//!
//! - **Runtime**: the [`Agent`] contract and the receive/dispatch loop
//! - **Pool**: one named OS thread per agent, lifecycle observation, joining
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────── Arc<Broker> ────────────┐
//!            ▼                  ▼                  ▼
//!     ┌────────────┐     ┌────────────┐     ┌────────────┐
//!     │ thread A   │     │ thread B   │     │ thread C   │
//!     │ run_agent  │     │ run_agent  │     │ run_agent  │
//!     │  handlers  │     │  handlers  │     │  handlers  │
//!     └────────────┘     └────────────┘     └────────────┘
//!            └──────────── AgentPool::join_all ────┘
//! ```

pub mod pool;
pub mod runtime;

// Re-export commonly used types
pub use pool::{AgentHandle, AgentOutcome, AgentPool, AgentPoolConfig, PoolReport, PoolStats};
pub use runtime::{run_agent, Agent, AgentState, Bindings, Context, StateCell};
