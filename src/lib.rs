// src/lib.rs
//! Sentra Lab Message Bus Library
//!
//! An in-process actor message bus: named agents, each on its own thread,
//! exchange typed requests (answered through promises) and broadcast
//! notifications through a shared broker.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **bus**: broker, mailboxes, promises and message identities
//! - **agent**: the agent run-loop contract and the thread-per-agent pool
//! - **sim**: a perception/mapping simulation built on the bus
//! - **observability**: tracing and metrics setup
//! - **utils**: errors and configuration

// Public module exports
pub mod agent;
pub mod bus;
pub mod observability;
pub mod sim;
pub mod utils;

// Re-export commonly used types
pub use agent::{Agent, AgentPool, AgentPoolConfig, AgentState, Bindings, Context};
pub use bus::{AgentId, Broker, Notification, Promise, Request, RequestId};
pub use utils::config::BusConfig;
pub use utils::errors::{BusError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
