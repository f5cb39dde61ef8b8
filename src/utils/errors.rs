// src/utils/errors.rs
//! Error types for the message bus
//!
//! Only invalid usage is reported as an error. Routing misses, stale
//! resolves and unbound messages are normal outcomes and never surface here.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the broker, the agent runtime and the simulation layer
#[derive(Debug, Error)]
pub enum BusError {
    /// Mailbox access for an agent that has no mailbox
    #[error("agent '{0}' is not registered")]
    NotRegistered(String),

    /// A handler returned an error; the agent's loop stopped
    #[error("handler for {message} failed in agent '{agent}': {source}")]
    HandlerFailed {
        agent: String,
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Agent initialization returned an error before the loop started
    #[error("agent '{agent}' failed to initialize: {source}")]
    InitializationFailed {
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    /// Another live agent in the pool already uses this name
    #[error("agent '{0}' is already running")]
    DuplicateAgent(String),

    /// The agent thread panicked
    #[error("agent '{0}' panicked")]
    AgentPanicked(String),

    /// The OS refused to spawn an agent thread
    #[error("failed to spawn thread for agent '{agent}': {source}")]
    ThreadSpawn {
        agent: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("fixture error: {0}")]
    FixtureError(String),

    #[error("report error: {0}")]
    ReportError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BusError {
    /// Whether this error only concerns a missing mailbox
    pub fn is_not_registered(&self) -> bool {
        matches!(self, BusError::NotRegistered(_))
    }
}

impl From<config::ConfigError> for BusError {
    fn from(err: config::ConfigError) -> Self {
        BusError::ConfigError(err.to_string())
    }
}
