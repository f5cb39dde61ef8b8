// src/utils/mod.rs
//! Common utilities: error types, runtime configuration and the shutdown signal

pub mod config;
pub mod errors;
pub mod signal;

pub use config::BusConfig;
pub use errors::{BusError, Result};
