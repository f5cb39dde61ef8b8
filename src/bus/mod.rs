// src/bus/mod.rs
//! In-process message bus
//!
//! This module provides the routing core shared by every agent:
//!
//! - **Broker**: mailbox registry, round-robin request rings, notification
//!   subscriber sets and the pending-request table
//! - **Mailbox**: unbounded per-agent FIFO with blocking dequeue
//! - **Promise**: single-assignment reply cell with blocking and timed reads
//! - **Message**: agent/request identities and the mailbox envelope
//!
//! # Data flow
//!
//! ```text
//!  sender ── send_request(r) ──▶ Broker ── ring pick ──▶ Mailbox(B) ──▶ B's loop
//!    │                             │                                      │
//!    └── Promise::get() ◀── resolve(id, value) ◀──────────── handler ─────┘
//!
//!  clock ── send_notification(n) ──▶ Broker ──▶ Mailbox(A), Mailbox(B), ...
//! ```
//!
//! # Guarantees
//!
//! - FIFO within one mailbox; nothing across mailboxes
//! - A request reaches at most one agent; its promise resolves at most once
//! - Round-robin order follows subscription order among live subscribers

pub mod broker;
pub mod mailbox;
pub mod message;
pub mod promise;

// Re-export commonly used types
pub use broker::{Broker, BrokerStats};
pub use mailbox::{Mailbox, MailboxReceiver, MailboxSender, Receipt};
pub use message::{AgentId, Envelope, Message, MessageKind, Notification, Request, RequestId};
pub use promise::Promise;
