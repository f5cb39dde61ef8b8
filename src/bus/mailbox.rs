// src/bus/mailbox.rs
//! Per-agent inbox
//!
//! An unbounded multi-producer FIFO backed by `crossbeam-channel`. Any
//! thread may enqueue through a [`MailboxSender`]; only the owning agent's
//! loop dequeues.
//!
//! Dropping the [`Mailbox`] (on unregister) disconnects the channel once
//! the last in-flight sender is gone, which wakes a receiver blocked on it.

use crate::bus::message::{AgentId, Envelope};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::trace;

/// Outcome of a bounded wait on a mailbox
#[derive(Debug)]
pub enum Receipt {
    Message(Envelope),
    TimedOut,
    Closed,
}

/// Producer handle for one mailbox
#[derive(Clone)]
pub struct MailboxSender {
    owner: AgentId,
    sender: Sender<Envelope>,
}

impl MailboxSender {
    /// Enqueue without blocking; `false` if the mailbox is gone
    pub fn deliver(&self, envelope: Envelope) -> bool {
        trace!("Enqueueing {:?} for {}", envelope.kind(), self.owner);
        self.sender.send(envelope).is_ok()
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }
}

/// Consumer handle for one mailbox
#[derive(Clone)]
pub struct MailboxReceiver {
    owner: AgentId,
    receiver: Receiver<Envelope>,
}

impl MailboxReceiver {
    /// Block until a message arrives; `None` once the mailbox is discarded
    pub fn recv(&self) -> Option<Envelope> {
        let envelope = self.receiver.recv().ok()?;
        trace!("Dequeued {:?} for {}", envelope.kind(), self.owner);
        Some(envelope)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Receipt {
        match self.receiver.recv_timeout(timeout) {
            Ok(envelope) => Receipt::Message(envelope),
            Err(RecvTimeoutError::Timeout) => Receipt::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Receipt::Closed,
        }
    }
}

/// An agent's inbox, owned by the broker's registry
pub struct Mailbox {
    owner: AgentId,
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
}

impl Mailbox {
    pub fn new(owner: AgentId) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            owner,
            sender,
            receiver,
        }
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            owner: self.owner.clone(),
            sender: self.sender.clone(),
        }
    }

    pub fn receiver(&self) -> MailboxReceiver {
        MailboxReceiver {
            owner: self.owner.clone(),
            receiver: self.receiver.clone(),
        }
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Discard the mailbox, returning whatever was still queued
    pub fn drain(self) -> Vec<Envelope> {
        self.receiver.try_iter().collect()
    }
}
