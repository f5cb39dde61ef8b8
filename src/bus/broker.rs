// src/bus/broker.rs
//! Central router owning every mailbox and routing table
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!  send_request ─▶│ request_rings   kind → [A, B, C] (ring)  │──▶ one mailbox
//!                 │ pending         id   → Promise           │
//!  send_notif.  ─▶│ notification    kind → {A, C} (snapshot) │──▶ every mailbox
//!                 │ mailboxes       agent → Mailbox          │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! - Registry, ring index and pending table are `DashMap`s (sharded locks)
//! - Each request ring has its own mutex; pop, liveness check and re-insert
//!   happen under it, so concurrent sends of one type never pick
//!   inconsistently or duplicate an agent
//! - Each notification set is a copy-on-write `Arc<Vec<_>>`; a send
//!   iterates the snapshot it grabbed, later subscribers are not included
//!
//! A map guard is never held while blocking on a mailbox.

use crate::bus::mailbox::{Mailbox, MailboxReceiver, MailboxSender, Receipt};
use crate::bus::message::{AgentId, Envelope, MessageKind, Notification, Request, RequestId};
use crate::bus::promise::{PendingSlot, Promise};
use crate::utils::errors::{BusError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

type RequestRing = Arc<Mutex<VecDeque<AgentId>>>;
type SubscriberSet = Arc<RwLock<Arc<Vec<AgentId>>>>;

/// Message broker shared by every agent of one bus
pub struct Broker {
    /// Agent → mailbox; an entry exists iff the agent is registered
    mailboxes: DashMap<AgentId, Mailbox>,

    /// Request kind → round-robin order of subscribers
    request_rings: DashMap<MessageKind, RequestRing>,

    /// Notification kind → subscribers
    notification_sets: DashMap<MessageKind, SubscriberSet>,

    /// In-flight request → promise handed to its sender
    pending: DashMap<RequestId, Box<dyn PendingSlot>>,

    counters: Counters,
}

#[derive(Default)]
struct Counters {
    requests_routed: AtomicU64,
    requests_unroutable: AtomicU64,
    notifications_sent: AtomicU64,
    notification_deliveries: AtomicU64,
    resolves: AtomicU64,
    stale_resolves: AtomicU64,
    stale_subscribers: AtomicU64,
    abandoned_requests: AtomicU64,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            mailboxes: DashMap::new(),
            request_rings: DashMap::new(),
            notification_sets: DashMap::new(),
            pending: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Allocate a mailbox for `agent`; no-op if it already has one
    pub fn register(&self, agent: &AgentId) {
        match self.mailboxes.entry(agent.clone()) {
            Entry::Occupied(_) => {
                debug!("Agent {} already registered", agent);
            }
            Entry::Vacant(slot) => {
                slot.insert(Mailbox::new(agent.clone()));
                info!("Registered agent {}", agent);
            }
        }
        metrics::gauge!("bus_registered_agents").set(self.mailboxes.len() as f64);
    }

    /// Discard `agent`'s mailbox and remove it from every routing table
    ///
    /// Messages still queued are dropped. Pending entries of requests that
    /// were queued there are dropped too; their promises stay unresolved.
    pub fn unregister(&self, agent: &AgentId) {
        let mailbox = self.mailboxes.remove(agent).map(|(_, mailbox)| mailbox);

        let rings: Vec<RequestRing> = self
            .request_rings
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for ring in rings {
            ring.lock().retain(|member| member != agent);
        }

        let sets: Vec<SubscriberSet> = self
            .notification_sets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for set in sets {
            let mut members = set.write();
            if members.contains(agent) {
                Arc::make_mut(&mut members).retain(|member| member != agent);
            }
        }

        match mailbox {
            Some(mailbox) => {
                let mut dropped = 0usize;
                for envelope in mailbox.drain() {
                    if let Some(id) = envelope.request_id() {
                        if self.pending.remove(&id).is_some() {
                            self.counters.abandoned_requests.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    dropped += 1;
                }
                if dropped > 0 {
                    warn!("Unregistered agent {} with {} undelivered messages", agent, dropped);
                } else {
                    info!("Unregistered agent {}", agent);
                }
            }
            None => debug!("Unregister of unknown agent {}", agent),
        }

        metrics::gauge!("bus_registered_agents").set(self.mailboxes.len() as f64);
        metrics::gauge!("bus_pending_requests").set(self.pending.len() as f64);
    }

    /// Append `agent` to the round-robin ring of request type `R`
    pub fn subscribe_request<R: Request>(&self, agent: &AgentId) {
        let kind = MessageKind::of::<R>();
        let ring = Arc::clone(self.request_rings.entry(kind).or_default().value());

        let mut ring = ring.lock();
        if ring.contains(agent) {
            debug!("{} already subscribed to request {:?}", agent, kind);
            return;
        }
        ring.push_back(agent.clone());
        debug!("{} subscribed to request {:?} (position {})", agent, kind, ring.len());
    }

    /// Add `agent` to the subscribers of notification type `N`
    pub fn subscribe_notification<N: Notification>(&self, agent: &AgentId) {
        let kind = MessageKind::of::<N>();
        let set = Arc::clone(self.notification_sets.entry(kind).or_default().value());

        let mut members = set.write();
        if members.contains(agent) {
            debug!("{} already subscribed to notification {:?}", agent, kind);
            return;
        }
        Arc::make_mut(&mut members).push(agent.clone());
        debug!("{} subscribed to notification {:?}", agent, kind);
    }

    /// Route `request` to the next live subscriber of its type
    ///
    /// `None` means nobody could take it: no promise is created and the
    /// request is dropped.
    pub fn send_request<R: Request>(&self, request: R) -> Option<Promise<R::Reply>> {
        let kind = MessageKind::of::<R>();

        let Some((target, sender)) = self.next_subscriber(kind) else {
            self.record_unroutable(kind);
            return None;
        };

        let id = RequestId::next();
        let promise = Promise::new();

        if !self.deliver_request(&target, &sender, id, &promise, request) {
            warn!("Mailbox of {} vanished while routing {} ({:?})", target, id, kind);
            self.record_unroutable(kind);
            return None;
        }

        debug!("Routed {} ({:?}) to {}", id, kind, target);
        self.counters.requests_routed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bus_requests_routed_total", "kind" => kind.short_name()).increment(1);
        metrics::gauge!("bus_pending_requests").set(self.pending.len() as f64);

        Some(promise)
    }

    /// Deliver `notification` to every agent subscribed at call time
    ///
    /// Returns the number of mailboxes it reached.
    pub fn send_notification<N: Notification>(&self, notification: N) -> usize {
        let kind = MessageKind::of::<N>();
        let snapshot = self.notification_snapshot(kind);

        let body: Arc<dyn Any + Send + Sync> = Arc::new(notification);
        let mut delivered = 0usize;

        for agent in snapshot.iter() {
            let Some(sender) = self.sender_of(agent) else {
                trace!("Skipping unregistered subscriber {} for {:?}", agent, kind);
                continue;
            };
            if sender.deliver(Envelope::notification(kind, Arc::clone(&body))) {
                delivered += 1;
            }
        }

        trace!("Notification {:?} fanned out to {} agents", kind, delivered);
        self.counters.notifications_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .notification_deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        metrics::counter!("bus_notifications_sent_total", "kind" => kind.short_name()).increment(1);
        metrics::counter!("bus_notification_deliveries_total").increment(delivered as u64);

        delivered
    }

    /// Resolve the promise of request `id`
    ///
    /// Unknown or already-resolved ids are ignored. Returns whether this
    /// call set the value.
    pub fn resolve<R: Request>(&self, id: RequestId, value: R::Reply) -> bool {
        let Some((_, slot)) = self.pending.remove(&id) else {
            debug!("Ignoring resolve of unknown request {}", id);
            self.counters.stale_resolves.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("bus_stale_resolves_total").increment(1);
            return false;
        };

        match slot.resolve_boxed(Box::new(value)) {
            Ok(resolved) => {
                trace!("Resolved {}", id);
                self.counters.resolves.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("bus_resolves_total").increment(1);
                metrics::gauge!("bus_pending_requests").set(self.pending.len() as f64);
                resolved
            }
            Err(_) => {
                warn!(
                    "Reply type {} does not match promise of {}",
                    std::any::type_name::<R::Reply>(),
                    id
                );
                self.pending.insert(id, slot);
                false
            }
        }
    }

    /// Block until `agent`'s mailbox yields a message
    ///
    /// Fails with [`BusError::NotRegistered`] if the agent has no mailbox,
    /// or loses it while waiting.
    pub fn receive(&self, agent: &AgentId) -> Result<Envelope> {
        let receiver = self.receiver_of(agent)?;
        receiver
            .recv()
            .ok_or_else(|| BusError::NotRegistered(agent.to_string()))
    }

    /// Like [`receive`](Self::receive) but gives up after `timeout`
    pub fn receive_timeout(&self, agent: &AgentId, timeout: Duration) -> Result<Option<Envelope>> {
        let receiver = self.receiver_of(agent)?;
        match receiver.recv_timeout(timeout) {
            Receipt::Message(envelope) => Ok(Some(envelope)),
            Receipt::TimedOut => Ok(None),
            Receipt::Closed => Err(BusError::NotRegistered(agent.to_string())),
        }
    }

    /// Drop pending entries whose sender no longer holds the promise
    ///
    /// Such replies can never be observed. Returns the number evicted.
    pub fn purge_orphaned(&self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, slot| !slot.is_orphaned());
        let evicted = before.saturating_sub(self.pending.len());

        if evicted > 0 {
            debug!("Purged {} orphaned pending requests", evicted);
            self.counters
                .abandoned_requests
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        metrics::gauge!("bus_pending_requests").set(self.pending.len() as f64);
        evicted
    }

    pub fn is_registered(&self, agent: &AgentId) -> bool {
        self.mailboxes.contains_key(agent)
    }

    /// Number of queued messages for `agent`
    pub fn mailbox_len(&self, agent: &AgentId) -> Option<usize> {
        self.mailboxes.get(agent).map(|mailbox| mailbox.len())
    }

    /// Ring order for request type `R`, next pick first
    pub fn request_subscribers<R: Request>(&self) -> Vec<AgentId> {
        let Some(ring) = self
            .request_rings
            .get(&MessageKind::of::<R>())
            .map(|ring| Arc::clone(ring.value()))
        else {
            return Vec::new();
        };

        let members: Vec<AgentId> = ring.lock().iter().cloned().collect();
        members
    }

    /// Current subscribers of notification type `N`
    pub fn notification_subscribers<N: Notification>(&self) -> Vec<AgentId> {
        self.notification_snapshot(MessageKind::of::<N>()).to_vec()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.counters;
        BrokerStats {
            registered_agents: self.mailboxes.len(),
            pending_requests: self.pending.len(),
            requests_routed: c.requests_routed.load(Ordering::Relaxed),
            requests_unroutable: c.requests_unroutable.load(Ordering::Relaxed),
            notifications_sent: c.notifications_sent.load(Ordering::Relaxed),
            notification_deliveries: c.notification_deliveries.load(Ordering::Relaxed),
            resolves: c.resolves.load(Ordering::Relaxed),
            stale_resolves: c.stale_resolves.load(Ordering::Relaxed),
            stale_subscribers: c.stale_subscribers.load(Ordering::Relaxed),
            abandoned_requests: c.abandoned_requests.load(Ordering::Relaxed),
        }
    }

    /// Pop ring entries until one has a live mailbox, then rotate it to the tail
    fn next_subscriber(&self, kind: MessageKind) -> Option<(AgentId, MailboxSender)> {
        let ring = self
            .request_rings
            .get(&kind)
            .map(|ring| Arc::clone(ring.value()))?;

        let mut ring = ring.lock();
        while let Some(candidate) = ring.pop_front() {
            match self.sender_of(&candidate) {
                Some(sender) => {
                    ring.push_back(candidate.clone());
                    return Some((candidate, sender));
                }
                None => {
                    debug!("Discarding stale subscriber {} from {:?}", candidate, kind);
                    self.counters.stale_subscribers.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("bus_stale_subscribers_total").increment(1);
                }
            }
        }
        None
    }

    /// Register the pending entry, then enqueue the request for `target`
    ///
    /// Returns `false` (and drops the entry) when `target` was unregistered
    /// before or during delivery. Its mailbox drain may already have run, so
    /// nothing else would ever clear the entry.
    fn deliver_request<R: Request>(
        &self,
        target: &AgentId,
        sender: &MailboxSender,
        id: RequestId,
        promise: &Promise<R::Reply>,
        request: R,
    ) -> bool {
        // The promise must be findable before the handler can possibly run.
        self.pending.insert(id, Box::new(promise.clone()));

        if sender.deliver(Envelope::request(id, request)) && self.is_registered(target) {
            return true;
        }

        if self.pending.remove(&id).is_some() {
            self.counters.abandoned_requests.fetch_add(1, Ordering::Relaxed);
        }
        false
    }

    fn notification_snapshot(&self, kind: MessageKind) -> Arc<Vec<AgentId>> {
        let Some(set) = self
            .notification_sets
            .get(&kind)
            .map(|set| Arc::clone(set.value()))
        else {
            return Arc::default();
        };

        let snapshot = Arc::clone(&*set.read());
        snapshot
    }

    fn sender_of(&self, agent: &AgentId) -> Option<MailboxSender> {
        self.mailboxes.get(agent).map(|mailbox| mailbox.sender())
    }

    fn receiver_of(&self, agent: &AgentId) -> Result<MailboxReceiver> {
        self.mailboxes
            .get(agent)
            .map(|mailbox| mailbox.receiver())
            .ok_or_else(|| BusError::NotRegistered(agent.to_string()))
    }

    fn record_unroutable(&self, kind: MessageKind) {
        debug!("No live subscriber for request {:?}", kind);
        self.counters.requests_unroutable.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bus_requests_unroutable_total", "kind" => kind.short_name()).increment(1);
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker statistics
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    pub registered_agents: usize,
    pub pending_requests: usize,

    /// Requests delivered to a mailbox
    pub requests_routed: u64,

    /// Requests that found no live subscriber
    pub requests_unroutable: u64,

    pub notifications_sent: u64,

    /// Sum over notifications of the mailboxes reached
    pub notification_deliveries: u64,

    pub resolves: u64,

    /// Resolves of unknown or already-resolved requests
    pub stale_resolves: u64,

    /// Ring entries discarded because their agent was gone
    pub stale_subscribers: u64,

    /// Pending entries dropped without a reply (unregister or purge)
    pub abandoned_requests: u64,
}
