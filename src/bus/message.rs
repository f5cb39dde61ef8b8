// src/bus/message.rs
//! Message identities and the envelope carried through mailboxes
//!
//! Two message shapes exist:
//!
//! - **Request**: routed to exactly one subscriber, answered through a
//!   [`Promise`](crate::bus::Promise) of type [`Request::Reply`]
//! - **Notification**: fanned out to every current subscriber, no reply
//!
//! Routing is keyed by the concrete Rust type of the message
//! ([`MessageKind`]); payloads are opaque to the broker.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of an agent (its name)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(Arc<str>);

impl AgentId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({:?})", &*self.0)
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AgentId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// Identity of one sent request
///
/// Allocated per send, so two structurally equal requests never share a
/// promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Routing key: the concrete type of a message
#[derive(Clone, Copy)]
pub struct MessageKind {
    id: TypeId,
    name: &'static str,
}

impl MessageKind {
    pub fn of<M: 'static>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for MessageKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageKind {}

impl Hash for MessageKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Anything that can travel through a mailbox
pub trait Message: Send + 'static {}

impl<T: Send + 'static> Message for T {}

/// A point-to-point message expecting exactly one reply
pub trait Request: Message {
    /// Value the handling agent resolves the sender's promise with
    type Reply: Send + 'static;
}

/// A fan-out message with no reply
///
/// One instance is shared by every receiving mailbox, hence `Sync`.
pub trait Notification: Message + Sync {}

pub(crate) enum Payload {
    Request {
        id: RequestId,
        body: Box<dyn Any + Send>,
    },
    Notification(Arc<dyn Any + Send + Sync>),
}

/// A message as it sits in a mailbox
pub struct Envelope {
    kind: MessageKind,
    payload: Payload,
}

impl Envelope {
    pub(crate) fn request<R: Request>(id: RequestId, body: R) -> Self {
        Self {
            kind: MessageKind::of::<R>(),
            payload: Payload::Request {
                id,
                body: Box::new(body),
            },
        }
    }

    pub(crate) fn notification(kind: MessageKind, body: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            kind,
            payload: Payload::Notification(body),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is<M: 'static>(&self) -> bool {
        self.kind == MessageKind::of::<M>()
    }

    pub fn is_request(&self) -> bool {
        matches!(self.payload, Payload::Request { .. })
    }

    /// Identity of the carried request, if this is one
    pub fn request_id(&self) -> Option<RequestId> {
        match &self.payload {
            Payload::Request { id, .. } => Some(*id),
            Payload::Notification(_) => None,
        }
    }

    /// Take the request out of the envelope
    ///
    /// Returns the envelope unchanged if it does not carry an `R`.
    pub fn into_request<R: Request>(self) -> std::result::Result<(RequestId, R), Envelope> {
        if !self.is::<R>() {
            return Err(self);
        }

        match self.payload {
            Payload::Request { id, body } => match body.downcast::<R>() {
                Ok(body) => Ok((id, *body)),
                Err(body) => Err(Envelope {
                    kind: self.kind,
                    payload: Payload::Request { id, body },
                }),
            },
            payload => Err(Envelope {
                kind: self.kind,
                payload,
            }),
        }
    }

    /// Borrow the carried notification
    pub fn notification_ref<N: Notification>(&self) -> Option<&N> {
        match &self.payload {
            Payload::Notification(body) => body.downcast_ref::<N>(),
            Payload::Request { .. } => None,
        }
    }

    /// Shared handle to the carried notification
    pub fn notification_arc<N: Notification>(&self) -> Option<Arc<N>> {
        match &self.payload {
            Payload::Notification(body) => Arc::clone(body).downcast::<N>().ok(),
            Payload::Request { .. } => None,
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Envelope");
        out.field("kind", &self.kind);
        if let Some(id) = self.request_id() {
            out.field("request_id", &id);
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Work(u32);

    impl Request for Work {
        type Reply = u32;
    }

    #[derive(Debug, PartialEq)]
    struct Ping;

    impl Notification for Ping {}

    #[test]
    fn test_agent_id_equality() {
        let a = AgentId::new("camera-1");
        let b = AgentId::from("camera-1".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "camera-1");
        assert_ne!(a, AgentId::from("camera-2"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let first = RequestId::next();
        let second = RequestId::next();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_message_kind_short_name() {
        let kind = MessageKind::of::<Work>();
        assert_eq!(kind.short_name(), "Work");
        assert_eq!(kind, MessageKind::of::<Work>());
        assert_ne!(kind, MessageKind::of::<Ping>());
    }

    #[test]
    fn test_request_envelope_roundtrip() {
        let id = RequestId::next();
        let envelope = Envelope::request(id, Work(7));

        assert!(envelope.is_request());
        assert!(envelope.is::<Work>());
        assert_eq!(envelope.request_id(), Some(id));

        let (got_id, work) = envelope.into_request::<Work>().unwrap();
        assert_eq!(got_id, id);
        assert_eq!(work, Work(7));
    }

    #[test]
    fn test_wrong_type_returns_envelope() {
        let envelope = Envelope::request(RequestId::next(), Work(1));
        let envelope = envelope.into_request::<WorkTwo>().unwrap_err();
        assert!(envelope.is::<Work>());
    }

    #[derive(Debug)]
    struct WorkTwo;

    impl Request for WorkTwo {
        type Reply = ();
    }

    #[test]
    fn test_notification_envelope_shares_payload() {
        let body: Arc<dyn Any + Send + Sync> = Arc::new(Ping);
        let first = Envelope::notification(MessageKind::of::<Ping>(), Arc::clone(&body));
        let second = Envelope::notification(MessageKind::of::<Ping>(), body);

        assert!(!first.is_request());
        assert_eq!(first.notification_ref::<Ping>(), Some(&Ping));

        let a = first.notification_arc::<Ping>().unwrap();
        let b = second.notification_arc::<Ping>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
