//! Messages exchanged between ports.
//!
//! A message addresses ports by name through [`RemotePort`], never by
//! holding a live reference. Connections resolve the name when they
//! deliver, which keeps component boundaries free of object references.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::time::VirtualTime;

// ── RemotePort ────────────────────────────────────────────────────────

/// Name-based reference to a port.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemotePort(String);

impl RemotePort {
    pub fn new(name: impl Into<String>) -> Self {
        RemotePort(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RemotePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemotePort {
    fn from(name: &str) -> Self {
        RemotePort::new(name)
    }
}

// ── Message ID ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgId(u64);

impl MsgId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        MsgId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M#{}", self.0)
    }
}

/// Strictly-increasing message-ID generator.
///
/// Each sending component owns one, so IDs are reproducible run to run
/// regardless of how many simulations share the process.
#[derive(Debug, Default)]
pub struct MsgIdGen {
    next: AtomicU64,
}

impl MsgIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> MsgId {
        MsgId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ── Message ───────────────────────────────────────────────────────────

/// Routing metadata shared by every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMeta {
    pub id: MsgId,
    pub src: RemotePort,
    pub dst: RemotePort,
    pub traffic_class: u32,
    pub traffic_bytes: u64,
    /// Stamped by the sending component; informational only.
    pub send_time: Option<VirtualTime>,
}

/// A message plus its typed payload.
///
/// Cloning is cheap: the payload is shared. Receivers recover the
/// concrete payload with [`Message::payload`].
#[derive(Clone)]
pub struct Message {
    meta: MsgMeta,
    payload: Arc<dyn Any + Send + Sync>,
    payload_type: &'static str,
}

impl Message {
    pub fn new<P>(id: MsgId, src: RemotePort, dst: RemotePort, payload: P) -> Self
    where
        P: Any + Send + Sync,
    {
        Message {
            meta: MsgMeta {
                id,
                src,
                dst,
                traffic_class: 0,
                traffic_bytes: 0,
                send_time: None,
            },
            payload: Arc::new(payload),
            payload_type: std::any::type_name::<P>(),
        }
    }

    pub fn with_traffic(mut self, class: u32, bytes: u64) -> Self {
        self.meta.traffic_class = class;
        self.meta.traffic_bytes = bytes;
        self
    }

    pub fn with_send_time(mut self, at: VirtualTime) -> Self {
        self.meta.send_time = Some(at);
        self
    }

    pub fn meta(&self) -> &MsgMeta {
        &self.meta
    }

    pub fn id(&self) -> MsgId {
        self.meta.id
    }

    pub fn src(&self) -> &RemotePort {
        &self.meta.src
    }

    pub fn dst(&self) -> &RemotePort {
        &self.meta.dst
    }

    /// Downcast the payload.
    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }

    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("meta", &self.meta)
            .field("payload", &self.payload_type)
            .finish()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({} → {})", self.meta.id, self.meta.src, self.meta.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Req {
        seq: u32,
    }

    #[test]
    fn test_id_gen_monotonic() {
        let gen = MsgIdGen::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert!(a < b);
    }

    #[test]
    fn test_payload_downcast() {
        let msg = Message::new(MsgId::new(7), "A.Out".into(), "B.In".into(), Req { seq: 3 });
        assert_eq!(msg.payload::<Req>(), Some(&Req { seq: 3 }));
        assert!(msg.payload::<u32>().is_none());
        assert!(msg.payload_type().ends_with("Req"));
    }

    #[test]
    fn test_builder_fields() {
        let msg = Message::new(MsgId::new(1), "A".into(), "B".into(), ())
            .with_traffic(2, 64)
            .with_send_time(VirtualTime::from_ns(4));
        assert_eq!(msg.meta().traffic_class, 2);
        assert_eq!(msg.meta().traffic_bytes, 64);
        assert_eq!(msg.meta().send_time, Some(VirtualTime::from_ns(4)));
        assert_eq!(msg.to_string(), "M#1(A → B)");
    }

    #[test]
    fn test_remote_port_empty() {
        assert!(RemotePort::default().is_empty());
        assert!(!RemotePort::new("x").is_empty());
    }
}
