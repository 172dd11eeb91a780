//! Ports: component endpoints.
//!
//! A component talks to the outside world only through the [`Port`]
//! trait. [`BufferedPort`] wraps an incoming and an outgoing [`Buffer`]
//! and is what a [`DirectConnection`](crate::connection::DirectConnection)
//! plugs into; [`WirePort`](crate::connection::WirePort) is the
//! zero-buffer alternative.
//!
//! Notifications are edge-triggered. Notifications and hooks are always
//! issued after the port's lock is released, so the notified party or an
//! observing hook may call straight back into the port.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::buffer::Buffer;
use crate::connection::Connection;
use crate::error::{Direction, SendError};
use crate::event::Handler;
use crate::hook::{Hook, HookCtx, HookPos, Hookable, Hooks};
use crate::msg::{Message, RemotePort};

// ── Contracts ─────────────────────────────────────────────────────────

/// The component-facing side of a port.
pub trait Port: Hookable + Send + Sync {
    fn name(&self) -> &str;

    fn as_remote(&self) -> RemotePort;

    /// Queue `msg` for the connection.
    ///
    /// # Panics
    /// Panics if `msg.src` is not this port, `msg.dst` is empty, or
    /// `msg.src == msg.dst`.
    fn send(&self, msg: Message) -> Result<(), SendError>;

    fn can_send(&self) -> bool;

    /// Take the oldest received message.
    fn retrieve_incoming(&self) -> Option<Message>;

    /// Look at the oldest received message without taking it.
    fn peek_incoming(&self) -> Option<Message>;
}

/// A simulated component: a handler that owns ports and reacts to their
/// notifications.
pub trait Component: Handler + PortOwner {
    fn name(&self) -> &str;

    /// A message arrived at a previously empty port.
    fn notify_recv(&self, port: &RemotePort);

    /// A previously full outgoing path has room again.
    fn notify_port_free(&self, port: &RemotePort);
}

pub trait PortOwner {
    /// # Panics
    /// Panics if a port with the same name is already registered.
    fn add_port(&self, port: Arc<dyn Port>);

    fn port_by_name(&self, name: &str) -> Option<Arc<dyn Port>>;

    fn ports(&self) -> Vec<Arc<dyn Port>>;
}

/// Reusable [`PortOwner`] storage, keyed by the port's short name.
#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<BTreeMap<String, Arc<dyn Port>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `key`.
    ///
    /// # Panics
    /// Panics if `key` is taken.
    pub fn insert(&self, key: impl Into<String>, port: Arc<dyn Port>) {
        let key = key.into();
        let mut ports = self.ports.write();
        assert!(!ports.contains_key(&key), "port {key} is already registered");
        ports.insert(key, port);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Port>> {
        self.ports.read().get(key).cloned()
    }

    /// Look up by full port name (`component.port`).
    pub fn find(&self, full_name: &str) -> Option<Arc<dyn Port>> {
        self.ports
            .read()
            .values()
            .find(|p| p.name() == full_name)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Port>> {
        self.ports.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }
}

impl PortOwner for PortRegistry {
    fn add_port(&self, port: Arc<dyn Port>) {
        let key = port.name().to_string();
        self.insert(key, port);
    }

    fn port_by_name(&self, name: &str) -> Option<Arc<dyn Port>> {
        self.get(name).or_else(|| self.find(name))
    }

    fn ports(&self) -> Vec<Arc<dyn Port>> {
        self.all()
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ports.read().keys()).finish()
    }
}

/// Panics unless `msg` may leave through the port named `port`.
pub(crate) fn validate_outgoing(port: &str, msg: &Message) {
    assert!(
        msg.src().as_str() == port,
        "message {} sent through {port} but its src is {}",
        msg.id(),
        msg.src()
    );
    assert!(!msg.dst().is_empty(), "message {} has no dst", msg.id());
    assert!(
        msg.src() != msg.dst(),
        "message {} is addressed to its own src {}",
        msg.id(),
        msg.src()
    );
}

// ── BufferedPort ──────────────────────────────────────────────────────

struct PortBuffers {
    incoming: Buffer<Message>,
    outgoing: Buffer<Message>,
}

/// A port with one incoming and one outgoing bounded buffer.
pub struct BufferedPort {
    name: String,
    owner: Weak<dyn Component>,
    conn: RwLock<Option<Arc<dyn Connection>>>,
    bufs: Mutex<PortBuffers>,
    hooks: Hooks,
}

impl BufferedPort {
    /// A port with `capacity` slots in each direction.
    pub fn new(name: impl Into<String>, owner: Weak<dyn Component>, capacity: usize) -> Self {
        Self::with_capacities(name, owner, capacity, capacity)
    }

    pub fn with_capacities(
        name: impl Into<String>,
        owner: Weak<dyn Component>,
        incoming: usize,
        outgoing: usize,
    ) -> Self {
        let name = name.into();
        BufferedPort {
            bufs: Mutex::new(PortBuffers {
                incoming: Buffer::new(format!("{name}.In"), incoming),
                outgoing: Buffer::new(format!("{name}.Out"), outgoing),
            }),
            owner,
            conn: RwLock::new(None),
            hooks: Hooks::new(),
            name,
        }
    }

    /// Attach the connection this port is plugged into.
    ///
    /// # Panics
    /// Panics if the port is already plugged in.
    pub fn set_connection(&self, conn: Arc<dyn Connection>) {
        let mut slot = self.conn.write();
        if let Some(existing) = slot.as_ref() {
            panic!(
                "port {} is already plugged into {}",
                self.name,
                existing.name()
            );
        }
        *slot = Some(conn);
    }

    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.conn.read().clone()
    }

    /// Connection-facing: put `msg` into the incoming buffer.
    pub fn deliver(&self, msg: Message) -> Result<(), SendError> {
        let (became_non_empty, observed) = {
            let mut bufs = self.bufs.lock();
            if !bufs.incoming.can_push() {
                tracing::debug!(port = %self.name, msg = %msg, "incoming buffer full");
                return Err(SendError {
                    port: self.as_remote(),
                    direction: Direction::Incoming,
                });
            }
            let observed = self.observed(&msg);
            bufs.incoming.push(msg);
            (bufs.incoming.size() == 1, observed)
        };
        if let Some(msg) = observed {
            self.hooks
                .invoke_hook(&HookCtx::new(&self.name, HookPos::PortMsgRecvd, &msg));
        }
        if became_non_empty {
            if let Some(owner) = self.owner.upgrade() {
                owner.notify_recv(&self.as_remote());
            }
        }
        Ok(())
    }

    /// A copy of `msg` for the hooks, taken while the buffers are locked
    /// and handed to them after the lock is released.
    fn observed(&self, msg: &Message) -> Option<Message> {
        (!self.hooks.is_empty()).then(|| msg.clone())
    }

    /// Connection-facing: take the oldest queued outgoing message.
    pub fn retrieve_outgoing(&self) -> Option<Message> {
        let (msg, was_full) = {
            let mut bufs = self.bufs.lock();
            let was_full = !bufs.outgoing.can_push();
            (bufs.outgoing.pop()?, was_full)
        };
        if was_full {
            if let Some(owner) = self.owner.upgrade() {
                owner.notify_port_free(&self.as_remote());
            }
        }
        Some(msg)
    }

    pub fn peek_outgoing(&self) -> Option<Message> {
        self.bufs.lock().outgoing.peek().cloned()
    }

    /// Connection-facing: some destination has room again.
    pub fn notify_available(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.notify_port_free(&self.as_remote());
        }
    }

    pub fn incoming_len(&self) -> usize {
        self.bufs.lock().incoming.size()
    }

    pub fn outgoing_len(&self) -> usize {
        self.bufs.lock().outgoing.size()
    }

    /// `(incoming, outgoing)` capacities.
    pub fn capacities(&self) -> (usize, usize) {
        let bufs = self.bufs.lock();
        (bufs.incoming.capacity(), bufs.outgoing.capacity())
    }
}

impl Port for BufferedPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_remote(&self) -> RemotePort {
        RemotePort::new(self.name.as_str())
    }

    fn send(&self, msg: Message) -> Result<(), SendError> {
        validate_outgoing(&self.name, &msg);
        let (became_non_empty, observed) = {
            let mut bufs = self.bufs.lock();
            if !bufs.outgoing.can_push() {
                tracing::debug!(port = %self.name, msg = %msg, "outgoing buffer full");
                return Err(SendError {
                    port: self.as_remote(),
                    direction: Direction::Outgoing,
                });
            }
            let observed = self.observed(&msg);
            bufs.outgoing.push(msg);
            (bufs.outgoing.size() == 1, observed)
        };
        if let Some(msg) = observed {
            self.hooks
                .invoke_hook(&HookCtx::new(&self.name, HookPos::PortMsgSend, &msg));
        }
        if became_non_empty {
            if let Some(conn) = self.connection() {
                conn.notify_send();
            }
        }
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.bufs.lock().outgoing.can_push()
    }

    fn retrieve_incoming(&self) -> Option<Message> {
        let (msg, was_full) = {
            let mut bufs = self.bufs.lock();
            let was_full = !bufs.incoming.can_push();
            (bufs.incoming.pop()?, was_full)
        };
        self.hooks
            .invoke_hook(&HookCtx::new(&self.name, HookPos::PortMsgRetrieve, &msg));
        if was_full {
            if let Some(conn) = self.connection() {
                conn.notify_available(&self.as_remote());
            }
        }
        Some(msg)
    }

    fn peek_incoming(&self) -> Option<Message> {
        self.bufs.lock().incoming.peek().cloned()
    }
}

impl Hookable for BufferedPort {
    fn accept_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.accept_hook(hook);
    }

    fn num_hooks(&self) -> usize {
        self.hooks.num_hooks()
    }

    fn invoke_hook(&self, ctx: &HookCtx<'_>) {
        self.hooks.invoke_hook(ctx);
    }
}

impl std::fmt::Debug for BufferedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bufs = self.bufs.lock();
        f.debug_struct("BufferedPort")
            .field("name", &self.name)
            .field("incoming", &bufs.incoming.size())
            .field("outgoing", &bufs.outgoing.size())
            .finish()
    }
}
