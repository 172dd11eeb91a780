//! Zero-buffer point-to-point wire.
//!
//! Each [`WirePort`] owns a single outgoing register. The peer reads that
//! register directly; a message sent at time `t` becomes visible at any
//! time after `t`, so a wire costs exactly one cycle of latency for
//! whichever clock the receiver runs on. Likewise a register emptied at
//! `t` accepts a new message only after `t`, so two ends ticking at the
//! same instant see the same outcome in any dispatch order.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::engine::Engine;
use crate::error::{Direction, SendError};
use crate::hook::{Hook, HookCtx, HookPos, Hookable, Hooks};
use crate::msg::{Message, RemotePort};
use crate::port::{validate_outgoing, Component, Port};
use crate::time::VirtualTime;

/// Joins two [`WirePort`]s.
pub struct Wire {
    name: String,
    engine: Arc<dyn Engine>,
    me: Weak<Wire>,
    ends: Mutex<Option<[Weak<WirePort>; 2]>>,
}

impl Wire {
    pub fn new(name: impl Into<String>, engine: Arc<dyn Engine>) -> Arc<Wire> {
        let name = name.into();
        Arc::new_cyclic(|me| Wire {
            name,
            engine,
            me: me.clone(),
            ends: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect `left` and `right`.
    ///
    /// # Panics
    /// Panics if the wire or either port is already plugged in.
    pub fn plug_in(&self, left: &Arc<WirePort>, right: &Arc<WirePort>) {
        {
            let mut ends = self.ends.lock();
            assert!(ends.is_none(), "wire {} is already connected", self.name);
            *ends = Some([Arc::downgrade(left), Arc::downgrade(right)]);
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        for (side, port) in [left, right].into_iter().enumerate() {
            let link = WireLink {
                wire: me.clone(),
                side,
            };
            if port.link.set(link).is_err() {
                panic!("wire port {} is already plugged in", port.name);
            }
        }
        tracing::debug!(wire = %self.name, left = %left.name, right = %right.name, "plugged in");
    }

    fn peer_of(&self, side: usize) -> Option<Arc<WirePort>> {
        self.ends.lock().as_ref()?[1 - side].upgrade()
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire").field("name", &self.name).finish()
    }
}

struct WireLink {
    wire: Arc<Wire>,
    side: usize,
}

#[derive(Default)]
struct Register {
    /// The message this end has sent and the time it was sent.
    slot: Option<(Message, VirtualTime)>,
    /// When the peer last emptied the slot.
    freed_at: Option<VirtualTime>,
}

impl Register {
    fn accepts(&self, now: Option<VirtualTime>) -> bool {
        match (&self.slot, self.freed_at, now) {
            (Some(_), _, _) => false,
            (None, Some(freed), Some(now)) => freed < now,
            (None, _, _) => true,
        }
    }
}

/// One end of a [`Wire`].
pub struct WirePort {
    name: String,
    owner: Weak<dyn Component>,
    register: Mutex<Register>,
    link: OnceLock<WireLink>,
    hooks: Hooks,
}

impl WirePort {
    pub fn new(name: impl Into<String>, owner: Weak<dyn Component>) -> Self {
        WirePort {
            name: name.into(),
            owner,
            register: Mutex::new(Register::default()),
            link: OnceLock::new(),
            hooks: Hooks::new(),
        }
    }

    fn link(&self) -> &WireLink {
        match self.link.get() {
            Some(link) => link,
            None => panic!("wire port {} is not plugged in", self.name),
        }
    }

    fn now(&self) -> Option<VirtualTime> {
        self.link.get().map(|link| link.wire.engine.now())
    }

    fn peer(&self) -> Option<Arc<WirePort>> {
        let link = self.link();
        link.wire.peer_of(link.side)
    }

    /// Lift the peer's message out of its register if it is visible at
    /// `now`. `take` decides between retrieving and peeking.
    fn read_peer(&self, take: bool) -> Option<(Arc<WirePort>, Message)> {
        let peer = self.peer()?;
        let now = self.link().wire.engine.now();
        let msg = {
            let mut reg = peer.register.lock();
            match reg.slot.as_ref() {
                Some((_, sent_at)) if *sent_at < now => {}
                _ => return None,
            }
            if take {
                reg.freed_at = Some(now);
                reg.slot.take().map(|(msg, _)| msg)
            } else {
                reg.slot.as_ref().map(|(msg, _)| msg.clone())
            }
        }?;
        Some((peer, msg))
    }
}

impl Port for WirePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_remote(&self) -> RemotePort {
        RemotePort::new(self.name.as_str())
    }

    fn send(&self, msg: Message) -> Result<(), SendError> {
        validate_outgoing(&self.name, &msg);
        let now = self.link().wire.engine.now();
        let observed = {
            let mut reg = self.register.lock();
            if !reg.accepts(Some(now)) {
                tracing::debug!(port = %self.name, msg = %msg, "wire register occupied");
                return Err(SendError {
                    port: self.as_remote(),
                    direction: Direction::Outgoing,
                });
            }
            let observed = (!self.hooks.is_empty()).then(|| msg.clone());
            reg.slot = Some((msg, now));
            observed
        };
        if let Some(msg) = observed {
            self.hooks
                .invoke_hook(&HookCtx::new(&self.name, HookPos::PortMsgSend, &msg).at(now));
        }
        if let Some(peer) = self.peer() {
            if let Some(owner) = peer.owner.upgrade() {
                owner.notify_recv(&peer.as_remote());
            }
        }
        Ok(())
    }

    fn can_send(&self) -> bool {
        let now = self.now();
        self.register.lock().accepts(now)
    }

    fn retrieve_incoming(&self) -> Option<Message> {
        let (peer, msg) = self.read_peer(true)?;
        self.hooks
            .invoke_hook(&HookCtx::new(&self.name, HookPos::PortMsgRetrieve, &msg));
        if let Some(owner) = peer.owner.upgrade() {
            owner.notify_port_free(&peer.as_remote());
        }
        Some(msg)
    }

    fn peek_incoming(&self) -> Option<Message> {
        self.read_peer(false).map(|(_, msg)| msg)
    }
}

impl Hookable for WirePort {
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

impl std::fmt::Debug for WirePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WirePort")
            .field("name", &self.name)
            .field("occupied", &!self.can_send())
            .finish()
    }
}
