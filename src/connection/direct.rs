//! Star connection that forwards between every plugged port.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::Connection;
use crate::engine::Engine;
use crate::error::{SimError, SimResult};
use crate::event::{Event, Handler};
use crate::hook::{Hook, HookCtx, HookPos, Hookable, Hooks};
use crate::msg::RemotePort;
use crate::port::{BufferedPort, Port};
use crate::tick::{TickEvent, TickScheduler, Ticker};
use crate::time::{Frequency, VirtualTime};

#[derive(Default)]
struct Plugged {
    ports: Vec<Weak<BufferedPort>>,
    by_name: HashMap<RemotePort, Weak<BufferedPort>>,
    next_port_id: usize,
}

/// Each connection cycle, moves as many messages as the destinations
/// accept. Ports are visited round-robin, starting one further along
/// every cycle, so no sender is starved under contention.
///
/// Ticks are secondary events: a connection always runs after the
/// components that share its cycle boundary.
pub struct DirectConnection {
    name: String,
    me: Weak<DirectConnection>,
    sched: TickScheduler,
    plugged: Mutex<Plugged>,
    hooks: Hooks,
}

impl DirectConnection {
    pub fn builder() -> DirectConnectionBuilder {
        DirectConnectionBuilder::default()
    }

    pub fn freq(&self) -> Frequency {
        self.sched.freq()
    }

    pub fn num_ports(&self) -> usize {
        self.plugged.lock().ports.len()
    }

    pub fn tick_now(&self) {
        self.sched.tick_now();
    }

    pub fn tick_later(&self) {
        self.sched.tick_later();
    }

    fn resolve(&self, dst: &RemotePort) -> Arc<BufferedPort> {
        let found = self.plugged.lock().by_name.get(dst).and_then(Weak::upgrade);
        match found {
            Some(port) => port,
            None => panic!("{}: destination {dst} is not plugged in", self.name),
        }
    }

    /// Forward from `src` until its outgoing buffer empties or a
    /// destination refuses.
    fn forward_from(&self, src: &BufferedPort, now: VirtualTime) -> bool {
        let mut progress = false;
        while let Some(msg) = src.peek_outgoing() {
            let dst = self.resolve(msg.dst());
            if dst.deliver(msg.clone()).is_err() {
                break;
            }
            self.hooks.invoke_hook(
                &HookCtx::new(&self.name, HookPos::ConnDeliver, &msg).at(now),
            );
            src.retrieve_outgoing();
            progress = true;
        }
        progress
    }
}

impl Connection for DirectConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn plug_in(&self, port: &Arc<BufferedPort>) {
        {
            let mut plugged = self.plugged.lock();
            let key = port.as_remote();
            assert!(
                !plugged.by_name.contains_key(&key),
                "{}: port {key} is already plugged in",
                self.name
            );
            plugged.ports.push(Arc::downgrade(port));
            plugged.by_name.insert(key, Arc::downgrade(port));
        }
        if let Some(me) = self.me.upgrade() {
            port.set_connection(me);
        }
        tracing::debug!(conn = %self.name, port = port.name(), "plugged in");
    }

    fn notify_available(&self, port: &RemotePort) {
        let others: Vec<_> = self
            .plugged
            .lock()
            .ports
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|p| p.name() != port.as_str())
            .collect();
        for other in others {
            other.notify_available();
        }
        self.sched.tick_now();
    }

    fn notify_send(&self) {
        self.sched.tick_now();
    }
}

impl Ticker for DirectConnection {
    fn tick(&self, now: VirtualTime) -> bool {
        let (ports, start) = {
            let mut plugged = self.plugged.lock();
            let n = plugged.ports.len();
            if n == 0 {
                return false;
            }
            let start = plugged.next_port_id % n;
            plugged.next_port_id = (start + 1) % n;
            (plugged.ports.clone(), start)
        };

        let n = ports.len();
        let mut progress = false;
        for i in 0..n {
            if let Some(port) = ports[(start + i) % n].upgrade() {
                progress |= self.forward_from(&port, now);
            }
        }
        progress
    }
}

impl Handler for DirectConnection {
    fn handle(&self, event: &Event) -> SimResult<()> {
        if !event.is::<TickEvent>() {
            return Err(SimError::UnexpectedEvent {
                handler: self.name.clone(),
                payload: event.payload_type(),
            });
        }
        self.sched.fire(self, event.time());
        Ok(())
    }
}

impl Hookable for DirectConnection {
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

impl std::fmt::Debug for DirectConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectConnection")
            .field("name", &self.name)
            .field("freq", &self.sched.freq())
            .field("ports", &self.num_ports())
            .finish()
    }
}

/// Builds a [`DirectConnection`]. The engine is required; the frequency
/// defaults to 1 GHz.
#[derive(Default)]
pub struct DirectConnectionBuilder {
    engine: Option<Arc<dyn Engine>>,
    freq: Option<Frequency>,
}

impl DirectConnectionBuilder {
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_freq(mut self, freq: Frequency) -> Self {
        self.freq = Some(freq);
        self
    }

    /// # Panics
    /// Panics if no engine was given.
    pub fn build(self, name: impl Into<String>) -> Arc<DirectConnection> {
        let name = name.into();
        let Some(engine) = self.engine else {
            panic!("connection {name}: engine is required");
        };
        let freq = self.freq.unwrap_or_else(|| Frequency::ghz(1));
        Arc::new_cyclic(|me: &Weak<DirectConnection>| {
            let handler: Weak<dyn Handler> = me.clone();
            DirectConnection {
                sched: TickScheduler::new_secondary(handler, engine, freq),
                me: me.clone(),
                plugged: Mutex::new(Plugged::default()),
                hooks: Hooks::new(),
                name,
            }
        })
    }
}
