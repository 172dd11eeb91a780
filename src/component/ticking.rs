//! `TickingComponent`: a component assembled from middlewares.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::engine::Engine;
use crate::error::{SimError, SimResult};
use crate::event::{Event, Handler};
use crate::msg::{MsgId, MsgIdGen, RemotePort};
use crate::port::{BufferedPort, Component, Port, PortOwner, PortRegistry};
use crate::tick::{TickEvent, TickScheduler, Ticker};
use crate::time::{Frequency, VirtualTime};

// ── Middleware ────────────────────────────────────────────────────────

/// One stage of a component's per-cycle behavior.
///
/// A [`TickingComponent`] runs its middlewares in registration order
/// every tick, and the tick made progress if any of them did.
pub trait Middleware: Send {
    fn tick(&mut self, comp: &TickingComponent, now: VirtualTime) -> bool;

    /// Downcast support, required for [`TickingComponent::middleware`].
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ── TickingComponent ──────────────────────────────────────────────────

pub struct TickingComponent {
    name: String,
    me: Weak<TickingComponent>,
    sched: TickScheduler,
    ports: PortRegistry,
    msg_ids: MsgIdGen,
    middlewares: Mutex<Vec<Box<dyn Middleware>>>,
}

impl TickingComponent {
    pub fn builder() -> TickingComponentBuilder {
        TickingComponentBuilder::default()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.sched.engine()
    }

    pub fn now(&self) -> VirtualTime {
        self.sched.engine().now()
    }

    pub fn freq(&self) -> Frequency {
        self.sched.freq()
    }

    pub fn tick_later(&self) {
        self.sched.tick_later();
    }

    pub fn tick_now(&self) {
        self.sched.tick_now();
    }

    /// This component as a port owner, for ports built outside it.
    pub fn as_owner(&self) -> Weak<dyn Component> {
        self.me.clone()
    }

    /// Create, register, and return a buffered port named
    /// `{component}.{short}`.
    pub fn add_new_port(&self, short: &str, capacity: usize) -> Arc<BufferedPort> {
        let port = Arc::new(BufferedPort::new(
            format!("{}.{short}", self.name),
            self.as_owner(),
            capacity,
        ));
        self.ports.insert(short, port.clone());
        port
    }

    /// Create a buffered port and plug it into `conn` in one go.
    pub fn add_connected_port(
        &self,
        short: &str,
        capacity: usize,
        conn: &dyn Connection,
    ) -> Arc<BufferedPort> {
        let port = self.add_new_port(short, capacity);
        conn.plug_in(&port);
        port
    }

    pub fn new_msg_id(&self) -> MsgId {
        self.msg_ids.next_id()
    }

    pub fn add_middleware(&self, middleware: Box<dyn Middleware>) {
        self.middlewares.lock().push(middleware);
    }

    pub fn num_middlewares(&self) -> usize {
        self.middlewares.lock().len()
    }

    /// Run `f` on the first middleware of type `M`.
    ///
    /// Must not be called from inside a middleware's own `tick`.
    pub fn middleware<M: Middleware + 'static, R>(&self, f: impl FnOnce(&mut M) -> R) -> Option<R> {
        let mut middlewares = self.middlewares.lock();
        middlewares
            .iter_mut()
            .find_map(|m| m.as_any_mut().downcast_mut::<M>())
            .map(f)
    }
}

impl Ticker for TickingComponent {
    fn tick(&self, now: VirtualTime) -> bool {
        let mut middlewares = self.middlewares.lock();
        middlewares
            .iter_mut()
            .fold(false, |progress, m| m.tick(self, now) || progress)
    }
}

impl Handler for TickingComponent {
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

impl PortOwner for TickingComponent {
    fn add_port(&self, port: Arc<dyn Port>) {
        self.ports.add_port(port);
    }

    fn port_by_name(&self, name: &str) -> Option<Arc<dyn Port>> {
        self.ports.port_by_name(name)
    }

    fn ports(&self) -> Vec<Arc<dyn Port>> {
        self.ports.ports()
    }
}

impl Component for TickingComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify_recv(&self, _: &RemotePort) {
        self.sched.tick_later();
    }

    fn notify_port_free(&self, _: &RemotePort) {
        self.sched.tick_later();
    }
}

impl std::fmt::Debug for TickingComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickingComponent")
            .field("name", &self.name)
            .field("freq", &self.sched.freq())
            .field("ports", &self.ports)
            .finish()
    }
}

/// Builds a [`TickingComponent`]. The engine is required; the frequency
/// defaults to 1 GHz.
#[derive(Default)]
pub struct TickingComponentBuilder {
    engine: Option<Arc<dyn Engine>>,
    freq: Option<Frequency>,
}

impl TickingComponentBuilder {
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
    pub fn build(self, name: impl Into<String>) -> Arc<TickingComponent> {
        let name = name.into();
        let Some(engine) = self.engine else {
            panic!("component {name}: engine is required");
        };
        let freq = self.freq.unwrap_or_else(|| Frequency::ghz(1));
        Arc::new_cyclic(|me: &Weak<TickingComponent>| {
            let handler: Weak<dyn Handler> = me.clone();
            TickingComponent {
                sched: TickScheduler::new(handler, engine, freq),
                me: me.clone(),
                ports: PortRegistry::new(),
                msg_ids: MsgIdGen::new(),
                middlewares: Mutex::new(Vec::new()),
                name,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SerialEngine;

    /// Makes progress `left` times.
    struct Countdown {
        left: u32,
        ticks: Vec<u64>,
    }

    impl Middleware for Countdown {
        fn tick(&mut self, _: &TickingComponent, now: VirtualTime) -> bool {
            self.ticks.push(now.as_ps());
            if self.left == 0 {
                return false;
            }
            self.left -= 1;
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Counts its own calls and never makes progress.
    #[derive(Default)]
    struct Observer {
        calls: u32,
    }

    impl Middleware for Observer {
        fn tick(&mut self, _: &TickingComponent, _: VirtualTime) -> bool {
            self.calls += 1;
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_every_middleware_runs_each_tick() {
        let engine = SerialEngine::shared();
        let comp = TickingComponent::builder()
            .with_engine(engine.clone())
            .with_freq(Frequency::mhz(1))
            .build("Comp");
        comp.add_middleware(Box::new(Countdown {
            left: 2,
            ticks: Vec::new(),
        }));
        comp.add_middleware(Box::new(Observer::default()));

        comp.tick_later();
        engine.run();

        let ticks = comp.middleware(|c: &mut Countdown| c.ticks.clone());
        assert_eq!(ticks, Some(vec![1_000_000, 2_000_000, 3_000_000]));
        // The observer runs even on ticks where the countdown progressed.
        assert_eq!(comp.middleware(|o: &mut Observer| o.calls), Some(3));
    }

    #[test]
    fn test_ports_are_named_after_component() {
        let engine = SerialEngine::shared();
        let comp = TickingComponent::builder().with_engine(engine).build("Core");
        let port = comp.add_new_port("Mem", 2);
        assert_eq!(port.name(), "Core.Mem");
        assert!(comp.port_by_name("Mem").is_some());
        assert!(comp.port_by_name("Core.Mem").is_some());
        assert_eq!(comp.ports().len(), 1);
    }

    #[test]
    fn test_unknown_payload_is_an_error() {
        let engine = SerialEngine::shared();
        let comp = TickingComponent::builder()
            .with_engine(engine.clone())
            .build("Comp");
        engine.schedule(Event::new(VirtualTime::ZERO, comp.clone(), 42u8));
        let report = engine.run();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            SimError::UnexpectedEvent { .. }
        ));
    }

    #[test]
    fn test_message_ids_are_per_component() {
        let engine = SerialEngine::shared();
        let a = TickingComponent::builder().with_engine(engine.clone()).build("A");
        let b = TickingComponent::builder().with_engine(engine).build("B");
        assert_eq!(a.new_msg_id().raw(), 0);
        assert_eq!(a.new_msg_id().raw(), 1);
        assert_eq!(b.new_msg_id().raw(), 0);
    }

    #[test]
    #[should_panic(expected = "engine is required")]
    fn test_builder_requires_engine() {
        TickingComponent::builder().build("Comp");
    }
}
