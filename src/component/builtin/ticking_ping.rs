//! `TickingPingAgent`: the ping agent as a cycle-driven component.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::component::ticking::{Middleware, TickingComponent};
use crate::engine::Engine;
use crate::msg::{Message, RemotePort};
use crate::port::{BufferedPort, Component, Port};
use crate::time::{Frequency, VirtualTime};

use super::ping::{PingReq, PingRsp, RoundTrip};

/// Cycles a request waits before it is answered.
pub const RESPONSE_CYCLES: u32 = 2;

const OUT_CAPACITY: usize = 4;

#[derive(Debug)]
struct PingTransaction {
    req: Message,
    cycles_left: u32,
}

/// All of the agent's per-cycle behavior, in four stages.
pub struct PingMiddleware {
    out: Arc<BufferedPort>,
    transactions: Vec<PingTransaction>,
    started: BTreeMap<u64, VirtualTime>,
    round_trips: Vec<RoundTrip>,
    to_send: usize,
    next_seq: u64,
    dst: Option<RemotePort>,
}

impl PingMiddleware {
    fn new(out: Arc<BufferedPort>) -> Self {
        PingMiddleware {
            out,
            transactions: Vec::new(),
            started: BTreeMap::new(),
            round_trips: Vec::new(),
            to_send: 0,
            next_seq: 0,
            dst: None,
        }
    }

    /// Answer the oldest request once its countdown expires.
    fn send_rsp(&mut self, comp: &TickingComponent, now: VirtualTime) -> bool {
        let Some(tx) = self.transactions.first() else {
            return false;
        };
        if tx.cycles_left > 0 {
            return false;
        }
        let Some(&PingReq { seq }) = tx.req.payload::<PingReq>() else {
            return false;
        };
        let rsp = Message::new(
            comp.new_msg_id(),
            self.out.as_remote(),
            tx.req.src().clone(),
            PingRsp { seq },
        )
        .with_send_time(now);
        if self.out.send(rsp).is_err() {
            return false;
        }
        self.transactions.remove(0);
        true
    }

    fn send_ping(&mut self, comp: &TickingComponent, now: VirtualTime) -> bool {
        if self.to_send == 0 {
            return false;
        }
        let Some(dst) = self.dst.clone() else {
            return false;
        };
        let seq = self.next_seq;
        let req = Message::new(comp.new_msg_id(), self.out.as_remote(), dst, PingReq { seq })
            .with_send_time(now);
        if self.out.send(req).is_err() {
            return false;
        }
        self.started.insert(seq, now);
        self.to_send -= 1;
        self.next_seq += 1;
        true
    }

    fn count_down(&mut self) -> bool {
        let mut progress = false;
        for tx in self.transactions.iter_mut().filter(|tx| tx.cycles_left > 0) {
            tx.cycles_left -= 1;
            progress = true;
        }
        progress
    }

    /// Take at most one message per cycle.
    fn process_input(&mut self, comp: &TickingComponent, now: VirtualTime) -> bool {
        let Some(msg) = self.out.peek_incoming() else {
            return false;
        };
        if msg.payload::<PingReq>().is_some() {
            self.transactions.push(PingTransaction {
                req: msg,
                cycles_left: RESPONSE_CYCLES,
            });
        } else if let Some(&PingRsp { seq }) = msg.payload::<PingRsp>() {
            match self.started.remove(&seq) {
                Some(start) => {
                    let duration = now.duration_since(start).unwrap_or(VirtualTime::ZERO);
                    self.round_trips.push(RoundTrip { seq, duration });
                    tracing::debug!(
                        agent = comp.name(),
                        seq,
                        secs = duration.as_secs_f64(),
                        "ping completed"
                    );
                }
                None => tracing::warn!(agent = comp.name(), seq, "response to unknown ping"),
            }
        } else {
            tracing::warn!(agent = comp.name(), msg = %msg, "unexpected message");
        }
        self.out.retrieve_incoming();
        true
    }
}

impl Middleware for PingMiddleware {
    fn tick(&mut self, comp: &TickingComponent, now: VirtualTime) -> bool {
        let mut progress = false;
        progress = self.send_rsp(comp, now) || progress;
        progress = self.send_ping(comp, now) || progress;
        progress = self.count_down() || progress;
        progress = self.process_input(comp, now) || progress;
        progress
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A [`TickingComponent`] with one port and a [`PingMiddleware`].
///
/// Requests are answered [`RESPONSE_CYCLES`] cycles after they are
/// taken in.
#[derive(Debug, Clone)]
pub struct TickingPingAgent {
    comp: Arc<TickingComponent>,
    out: Arc<BufferedPort>,
}

impl TickingPingAgent {
    pub fn new(engine: Arc<dyn Engine>, name: impl Into<String>, freq: Frequency) -> Self {
        let comp = TickingComponent::builder()
            .with_engine(engine)
            .with_freq(freq)
            .build(name);
        let out = comp.add_new_port("Out", OUT_CAPACITY);
        comp.add_middleware(Box::new(PingMiddleware::new(out.clone())));
        TickingPingAgent { comp, out }
    }

    pub fn component(&self) -> &Arc<TickingComponent> {
        &self.comp
    }

    pub fn out_port(&self) -> &Arc<BufferedPort> {
        &self.out
    }

    /// Send `count` pings to `dst`, one per cycle while the port
    /// accepts them, starting next cycle.
    pub fn start_pinging(&self, dst: RemotePort, count: usize) {
        self.comp.middleware(|m: &mut PingMiddleware| {
            m.dst = Some(dst);
            m.to_send += count;
        });
        self.comp.tick_later();
    }

    pub fn round_trips(&self) -> Vec<RoundTrip> {
        self.comp
            .middleware(|m: &mut PingMiddleware| m.round_trips.clone())
            .unwrap_or_default()
    }

    /// Requests taken in and not yet answered.
    pub fn pending_responses(&self) -> usize {
        self.comp
            .middleware(|m: &mut PingMiddleware| m.transactions.len())
            .unwrap_or_default()
    }
}
