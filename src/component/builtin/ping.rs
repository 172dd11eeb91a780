//! `PingAgent`: event-driven request/response agent.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{SimError, SimResult};
use crate::event::{Event, Handler};
use crate::msg::{Message, MsgIdGen, RemotePort};
use crate::port::{BufferedPort, Component, Port, PortOwner, PortRegistry};
use crate::time::VirtualTime;

/// Ping request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReq {
    pub seq: u64,
}

/// Ping response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRsp {
    pub seq: u64,
}

/// One completed ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub seq: u64,
    pub duration: VirtualTime,
}

impl std::fmt::Display for RoundTrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ping {}, {:.2}", self.seq, self.duration.as_secs_f64())
    }
}

/// Tells an agent to send one ping to `dst`.
#[derive(Debug, Clone)]
pub struct PingSendEvent {
    pub dst: RemotePort,
}

/// Tells an agent to answer `req`.
#[derive(Debug, Clone)]
pub struct PingRspEvent {
    pub req: Message,
}

/// How long a [`PingAgent`] takes to answer a request.
pub const PING_RESPONSE_DELAY: VirtualTime = VirtualTime::from_secs(2);

const OUT_CAPACITY: usize = 4;

#[derive(Debug, Default)]
struct PingState {
    next_seq: u64,
    started: BTreeMap<u64, VirtualTime>,
    round_trips: Vec<RoundTrip>,
}

/// Sends pings when told to and answers every request
/// [`PING_RESPONSE_DELAY`] after it arrives.
///
/// No ticking: the agent reacts to its own events and to port
/// notifications, retrieving messages as soon as they arrive.
pub struct PingAgent {
    name: String,
    engine: Arc<dyn Engine>,
    me: Weak<PingAgent>,
    out: Arc<BufferedPort>,
    ports: PortRegistry,
    msg_ids: MsgIdGen,
    state: Mutex<PingState>,
}

impl PingAgent {
    pub fn new(engine: Arc<dyn Engine>, name: impl Into<String>) -> Arc<PingAgent> {
        Self::with_capacity(engine, name, OUT_CAPACITY)
    }

    /// An agent whose port buffers hold `capacity` messages each.
    pub fn with_capacity(
        engine: Arc<dyn Engine>,
        name: impl Into<String>,
        capacity: usize,
    ) -> Arc<PingAgent> {
        let name = name.into();
        let agent = Arc::new_cyclic(|me: &Weak<PingAgent>| {
            let owner: Weak<dyn Component> = me.clone();
            PingAgent {
                out: Arc::new(BufferedPort::new(format!("{name}.Out"), owner, capacity)),
                engine,
                me: me.clone(),
                ports: PortRegistry::new(),
                msg_ids: MsgIdGen::new(),
                state: Mutex::new(PingState::default()),
                name,
            }
        });
        agent.ports.insert("Out", agent.out.clone());
        agent
    }

    pub fn out_port(&self) -> &Arc<BufferedPort> {
        &self.out
    }

    /// Schedule a ping to `dst` at `at`.
    pub fn ping_at(&self, at: VirtualTime, dst: RemotePort) {
        if let Some(me) = self.me.upgrade() {
            self.engine
                .schedule(Event::new(at, me, PingSendEvent { dst }));
        }
    }

    pub fn round_trips(&self) -> Vec<RoundTrip> {
        self.state.lock().round_trips.clone()
    }

    fn send_ping(&self, dst: &RemotePort, now: VirtualTime) -> SimResult<()> {
        let seq = {
            let mut st = self.state.lock();
            let seq = st.next_seq;
            st.next_seq += 1;
            st.started.insert(seq, now);
            seq
        };
        let msg = Message::new(
            self.msg_ids.next_id(),
            self.out.as_remote(),
            dst.clone(),
            PingReq { seq },
        )
        .with_send_time(now);
        self.out.send(msg)?;
        Ok(())
    }

    fn send_rsp(&self, req: &Message, now: VirtualTime) -> SimResult<()> {
        let Some(&PingReq { seq }) = req.payload::<PingReq>() else {
            return Err(SimError::handler(format!("{} is not a ping request", req)));
        };
        let rsp = Message::new(
            self.msg_ids.next_id(),
            self.out.as_remote(),
            req.src().clone(),
            PingRsp { seq },
        )
        .with_send_time(now);
        self.out.send(rsp)?;
        Ok(())
    }

    fn process(&self, msg: Message, now: VirtualTime) {
        if msg.payload::<PingReq>().is_some() {
            let Some(at) = now.plus(PING_RESPONSE_DELAY) else {
                tracing::warn!(agent = %self.name, "response time overflows");
                return;
            };
            if let Some(me) = self.me.upgrade() {
                self.engine.schedule(Event::new(at, me, PingRspEvent { req: msg }));
            }
        } else if let Some(&PingRsp { seq }) = msg.payload::<PingRsp>() {
            let mut st = self.state.lock();
            let Some(start) = st.started.remove(&seq) else {
                tracing::warn!(agent = %self.name, seq, "response to unknown ping");
                return;
            };
            let duration = now.duration_since(start).unwrap_or(VirtualTime::ZERO);
            st.round_trips.push(RoundTrip { seq, duration });
            tracing::debug!(agent = %self.name, seq, secs = duration.as_secs_f64(), "ping completed");
        } else {
            tracing::warn!(agent = %self.name, msg = %msg, "unexpected message");
        }
    }
}

impl Handler for PingAgent {
    fn handle(&self, event: &Event) -> SimResult<()> {
        if let Some(send) = event.payload::<PingSendEvent>() {
            self.send_ping(&send.dst, event.time())
        } else if let Some(rsp) = event.payload::<PingRspEvent>() {
            self.send_rsp(&rsp.req, event.time())
        } else {
            Err(SimError::UnexpectedEvent {
                handler: self.name.clone(),
                payload: event.payload_type(),
            })
        }
    }
}

impl PortOwner for PingAgent {
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

impl Component for PingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify_recv(&self, _: &RemotePort) {
        let now = self.engine.now();
        while let Some(msg) = self.out.retrieve_incoming() {
            self.process(msg, now);
        }
    }

    fn notify_port_free(&self, _: &RemotePort) {}
}

impl std::fmt::Debug for PingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingAgent")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SerialEngine;

    #[test]
    fn test_round_trip_display() {
        let trip = RoundTrip {
            seq: 3,
            duration: VirtualTime::from_ps(2_500_000_000_000),
        };
        assert_eq!(trip.to_string(), "Ping 3, 2.50");
    }

    #[test]
    fn test_unexpected_event_is_an_error() {
        let engine = SerialEngine::shared();
        let agent = PingAgent::new(engine.clone(), "Agent");
        engine.schedule(Event::new(VirtualTime::from_ns(1), agent.clone(), 42u32));

        let report = engine.run();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            SimError::UnexpectedEvent { ref handler, .. } if handler == "Agent"
        ));
    }

    #[test]
    fn test_full_port_fails_the_send_event() {
        let engine = SerialEngine::shared();
        let agent = PingAgent::with_capacity(engine.clone(), "Agent", 1);
        // No connection drains the port, so the second send is refused.
        agent.ping_at(VirtualTime::from_secs(1), "Peer.Out".into());
        agent.ping_at(VirtualTime::from_secs(2), "Peer.Out".into());

        let report = engine.run();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, SimError::Send(_)));
        assert_eq!(agent.out_port().outgoing_len(), 1);
    }
}
