//! Built-in components: the two ping agents.
//!
//! Both exchange [`PingReq`]/[`PingRsp`] messages and record a
//! [`RoundTrip`] per answered ping. They back the demo binary and the
//! scenario tests.

pub mod ping;
pub mod ticking_ping;

pub use ping::{PingAgent, PingReq, PingRsp, PingRspEvent, PingSendEvent, RoundTrip};
pub use ticking_ping::{PingMiddleware, TickingPingAgent};
