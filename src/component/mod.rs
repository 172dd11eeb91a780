//! Components built on the kernel contracts.
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`ticking`] | [`TickingComponent`], [`Middleware`] |
//! | [`builtin`] | [`PingAgent`], [`TickingPingAgent`] |

pub mod builtin;
pub mod ticking;

pub use builtin::{PingAgent, RoundTrip, TickingPingAgent};
pub use ticking::{Middleware, TickingComponent, TickingComponentBuilder};
