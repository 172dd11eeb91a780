//! Connections: forward messages between ports.
//!
//! | Connection | Shape | Latency |
//! |---|---|---|
//! | [`DirectConnection`] | star over any number of [`BufferedPort`]s | one connection cycle |
//! | [`Wire`] | two [`WirePort`]s, single-slot registers | visible the cycle after send |

mod direct;
mod wire;

pub use direct::{DirectConnection, DirectConnectionBuilder};
pub use wire::{Wire, WirePort};

use std::sync::Arc;

use crate::msg::RemotePort;
use crate::port::BufferedPort;

/// The contract between a [`BufferedPort`] and whatever carries its
/// messages.
pub trait Connection: Send + Sync {
    fn name(&self) -> &str;

    /// Attach `port`.
    ///
    /// # Panics
    /// Panics if `port` is already plugged in here or elsewhere.
    fn plug_in(&self, port: &Arc<BufferedPort>);

    /// The incoming buffer of `port` just stopped being full.
    fn notify_available(&self, port: &RemotePort);

    /// Some plugged port's outgoing buffer just stopped being empty.
    fn notify_send(&self);
}
