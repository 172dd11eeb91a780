//! # chronowire: discrete-event simulation kernel
//!
//! A kernel for timed hardware models. Components exchange messages
//! through ports and connections; an engine dispatches events against a
//! picosecond virtual clock; ticking components wake once per cycle of
//! their own clock and go idle when a cycle makes no progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Simulation        ← directory, monitor, init/teardown
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Engine (serial | parallel)             │  │ ← (time, class, id) ordered queue
//! │  └────────────────────────────────────────┘  │
//! │  ┌──────────────┐  Port  ┌───────────────┐   │
//! │  │ Component    │◄──────►│ Connection    │   │ ← DirectConnection, Wire
//! │  │ + TickScheduler       │ + TickScheduler   │
//! │  └──────────────┘        └───────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod checkpoint;
pub mod component;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod hook;
pub mod monitor;
pub mod msg;
pub mod port;
pub mod simulation;
pub mod tick;
pub mod time;

// Re-exports for convenience.
pub use buffer::Buffer;
pub use checkpoint::{
    Checkpoint, CheckpointCodec, CheckpointManager, JsonCodec, SimulationCheckpoint, StateMap,
    TypeRegistry,
};
pub use component::{
    Middleware, PingAgent, RoundTrip, TickingComponent, TickingComponentBuilder, TickingPingAgent,
};
pub use config::{EngineKind, KernelConfig};
pub use connection::{Connection, DirectConnection, DirectConnectionBuilder, Wire, WirePort};
pub use engine::{DispatchFailure, Engine, ParallelEngine, RunReport, SerialEngine};
pub use error::{Direction, SendError, SimError, SimResult};
pub use event::{Event, EventId, Handler};
pub use hook::{Hook, HookCtx, HookPos, Hookable, Hooks, TracingHook};
pub use monitor::{BufferLevel, Monitor, MonitorSnapshot, Monitorable};
pub use msg::{Message, MsgId, MsgIdGen, RemotePort};
pub use port::{BufferedPort, Component, Port, PortOwner, PortRegistry};
pub use simulation::Simulation;
pub use tick::{TickEvent, TickScheduler, Ticker};
pub use time::{Frequency, VirtualTime};
