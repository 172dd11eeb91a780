//! Structured error types for the kernel.
//!
//! Two failure classes exist. Contract violations (scheduling into the
//! past, pushing into a full buffer, malformed messages, duplicate hooks,
//! missing builder configuration) are model-construction bugs and panic.
//! Everything a correct model can run into at runtime is a value:
//! [`SendError`] for backpressure and [`SimError`] for the rest.

use thiserror::Error;

use crate::msg::RemotePort;

/// Which side of a port refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Outgoing => write!(f, "outgoing"),
            Direction::Incoming => write!(f, "incoming"),
        }
    }
}

/// Backpressure signal: the target buffer is full.
///
/// This is the expected steady-state way for a component to learn it
/// must retry next cycle. Never treat it as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("port {port} {direction} buffer is full")]
pub struct SendError {
    pub port: RemotePort,
    pub direction: Direction,
}

/// The top-level recoverable error type.
#[derive(Debug, Error)]
pub enum SimError {
    /// A handler failed to process an event. The engine records the
    /// failure and keeps dispatching.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A handler received a payload it does not understand.
    #[error("{handler} cannot handle event payload {payload}")]
    UnexpectedEvent {
        handler: String,
        payload: &'static str,
    },

    /// A send that a handler could not retry.
    #[error(transparent)]
    Send(#[from] SendError),

    /// A checkpoint refers to a type the registry does not know.
    #[error("checkpoint type {0} is not registered")]
    UnknownCheckpointType(String),

    /// A checkpoint state map is missing a field or has the wrong shape.
    #[error("malformed checkpoint state for {type_name}: {reason}")]
    MalformedCheckpoint { type_name: String, reason: String },

    #[error("checkpoint codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Shorthand for handler failures.
    pub fn handler(reason: impl Into<String>) -> Self {
        SimError::Handler(reason.into())
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
