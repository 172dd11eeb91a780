//! Events and handlers.
//!
//! Every unit of work is an [`Event`] bound to the [`Handler`] that will
//! process it. Events are immutable once scheduled; the engine owns them
//! until dispatch and lends them to the handler for the duration of
//! `handle`.

use std::any::Any;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::SimResult;
use crate::time::VirtualTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// A strictly-increasing event identifier.
///
/// IDs are minted by the engine in scheduling order, which makes them
/// the tie-breaker between events of the same class at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// Deterministic, strictly-increasing event-ID generator.
///
/// Each engine owns exactly one of these.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Handler ───────────────────────────────────────────────────────────

/// Something that can process an event.
///
/// An error is reported to the engine's caller but never stops the
/// dispatch loop; recovering is the handler's own business.
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event) -> SimResult<()>;
}

/// A handler backed by a closure, useful for tests and one-off scripts.
impl<F> Handler for F
where
    F: Fn(&Event) -> SimResult<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> SimResult<()> {
        (self)(event)
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single simulation event.
///
/// The payload is opaque to the kernel; handlers recover it with
/// [`Event::payload`]. The `id` is assigned when the event is scheduled.
pub struct Event {
    id: EventId,
    time: VirtualTime,
    handler: Arc<dyn Handler>,
    secondary: bool,
    payload: Box<dyn Any + Send + Sync>,
    payload_type: &'static str,
}

impl Event {
    /// A primary event for `handler` at `time`.
    pub fn new<P>(time: VirtualTime, handler: Arc<dyn Handler>, payload: P) -> Self
    where
        P: Any + Send + Sync,
    {
        Event {
            id: EventId(0),
            time,
            handler,
            secondary: false,
            payload: Box::new(payload),
            payload_type: std::any::type_name::<P>(),
        }
    }

    /// Mark the event secondary: it dispatches after every primary event
    /// with the same time.
    pub fn with_secondary(mut self, secondary: bool) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> VirtualTime {
        self.time
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn is_secondary(&self) -> bool {
        self.secondary
    }

    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }

    pub fn is<P: Any>(&self) -> bool {
        self.payload.is::<P>()
    }

    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub(crate) fn assign_id(&mut self, id: EventId) {
        self.id = id;
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("secondary", &self.secondary)
            .field("payload", &self.payload_type)
            .finish()
    }
}

/// Ordering: smallest `(time, id)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here
/// to make it pop the earliest event.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}
