//! Engines: order and dispatch events against the virtual clock.
//!
//! | Engine | Dispatch |
//! |---|---|
//! | [`SerialEngine`] | one event at a time |
//! | [`ParallelEngine`] | every event of the earliest `(time, class)` at once |
//!
//! Both pop from the same queue and dispatch through the same helper.
//! The ordering contract they share:
//!
//! 1. events never dispatch out of non-decreasing time order;
//! 2. at equal time, primary events dispatch before secondary events;
//! 3. at equal time and class, events dispatch in scheduling order.

mod parallel;
mod queue;
mod serial;

pub use parallel::ParallelEngine;
pub use serial::SerialEngine;

use crate::error::SimError;
use crate::event::{Event, EventId};
use crate::hook::{HookCtx, HookPos, Hookable};
use crate::time::VirtualTime;

/// The engine contract shared by every variant.
pub trait Engine: Hookable + Send + Sync {
    /// Enqueue an event and return its ID.
    ///
    /// # Panics
    /// Panics if `event.time()` is before [`Engine::now`].
    fn schedule(&self, event: Event) -> EventId;

    /// Dispatch until the queue drains or the engine is paused.
    fn run(&self) -> RunReport;

    /// Dispatch a single unit of work: one event for the serial engine,
    /// one batch for the parallel engine.
    fn step(&self) -> RunReport;

    /// Time of the event currently or most recently dispatched.
    fn now(&self) -> VirtualTime;

    /// Make `run` return after the event in flight. Queued events stay
    /// queued.
    fn pause(&self);

    /// Clear a pause; the next `run` continues where the last stopped.
    fn resume(&self);

    fn is_paused(&self) -> bool;

    /// Number of queued, undispatched events.
    fn pending(&self) -> usize;
}

// ── Run reporting ─────────────────────────────────────────────────────

/// A handler error captured during dispatch.
#[derive(Debug)]
pub struct DispatchFailure {
    pub event: EventId,
    pub time: VirtualTime,
    pub payload: &'static str,
    pub error: SimError,
}

/// Outcome of a `run` or `step` call.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Events dispatched during this call.
    pub dispatched: u64,
    /// `true` if the call stopped because the engine was paused.
    pub paused: bool,
    /// Handler errors, in dispatch order.
    pub failures: Vec<DispatchFailure>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: RunReport) {
        self.dispatched += other.dispatched;
        self.paused |= other.paused;
        self.failures.extend(other.failures);
    }
}

// ── Shared dispatch ───────────────────────────────────────────────────

/// Run one event through the before hooks, its handler, and the after
/// hooks.
pub(crate) fn dispatch(
    domain: &str,
    hooks: &dyn Hookable,
    event: &Event,
) -> Result<(), DispatchFailure> {
    tracing::trace!(
        event = %event.id(),
        time_ps = event.time().as_ps(),
        secondary = event.is_secondary(),
        payload = event.payload_type(),
        "dispatch"
    );

    hooks.invoke_hook(&HookCtx::new(domain, HookPos::BeforeEvent, event).at(event.time()));
    let result = event.handler().handle(event);
    hooks.invoke_hook(&HookCtx::new(domain, HookPos::AfterEvent, event).at(event.time()));

    result.map_err(|error| {
        tracing::warn!(
            event = %event.id(),
            time_ps = event.time().as_ps(),
            payload = event.payload_type(),
            %error,
            "handler failed"
        );
        DispatchFailure {
            event: event.id(),
            time: event.time(),
            payload: event.payload_type(),
            error,
        }
    })
}
