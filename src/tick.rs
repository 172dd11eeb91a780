//! Frequency-quantized self-re-arming tick streams.
//!
//! A [`Ticker`] reports whether a cycle made progress. The
//! [`TickScheduler`] turns that into a stream of [`TickEvent`]s on the
//! ticker's cycle grid: progress schedules the next cycle, no progress
//! lets the stream go idle until something external calls
//! [`TickScheduler::tick_later`] or [`TickScheduler::tick_now`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::engine::Engine;
use crate::event::{Event, Handler};
use crate::time::{Frequency, VirtualTime};

/// Something that does one cycle of work per tick.
pub trait Ticker: Send + Sync {
    /// Run one cycle at `now`. Return `true` if anything changed.
    fn tick(&self, now: VirtualTime) -> bool;
}

/// Payload of every event a [`TickScheduler`] schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent;

#[derive(Debug, Default)]
struct TickState {
    /// The outstanding tick event, if any.
    scheduled: Option<VirtualTime>,
    /// Time of the most recently dispatched tick.
    last_fired: Option<VirtualTime>,
    ticking: bool,
    /// A wakeup arrived that the outstanding or executing tick does not
    /// cover; tick again on the next cycle once it is done.
    rearm: bool,
}

/// Keeps at most one tick event outstanding for one handler.
pub struct TickScheduler {
    handler: Weak<dyn Handler>,
    engine: Arc<dyn Engine>,
    freq: Frequency,
    secondary: bool,
    state: Mutex<TickState>,
}

impl TickScheduler {
    pub fn new(handler: Weak<dyn Handler>, engine: Arc<dyn Engine>, freq: Frequency) -> Self {
        TickScheduler {
            handler,
            engine,
            freq,
            secondary: false,
            state: Mutex::new(TickState::default()),
        }
    }

    /// A scheduler whose ticks run after every primary event of the same
    /// time. Connections use this so they observe a cycle's sends.
    pub fn new_secondary(
        handler: Weak<dyn Handler>,
        engine: Arc<dyn Engine>,
        freq: Frequency,
    ) -> Self {
        TickScheduler {
            secondary: true,
            ..Self::new(handler, engine, freq)
        }
    }

    pub fn freq(&self) -> Frequency {
        self.freq
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn is_secondary(&self) -> bool {
        self.secondary
    }

    /// Time of the outstanding tick, if one is queued.
    pub fn scheduled(&self) -> Option<VirtualTime> {
        self.state.lock().scheduled
    }

    /// Request a tick on the first cycle boundary strictly after now.
    pub fn tick_later(&self) {
        let now = self.engine.now();
        self.request(self.freq.next_tick(now));
    }

    /// Request a tick on the current cycle boundary, or the next one if
    /// now is between boundaries.
    pub fn tick_now(&self) {
        let now = self.engine.now();
        self.request(self.freq.this_tick(now));
    }

    fn request(&self, mut at: VirtualTime) {
        let mut st = self.state.lock();
        if let Some(scheduled) = st.scheduled {
            // A queued tick at or after `at` covers the request. An earlier
            // one cannot, so it re-arms when it fires.
            if scheduled < at {
                st.rearm = true;
            }
            return;
        }
        if let Some(fired) = st.last_fired.filter(|fired| at <= *fired) {
            if st.ticking {
                st.rearm = true;
                return;
            }
            at = self.freq.next_tick(fired);
        }
        let Some(handler) = self.handler.upgrade() else {
            tracing::trace!(at_ps = at.as_ps(), "tick handler dropped");
            return;
        };
        st.scheduled = Some(at);
        self.engine
            .schedule(Event::new(at, handler, TickEvent).with_secondary(self.secondary));
        tracing::trace!(at_ps = at.as_ps(), secondary = self.secondary, "tick scheduled");
    }

    /// Run `ticker` for the tick event at `now` and re-arm as needed.
    ///
    /// Call this from the handler that owns the scheduler whenever it
    /// receives a [`TickEvent`].
    pub fn fire(&self, ticker: &dyn Ticker, now: VirtualTime) -> bool {
        {
            let mut st = self.state.lock();
            st.scheduled = None;
            st.last_fired = Some(now);
            st.ticking = true;
        }

        let progress = ticker.tick(now);

        let rearm = {
            let mut st = self.state.lock();
            st.ticking = false;
            std::mem::take(&mut st.rearm)
        };
        if progress || rearm {
            self.tick_later();
        }
        progress
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("freq", &self.freq)
            .field("secondary", &self.secondary)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SerialEngine;
    use crate::error::{SimError, SimResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Ticks `budget` times with progress, then goes idle. Optionally
    /// wakes itself from inside a tick.
    struct Counter {
        sched: TickScheduler,
        budget: AtomicUsize,
        ticks: Mutex<Vec<u64>>,
        wake_self_at: Option<u64>,
    }

    impl Counter {
        fn build(
            engine: &Arc<dyn Engine>,
            freq: Frequency,
            budget: usize,
            wake_self_at: Option<u64>,
        ) -> Arc<Counter> {
            Arc::new_cyclic(|me: &Weak<Counter>| {
                let handler: Weak<dyn Handler> = me.clone();
                Counter {
                    sched: TickScheduler::new(handler, engine.clone(), freq),
                    budget: AtomicUsize::new(budget),
                    ticks: Mutex::new(Vec::new()),
                    wake_self_at,
                }
            })
        }
    }

    impl Ticker for Counter {
        fn tick(&self, now: VirtualTime) -> bool {
            self.ticks.lock().push(now.as_ps());
            if self.wake_self_at == Some(now.as_ps()) {
                self.sched.tick_now();
            }
            self.budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(1))
                .is_ok()
        }
    }

    impl Handler for Counter {
        fn handle(&self, event: &Event) -> SimResult<()> {
            if !event.is::<TickEvent>() {
                return Err(SimError::UnexpectedEvent {
                    handler: "Counter".into(),
                    payload: event.payload_type(),
                });
            }
            self.sched.fire(self, event.time());
            Ok(())
        }
    }

    fn engine() -> Arc<dyn Engine> {
        SerialEngine::shared()
    }

    #[test]
    fn test_ticks_until_no_progress() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::hz(1_000_000_000), 3, None);
        c.sched.tick_later();
        engine.run();
        // Three productive ticks and a final idle one.
        assert_eq!(*c.ticks.lock(), vec![1_000, 2_000, 3_000, 4_000]);
    }

    #[test]
    fn test_duplicate_requests_schedule_once() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::hz(1_000_000_000), 0, None);
        c.sched.tick_later();
        c.sched.tick_later();
        c.sched.tick_now();
        assert_eq!(engine.pending(), 1);
        engine.run();
        assert_eq!(*c.ticks.lock(), vec![1_000]);
    }

    #[test]
    fn test_tick_now_on_boundary() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::ghz(1), 0, None);
        c.sched.tick_now();
        engine.run();
        assert_eq!(*c.ticks.lock(), vec![0]);
    }

    #[test]
    fn test_pending_later_tick_covers_earlier_request() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::ghz(1), 0, None);
        c.sched.tick_later();
        c.sched.tick_now();
        assert_eq!(engine.pending(), 1);
        assert_eq!(c.sched.scheduled(), Some(VirtualTime::from_ps(1_000)));
    }

    #[test]
    fn test_earlier_pending_tick_rearms_for_later_request() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::ghz(1), 0, None);
        c.sched.tick_now();
        c.sched.tick_later();
        assert_eq!(engine.pending(), 1);
        assert_eq!(c.sched.scheduled(), Some(VirtualTime::ZERO));
        engine.run();
        // The tick at 0 makes no progress but still honors the request
        // for the next cycle.
        assert_eq!(*c.ticks.lock(), vec![0, 1_000]);
    }

    #[test]
    fn test_restart_after_idle() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::ghz(1), 1, None);
        c.sched.tick_later();
        engine.run();
        assert_eq!(*c.ticks.lock(), vec![1_000, 2_000]);

        c.budget.store(1, Ordering::SeqCst);
        c.sched.tick_later();
        engine.run();
        assert_eq!(*c.ticks.lock(), vec![1_000, 2_000, 3_000, 4_000]);
    }

    #[test]
    fn test_tick_now_after_cycle_ran_moves_to_next_cycle() {
        let engine = engine();
        let c = Counter::build(&engine, Frequency::ghz(1), 0, None);
        c.sched.tick_now();
        engine.run();
        c.sched.tick_now();
        assert_eq!(c.sched.scheduled(), Some(VirtualTime::from_ps(1_000)));
        engine.run();
        assert_eq!(*c.ticks.lock(), vec![0, 1_000]);
    }

    #[test]
    fn test_wakeup_during_own_tick_rearms() {
        let engine = engine();
        // No budget: every tick reports no progress. The tick at 1ns wakes
        // itself, which the de-dup rule swallows; the guard re-arms.
        let c = Counter::build(&engine, Frequency::ghz(1), 0, Some(1_000));
        c.sched.tick_later();
        engine.run();
        assert_eq!(*c.ticks.lock(), vec![1_000, 2_000]);
    }

    #[test]
    fn test_secondary_ticks() {
        let engine = engine();
        let handler: Arc<dyn Handler> =
            Arc::new(|_: &Event| -> SimResult<()> { Ok(()) });
        let sched =
            TickScheduler::new_secondary(Arc::downgrade(&handler), engine.clone(), Frequency::ghz(1));
        assert!(sched.is_secondary());
        sched.tick_now();
        assert_eq!(engine.pending(), 1);
    }

    #[test]
    fn test_dropped_handler_schedules_nothing() {
        let engine = engine();
        let sched = {
            let handler: Arc<dyn Handler> =
                Arc::new(|_: &Event| -> SimResult<()> { Ok(()) });
            TickScheduler::new(Arc::downgrade(&handler), engine.clone(), Frequency::ghz(1))
        };
        sched.tick_later();
        assert_eq!(engine.pending(), 0);
    }
}
