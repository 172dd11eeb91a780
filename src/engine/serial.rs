//! Single-threaded engine.
//!
//! Pops one event, advances time, dispatches. No two handlers ever run
//! concurrently, so determinism follows directly from the queue order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::queue::EventQueue;
use super::{dispatch, Engine, RunReport};
use crate::event::{Event, EventId};
use crate::hook::{Hook, HookCtx, Hookable, Hooks};
use crate::time::VirtualTime;

/// The default engine.
///
/// The queue lock is held only while scheduling or popping, never across
/// a handler call, so handlers may schedule follow-up events freely.
#[derive(Debug, Default)]
pub struct SerialEngine {
    queue: Mutex<EventQueue>,
    paused: AtomicBool,
    hooks: Hooks,
}

impl SerialEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for the common `Arc<dyn Engine>` handle.
    pub fn shared() -> Arc<dyn Engine> {
        Arc::new(Self::new())
    }

    fn dispatch_one(&self, event: Event) -> RunReport {
        let mut report = RunReport {
            dispatched: 1,
            ..RunReport::default()
        };
        if let Err(failure) = dispatch("SerialEngine", &self.hooks, &event) {
            report.failures.push(failure);
        }
        report
    }
}

impl Engine for SerialEngine {
    fn schedule(&self, event: Event) -> EventId {
        self.queue.lock().push(event)
    }

    fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        loop {
            if self.is_paused() {
                report.paused = true;
                break;
            }
            let Some(event) = self.queue.lock().pop_next() else {
                break;
            };
            report.absorb(self.dispatch_one(event));
        }
        report
    }

    fn step(&self) -> RunReport {
        let next = self.queue.lock().pop_next();
        match next {
            Some(event) => self.dispatch_one(event),
            None => RunReport::default(),
        }
    }

    fn now(&self) -> VirtualTime {
        self.queue.lock().now()
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Hookable for SerialEngine {
    fn accept_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.accept_hook(hook);
    }

    fn num_hooks(&self) -> usize {
        self.hooks.num_hooks()
    }

    fn invoke_hook(&self, ctx: &HookCtx<'_>) {
        self.hooks.invoke_hook(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;
    use crate::event::Handler;
    use crate::hook::HookPos;
    use proptest::prelude::*;
    use std::sync::Weak;
    use tracing_test::traced_test;

    /// Records `(now, tag)` for every event it handles.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(u64, &'static str)>>,
    }

    impl Handler for Recorder {
        fn handle(&self, event: &Event) -> crate::error::SimResult<()> {
            let tag = event.payload::<&'static str>().copied().unwrap_or("?");
            self.log.lock().push((event.time().as_ps(), tag));
            Ok(())
        }
    }

    fn ps(t: u64) -> VirtualTime {
        VirtualTime::from_ps(t)
    }

    #[test]
    fn test_basic_execution_loop() {
        let engine = SerialEngine::new();
        let rec = Arc::new(Recorder::default());

        engine.schedule(Event::new(ps(10), rec.clone(), "a"));
        engine.schedule(Event::new(ps(20), rec.clone(), "b"));
        engine.schedule(Event::new(ps(30), rec.clone(), "c"));

        let report = engine.run();
        assert_eq!(report.dispatched, 3);
        assert!(report.is_clean());
        assert_eq!(*rec.log.lock(), vec![(10, "a"), (20, "b"), (30, "c")]);
        assert_eq!(engine.now(), ps(30));
    }

    /// Schedules a follow-up 10ps later until time 30.
    struct Chain {
        engine: Weak<SerialEngine>,
        me: Weak<Chain>,
        seen: Mutex<Vec<u64>>,
    }

    impl Handler for Chain {
        fn handle(&self, event: &Event) -> crate::error::SimResult<()> {
            let now = event.time();
            self.seen.lock().push(now.as_ps());
            if now < ps(30) {
                if let (Some(engine), Some(me)) = (self.engine.upgrade(), self.me.upgrade()) {
                    let next = now.advance(10).unwrap_or(now);
                    engine.schedule(Event::new(next, me, ()));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_handler_schedules_followup() {
        let engine = Arc::new(SerialEngine::new());
        let chain = Arc::new_cyclic(|me| Chain {
            engine: Arc::downgrade(&engine),
            me: me.clone(),
            seen: Mutex::new(Vec::new()),
        });

        engine.schedule(Event::new(ps(0), chain.clone(), ()));
        engine.run();

        assert_eq!(*chain.seen.lock(), vec![0, 10, 20, 30]);
        assert_eq!(engine.now(), ps(30));
    }

    #[test]
    fn test_step_by_step() {
        let engine = SerialEngine::new();
        let rec = Arc::new(Recorder::default());
        engine.schedule(Event::new(ps(5), rec.clone(), "x"));
        engine.schedule(Event::new(ps(15), rec.clone(), "y"));

        assert_eq!(engine.step().dispatched, 1);
        assert_eq!(engine.now(), ps(5));
        assert_eq!(engine.step().dispatched, 1);
        assert_eq!(engine.now(), ps(15));
        assert_eq!(engine.step().dispatched, 0);
    }

    #[test]
    fn test_primary_dispatches_before_secondary() {
        let engine = SerialEngine::new();
        let rec = Arc::new(Recorder::default());

        engine.schedule(Event::new(ps(7), rec.clone(), "conn").with_secondary(true));
        engine.schedule(Event::new(ps(7), rec.clone(), "comp"));
        engine.run();

        assert_eq!(*rec.log.lock(), vec![(7, "comp"), (7, "conn")]);
    }

    #[test]
    #[should_panic(expected = "cannot schedule event in the past")]
    fn test_past_scheduling_is_fatal() {
        let engine = SerialEngine::new();
        let rec = Arc::new(Recorder::default());
        engine.schedule(Event::new(ps(10), rec.clone(), "a"));
        engine.run();
        engine.schedule(Event::new(ps(9), rec, "b"));
    }

    #[test]
    #[traced_test]
    fn test_handler_error_does_not_stop_loop() {
        let engine = SerialEngine::new();
        let failing: Arc<dyn Handler> = Arc::new(|_: &Event| -> crate::error::SimResult<()> {
            Err(SimError::handler("broken"))
        });
        let rec = Arc::new(Recorder::default());

        engine.schedule(Event::new(ps(1), failing, ()));
        engine.schedule(Event::new(ps(2), rec.clone(), "after"));
        let report = engine.run();

        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].time, ps(1));
        assert_eq!(*rec.log.lock(), vec![(2, "after")]);
        assert!(logs_contain("handler failed"));
    }

    #[test]
    fn test_pause_and_resume_keep_queue() {
        let engine = Arc::new(SerialEngine::new());
        let rec = Arc::new(Recorder::default());

        let pauser: Arc<dyn Handler> = {
            let engine = Arc::downgrade(&engine);
            Arc::new(move |_: &Event| -> crate::error::SimResult<()> {
                if let Some(engine) = engine.upgrade() {
                    engine.pause();
                }
                Ok(())
            })
        };

        engine.schedule(Event::new(ps(1), pauser, ()));
        engine.schedule(Event::new(ps(2), rec.clone(), "later"));

        let first = engine.run();
        assert!(first.paused);
        assert_eq!(first.dispatched, 1);
        assert_eq!(engine.pending(), 1);
        assert!(rec.log.lock().is_empty());

        engine.resume();
        let second = engine.run();
        assert!(!second.paused);
        assert_eq!(*rec.log.lock(), vec![(2, "later")]);
    }

    #[test]
    fn test_before_and_after_hooks() {
        let engine = SerialEngine::new();
        let positions = Arc::new(Mutex::new(Vec::new()));
        {
            let positions = positions.clone();
            engine.accept_hook(Arc::new(move |ctx: &HookCtx<'_>| {
                let id = ctx.event().map(|e| e.id().raw());
                positions.lock().push((ctx.pos, id));
            }));
        }
        let rec = Arc::new(Recorder::default());
        engine.schedule(Event::new(ps(1), rec, "a"));
        engine.run();

        assert_eq!(
            *positions.lock(),
            vec![(HookPos::BeforeEvent, Some(0)), (HookPos::AfterEvent, Some(0))]
        );
    }

    #[test]
    fn test_deterministic_replay() {
        fn trace() -> Vec<(u64, &'static str)> {
            let engine = SerialEngine::new();
            let rec = Arc::new(Recorder::default());
            engine.schedule(Event::new(ps(5), rec.clone(), "alpha"));
            engine.schedule(Event::new(ps(5), rec.clone(), "beta"));
            engine.schedule(Event::new(ps(3), rec.clone(), "gamma").with_secondary(true));
            engine.schedule(Event::new(ps(10), rec.clone(), "delta"));
            engine.run();
            let log = rec.log.lock().clone();
            log
        }
        assert_eq!(trace(), trace());
    }

    proptest! {
        #[test]
        fn prop_time_is_monotonic(
            events in proptest::collection::vec((0u64..1_000, any::<bool>()), 1..64)
        ) {
            let engine = SerialEngine::new();
            let rec = Arc::new(Recorder::default());
            for (t, secondary) in &events {
                let tag = if *secondary { "s" } else { "p" };
                engine.schedule(Event::new(ps(*t), rec.clone(), tag).with_secondary(*secondary));
            }
            engine.run();

            let log = rec.log.lock();
            prop_assert_eq!(log.len(), events.len());
            for w in log.windows(2) {
                prop_assert!(w[0].0 <= w[1].0);
                // A secondary never precedes a primary at the same time.
                prop_assert!(!(w[0].0 == w[1].0 && w[0].1 == "s" && w[1].1 == "p"));
            }
        }
    }
}
