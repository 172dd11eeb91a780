//! Multi-threaded engine.
//!
//! Pops the whole batch of events sharing the earliest `(time, class)`
//! and dispatches it on a rayon pool. Components only interact through
//! ports, whose state is locked per instance, so handlers in one batch
//! cannot observe each other. Events scheduled while a batch runs land in
//! a later batch, exactly where the serial engine would dispatch them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use super::queue::EventQueue;
use super::{dispatch, Engine, RunReport};
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventId};
use crate::hook::{Hook, HookCtx, Hookable, Hooks};
use crate::time::VirtualTime;

pub struct ParallelEngine {
    queue: Mutex<EventQueue>,
    paused: AtomicBool,
    hooks: Hooks,
    pool: Option<rayon::ThreadPool>,
}

impl ParallelEngine {
    /// An engine on rayon's global pool.
    pub fn new() -> Self {
        ParallelEngine {
            queue: Mutex::new(EventQueue::new()),
            paused: AtomicBool::new(false),
            hooks: Hooks::new(),
            pool: None,
        }
    }

    /// An engine on a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> SimResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chronowire-worker-{i}"))
            .build()
            .map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        Ok(ParallelEngine {
            pool: Some(pool),
            ..Self::new()
        })
    }

    fn dispatch_batch(&self, batch: Vec<Event>) -> RunReport {
        let work = || {
            batch
                .par_iter()
                .map(|event| dispatch("ParallelEngine", &self.hooks, event))
                .collect::<Vec<_>>()
        };
        let results = match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        };

        let mut report = RunReport {
            dispatched: batch.len() as u64,
            ..RunReport::default()
        };
        report
            .failures
            .extend(results.into_iter().filter_map(Result::err));
        report
    }
}

impl Default for ParallelEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParallelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelEngine")
            .field("queue", &self.queue)
            .field("paused", &self.paused)
            .field("threads", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish()
    }
}

impl Engine for ParallelEngine {
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
            let batch = self.queue.lock().pop_batch();
            if batch.is_empty() {
                break;
            }
            report.absorb(self.dispatch_batch(batch));
        }
        report
    }

    fn step(&self) -> RunReport {
        let batch = self.queue.lock().pop_batch();
        self.dispatch_batch(batch)
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

impl Hookable for ParallelEngine {
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
