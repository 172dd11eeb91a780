//! Top-level simulation driver.
//!
//! A [`Simulation`] owns the engine, a directory of components keyed by
//! name, the occupancy [`Monitor`], and the finalizers that run when the
//! model is torn down. Models are wired outside the driver and then
//! registered with it:
//!
//! ```no_run
//! use chronowire::{KernelConfig, PingAgent, Simulation};
//!
//! let mut sim = Simulation::from_config(&KernelConfig::default())?;
//! let agent = PingAgent::new(sim.engine().clone(), "Agent");
//! sim.register_component(agent);
//! let report = sim.run();
//! sim.teardown();
//! # Ok::<(), chronowire::SimError>(())
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::KernelConfig;
use crate::engine::{Engine, RunReport};
use crate::error::SimResult;
use crate::monitor::Monitor;
use crate::port::Component;
use crate::time::VirtualTime;

type Finalizer = Box<dyn FnOnce(&Simulation) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    Running,
    TornDown,
}

pub struct Simulation {
    engine: Arc<dyn Engine>,
    config: KernelConfig,
    components: BTreeMap<String, Arc<dyn Component>>,
    monitor: Monitor,
    finalizers: Vec<Finalizer>,
    phase: Phase,
}

impl Simulation {
    /// Drive an existing engine with the default configuration.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Simulation {
            engine,
            config: KernelConfig::default(),
            components: BTreeMap::new(),
            monitor: Monitor::new(),
            finalizers: Vec::new(),
            phase: Phase::Building,
        }
    }

    /// Build the configured engine and drive it.
    pub fn from_config(config: &KernelConfig) -> SimResult<Self> {
        let engine = config.build_engine()?;
        Ok(Simulation {
            config: config.clone(),
            ..Self::new(engine)
        })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn now(&self) -> VirtualTime {
        self.engine.now()
    }

    /// # Panics
    /// Panics if a component with the same name is already registered.
    pub fn register_component(&mut self, comp: Arc<dyn Component>) {
        let name = comp.name().to_string();
        assert!(
            !self.components.contains_key(&name),
            "component {name} is already registered"
        );
        tracing::debug!(component = %name, "component registered");
        self.components.insert(name, comp);
    }

    pub fn component(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name).cloned()
    }

    /// Registered component names, sorted.
    pub fn component_names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    /// Run `f` once during [`teardown`](Self::teardown). Finalizers run
    /// in registration order.
    pub fn add_finalizer(&mut self, f: impl FnOnce(&Simulation) + Send + 'static) {
        self.finalizers.push(Box::new(f));
    }

    /// Mark the model as fully wired. Called by [`run`](Self::run) if it
    /// has not been called explicitly.
    ///
    /// # Panics
    /// Panics after [`teardown`](Self::teardown).
    pub fn init(&mut self) {
        match self.phase {
            Phase::Building => {
                tracing::debug!(
                    components = self.components.len(),
                    monitored = self.monitor.len(),
                    pending = self.engine.pending(),
                    "simulation initialized"
                );
                self.phase = Phase::Running;
            }
            Phase::Running => {}
            Phase::TornDown => panic!("simulation was already torn down"),
        }
    }

    /// Dispatch until the engine drains or is paused.
    pub fn run(&mut self) -> RunReport {
        self.init();
        let report = self.engine.run();
        tracing::debug!(
            dispatched = report.dispatched,
            failures = report.failures.len(),
            paused = report.paused,
            now_ps = self.now().as_ps(),
            "simulation run returned"
        );
        report
    }

    /// Run every finalizer. Later calls do nothing.
    pub fn teardown(&mut self) {
        if self.phase == Phase::TornDown {
            return;
        }
        self.phase = Phase::TornDown;
        let finalizers = std::mem::take(&mut self.finalizers);
        tracing::debug!(finalizers = finalizers.len(), "simulation teardown");
        for f in finalizers {
            f(self);
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.phase == Phase::TornDown
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("components", &self.component_names())
            .field("monitor", &self.monitor)
            .field("phase", &self.phase)
            .finish()
    }
}
