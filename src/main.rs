use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use chronowire::{
    Connection, DirectConnection, EngineKind, KernelConfig, PingAgent, Port, RoundTrip, SimResult,
    Simulation, TickingPingAgent, VirtualTime,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Event-driven agents answering after a fixed delay.
    Ping,
    /// Cycle-driven agents answering after a fixed number of cycles.
    TickingPing,
}

/// Run a two-agent ping model and print every round trip.
#[derive(Debug, Parser)]
#[command(name = "chronowire", version)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Scenario::Ping)]
    scenario: Scenario,

    /// Overrides the engine from the config file.
    #[arg(long, value_enum)]
    engine: Option<EngineKind>,

    /// Worker threads for the parallel engine.
    #[arg(long)]
    threads: Option<usize>,

    /// JSON kernel configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 2)]
    pings: usize,

    /// Print buffer occupancy as JSON after the run.
    #[arg(long)]
    monitor: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(trips) => {
            for trip in trips {
                println!("{trip}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> SimResult<KernelConfig> {
    let mut config = match (&cli.config, cli.scenario) {
        (Some(path), _) => KernelConfig::from_file(path)?,
        (None, Scenario::TickingPing) => KernelConfig::slow_components(),
        (None, Scenario::Ping) => KernelConfig::default(),
    };
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> SimResult<Vec<RoundTrip>> {
    let config = load_config(cli)?;
    let mut sim = Simulation::from_config(&config)?;
    let engine = sim.engine().clone();

    let conn = DirectConnection::builder()
        .with_engine(engine.clone())
        .with_freq(config.connection_freq())
        .build("Conn");

    let trips: Box<dyn Fn() -> Vec<RoundTrip>> = match cli.scenario {
        Scenario::Ping => {
            let a = PingAgent::with_capacity(engine.clone(), "AgentA", config.port_capacity);
            let b = PingAgent::with_capacity(engine, "AgentB", config.port_capacity);
            conn.plug_in(a.out_port());
            conn.plug_in(b.out_port());
            sim.monitor().register_port(a.out_port());
            sim.monitor().register_port(b.out_port());

            let dst = b.out_port().as_remote();
            for i in 0..cli.pings as u64 {
                a.ping_at(VirtualTime::from_secs(1 + 2 * i), dst.clone());
            }
            sim.register_component(a.clone());
            sim.register_component(b);
            Box::new(move || a.round_trips())
        }
        Scenario::TickingPing => {
            let a = TickingPingAgent::new(engine.clone(), "AgentA", config.component_freq());
            let b = TickingPingAgent::new(engine, "AgentB", config.component_freq());
            conn.plug_in(a.out_port());
            conn.plug_in(b.out_port());
            sim.monitor().register_port(a.out_port());
            sim.monitor().register_port(b.out_port());

            a.start_pinging(b.out_port().as_remote(), cli.pings);
            sim.register_component(a.component().clone());
            sim.register_component(b.component().clone());
            Box::new(move || a.round_trips())
        }
    };

    if cli.monitor {
        sim.add_finalizer(|s: &Simulation| {
            let snap = s.monitor().snapshot(s.now());
            match serde_json::to_string_pretty(&snap) {
                Ok(json) => eprintln!("{json}"),
                Err(e) => tracing::warn!(error = %e, "monitor snapshot not serializable"),
            }
        });
    }

    let report = sim.run();
    sim.teardown();
    for failure in &report.failures {
        tracing::warn!(
            event = %failure.event,
            time_ps = failure.time.as_ps(),
            error = %failure.error,
            "event failed"
        );
    }
    tracing::info!(
        dispatched = report.dispatched,
        failures = report.failures.len(),
        secs = sim.now().as_secs_f64(),
        "simulation finished"
    );
    Ok(trips())
}
