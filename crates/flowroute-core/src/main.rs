//! flowroute CLI: validate controller setups and replay recorded flows.

use clap::{Parser, Subcommand};
use flowroute_core::config::RouterConfig;
use flowroute_core::replay::{self, ReplayDecision, Replayer};
use flowroute_core::tracker::RecordingForwarder;
use flowroute_core::{
    metrics, FlowRoutingEngine, InMemoryControlPlane, ManualClock, TopologyGraph, TopologySpec,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "flowroute",
    about = "Flow-routing controller for programmable switch fabrics",
    version
)]
struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a config and its topology and resolve the strategy.
    Validate {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Replay recorded first packets against an in-memory control plane.
    Replay {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// JSONL file of packet, counter and tick events.
        #[arg(short, long)]
        flows: PathBuf,
        /// Output decisions and metrics to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the strategy/metric pairings that can be configured.
    ListStrategies,
}

#[derive(Serialize)]
struct ReplayReport {
    decisions: Vec<ReplayDecision>,
    metrics: metrics::ForwardingMetrics,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Validate { config } => {
            let router_config = load_config(&config);
            let spec = TopologySpec::from_file(&router_config.topology.path).unwrap_or_else(|e| {
                eprintln!("Error loading topology: {}", e);
                std::process::exit(1);
            });
            let graph = TopologyGraph::from_spec(&spec, router_config.monitor.data_rate)
                .unwrap_or_else(|e| {
                    eprintln!("Error building topology: {}", e);
                    std::process::exit(1);
                });
            let selection = router_config.selection().unwrap_or_else(|e| {
                eprintln!("Error resolving strategy: {}", e);
                std::process::exit(1);
            });

            println!("Configuration OK: {}", router_config.controller.name);
            println!("  strategy:  {}", selection);
            println!(
                "  topology:  {} switches, {} hosts, {} switch links",
                graph.switches().count(),
                graph.hosts().count(),
                graph.switch_links().count()
            );
            println!(
                "  monitor:   {} every {} ms ({})",
                if router_config.monitor.enabled { "on" } else { "off" },
                router_config.monitor.interval_ms,
                router_config.counter_name()
            );
        }
        Commands::Replay {
            config,
            flows,
            output,
        } => {
            let mut router_config = load_config(&config);
            let events = replay::load_replay(&flows).unwrap_or_else(|e| {
                eprintln!("Error loading flows: {}", e);
                std::process::exit(1);
            });

            // ticks come from the replay file instead of a monitor thread
            router_config.monitor.enabled = false;
            let clock = Arc::new(ManualClock::new());
            let control_plane = Arc::new(InMemoryControlPlane::new());
            let mut engine = FlowRoutingEngine::from_config(
                router_config,
                control_plane.clone(),
                clock.clone(),
                Arc::new(RecordingForwarder::new()),
            )
            .unwrap_or_else(|e| {
                eprintln!("Error building engine: {}", e);
                std::process::exit(1);
            })
            .with_predictions(Arc::new(replay::predictions(&events)));

            let report = engine.start().unwrap_or_else(|e| {
                eprintln!("Error starting engine: {}", e);
                std::process::exit(1);
            });
            println!("Programmed {} static entries", report.static_entries);

            let monitor = engine.telemetry_monitor().unwrap_or_else(|e| {
                eprintln!("Error creating telemetry monitor: {}", e);
                std::process::exit(1);
            });
            let mut replayer = Replayer::new(engine.config(), &clock, &control_plane, monitor);
            let decisions = replayer.run(&events, |arrival| engine.handle_packet(arrival));

            for decision in &decisions {
                match decision {
                    ReplayDecision::Routed(record) => {
                        print!("{}  {}", &record.flow_hash[..12], record.path.join(" -> "));
                        if let Some(load) = record.reserved_load {
                            print!("  reserved={:.4}", load);
                        }
                        if let Some(t) = &record.timings {
                            print!("  handled in {:.3} ms", t.flow_handling_ms);
                        }
                        println!();
                    }
                    ReplayDecision::Duplicate { flow_hash } => {
                        println!("{}  duplicate", &flow_hash[..12]);
                    }
                    ReplayDecision::Failed { flow_hash, error } => {
                        println!("{}  failed: {}", &flow_hash[..12], error);
                    }
                }
            }

            let result = engine.shutdown().unwrap_or_else(|e| {
                eprintln!("Error during shutdown: {}", e);
                std::process::exit(1);
            });
            println!("{}", metrics::format_table(&result));

            if let Some(output_path) = output {
                let report = ReplayReport {
                    decisions,
                    metrics: result,
                };
                let json = serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
                    eprintln!("Error serializing results: {}", e);
                    std::process::exit(1);
                });
                std::fs::write(&output_path, json).unwrap_or_else(|e| {
                    eprintln!("Error writing output: {}", e);
                    std::process::exit(1);
                });
                println!("Results written to {}", output_path.display());
            }
        }
        Commands::ListStrategies => {
            println!("Available strategy/metric pairings:");
            for (strategy, metric) in flowroute_algorithms::available_selections() {
                println!("  - {} / {}", strategy, metric);
            }
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &std::path::Path) -> RouterConfig {
    RouterConfig::from_file(path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    })
}
