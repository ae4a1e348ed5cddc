//! flowroute: flow-routing controller for programmable switch fabrics.
//!
//! This crate holds the live topology graph, the telemetry monitor that keeps
//! its link loads current, and the control loop that routes each new flow and
//! programs its path onto the switches. Path-selection strategies from
//! `flowroute-algorithms` decide where each flow goes.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  counters   ┌─────────────┐  load_by_counter
//!  │ Control      │────────────▶│  Telemetry  │──────────────┐
//!  │ Plane        │             │  Monitor    │              ▼
//!  │ (switches)   │             └─────────────┘      ┌──────────────┐
//!  │              │                                  │   Topology   │
//!  │              │  first packet ┌─────────────┐    │    Graph     │
//!  │              │──────────────▶│    Flow     │◀──▶│ (RwLock)     │
//!  │              │               │   Tracker   │    └──────────────┘
//!  │              │◀──────────────│ (decision   │           ▲
//!  │              │  table rules  │   lock)     │           │
//!  └──────────────┘               └──────┬──────┘    ┌──────┴───────┐
//!                                        └──────────▶│   Strategy   │
//!                                                    │  (routing)   │
//!                                                    └──────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod control_plane;
pub mod engine;
pub mod graph;
pub mod metrics;
pub mod prediction;
pub mod programmer;
pub mod replay;
pub mod telemetry;
pub mod topology;
pub mod tracker;

// Re-export key types for convenience.
pub use clock::{Clock, ManualClock, WallClock};
pub use config::RouterConfig;
pub use control_plane::{ControlPlane, InMemoryControlPlane, TableEntry};
pub use engine::{EngineError, FlowRoutingEngine, StartupReport};
pub use graph::TopologyGraph;
pub use metrics::{format_table, FlowRecord, ForwardingMetrics};
pub use prediction::{PredictionSource, StaticPredictions};
pub use programmer::RuleProgrammer;
pub use replay::{load_replay, ReplayDecision, ReplayEvent, Replayer};
pub use telemetry::{ReadinessEvent, TelemetryMonitor};
pub use topology::TopologySpec;
pub use tracker::{FlowError, FlowKey, FlowOutcome, FlowTracker, PacketArrival, PacketHint};
