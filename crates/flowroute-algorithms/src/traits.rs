//! Routing strategy trait definitions.
//!
//! All path-selection strategies implement the [`RoutingStrategy`] trait. A
//! strategy never owns the topology: it queries the live graph through the
//! read-only [`TopologyView`] and returns a [`RoutingDecision`] that the caller
//! programs onto the fabric.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// An ordered node sequence from source host to destination host.
pub type Path = Vec<String>;

/// A per-link attribute that path algorithms can query or fold.
///
/// The first four are static and fixed when the graph is built; the rest are
/// dynamic metrics that carry a current value and a timestamped history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkProperty {
    /// Normalized capacity, 1.0 is full link speed.
    Capacity,
    /// Raw bandwidth in topology data-rate units.
    Bandwidth,
    /// Propagation delay in milliseconds.
    Delay,
    /// Loss in percent.
    Loss,
    /// Generic weight.
    Weight,
    /// Load ratio derived from port counters.
    LoadByCounter,
    /// Load ratio derived from probing.
    LoadByProbe,
    /// Latency derived from probing.
    LatencyByProbe,
}

impl LinkProperty {
    /// Metrics that are written at runtime and keep a history.
    pub const DYNAMIC: [LinkProperty; 4] = [
        LinkProperty::Weight,
        LinkProperty::LoadByCounter,
        LinkProperty::LoadByProbe,
        LinkProperty::LatencyByProbe,
    ];

    pub fn is_dynamic(self) -> bool {
        Self::DYNAMIC.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkProperty::Capacity => "capacity",
            LinkProperty::Bandwidth => "bandwidth",
            LinkProperty::Delay => "delay",
            LinkProperty::Loss => "loss",
            LinkProperty::Weight => "weight",
            LinkProperty::LoadByCounter => "load_by_counter",
            LinkProperty::LoadByProbe => "load_by_probe",
            LinkProperty::LatencyByProbe => "latency_by_probe",
        }
    }
}

impl fmt::Display for LinkProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a per-link value is folded into a single path value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    /// Bottleneck resource: the smallest link value wins.
    Min,
    /// Bottleneck congestion: the largest link value wins.
    Max,
}

impl AggregateMode {
    /// Whether `candidate` replaces `current`. Equal values never replace,
    /// so the first link in path order wins a tie.
    pub fn dominates(self, candidate: f64, current: f64) -> bool {
        match self {
            AggregateMode::Min => candidate < current,
            AggregateMode::Max => candidate > current,
        }
    }
}

/// Data-rate units used for link bandwidth and predicted throughput.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRate {
    Kilobit,
    #[default]
    Megabit,
    Gigabit,
}

impl DataRate {
    /// Bits per second represented by one unit.
    pub fn bits_per_second(self) -> f64 {
        match self {
            DataRate::Kilobit => 1e3,
            DataRate::Megabit => 1e6,
            DataRate::Gigabit => 1e9,
        }
    }
}

/// A throughput value with its unit, e.g. a predicted flow rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub value: f64,
    pub unit: DataRate,
}

impl Throughput {
    pub fn new(value: f64, unit: DataRate) -> Self {
        Self { value, unit }
    }

    pub fn bits_per_second(&self) -> f64 {
        self.value * self.unit.bits_per_second()
    }
}

/// Read-only view of the topology graph, as seen by routing strategies.
pub trait TopologyView {
    /// Dijkstra shortest path. `None` weight means every edge weighs 1.
    fn shortest_path(&self, src: &str, dst: &str, weight: Option<LinkProperty>) -> Option<Path>;

    /// All simple paths from `src` to `dst`, in depth-first enumeration order.
    fn all_simple_paths(&self, src: &str, dst: &str) -> Vec<Path>;

    /// Fold `key` over the links between the interior nodes of `path`.
    ///
    /// Returns `Ok(None)` when the interior has no link (a single switch),
    /// and an error when `path` names a link the topology does not have.
    fn path_aggregate(
        &self,
        path: &[String],
        key: LinkProperty,
        mode: AggregateMode,
    ) -> Result<Option<f64>, RoutingError>;

    /// The peer reached through `port` on `switch`.
    fn neighbor_on_port(&self, switch: &str, port: u32) -> Option<&str>;

    /// Number of egress ports usable for ECMP on an edge switch.
    fn ecmp_port_count(&self, switch: &str) -> Option<u32>;

    /// Unit in which link bandwidth is expressed.
    fn data_rate(&self) -> DataRate;
}

/// Information about a newly observed flow, provided to routing strategies.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Stable hash of the flow 5-tuple.
    pub flow_hash: String,
    pub src_host: String,
    pub dst_host: String,
    /// Egress port index computed by the switch, used by hash-based ECMP.
    pub ecmp_hint: Option<u32>,
    /// Predicted throughput, used by flow-prediction placement.
    pub predicted_throughput: Option<Throughput>,
}

/// Decision returned by a routing strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    /// Program the flow along this path.
    Route(Path),
    /// Program the flow along this path and credit `flow_load` onto the
    /// counter-load metric of every interior link right away.
    RouteWithReservation { path: Path, flow_load: f64 },
}

impl RoutingDecision {
    pub fn path(&self) -> &Path {
        match self {
            RoutingDecision::Route(path) => path,
            RoutingDecision::RouteWithReservation { path, .. } => path,
        }
    }

    pub fn reservation(&self) -> Option<f64> {
        match self {
            RoutingDecision::Route(_) => None,
            RoutingDecision::RouteWithReservation { flow_load, .. } => Some(*flow_load),
        }
    }

    pub fn into_path(self) -> Path {
        match self {
            RoutingDecision::Route(path) => path,
            RoutingDecision::RouteWithReservation { path, .. } => path,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("No path from {src} to {dst}")]
    NoPath { src: String, dst: String },
    #[error("Switch {0} has no ECMP egress ports")]
    NoEcmpPorts(String),
    #[error("ECMP port {port} on switch {switch} is not mapped to a neighbor")]
    EcmpPortUnmapped { switch: String, port: u32 },
    #[error("No enumerated path leaves {switch} towards {neighbor}")]
    NoEcmpPath { switch: String, neighbor: String },
    #[error("Hash-based ECMP needs a switch-computed hint for flow {0}")]
    MissingEcmpHint(String),
    #[error("No throughput prediction for flow {0}")]
    MissingPrediction(String),
    #[error("Topology query failed: {0}")]
    Topology(String),
}

/// The core routing strategy trait.
///
/// A strategy is resolved once at startup and then called for every new flow
/// while the caller holds the decision lock, so `route` may keep state.
pub trait RoutingStrategy: Send {
    /// Called for each new flow. Returns the path to program.
    fn route(
        &mut self,
        request: &FlowRequest,
        topology: &dyn TopologyView,
    ) -> Result<RoutingDecision, RoutingError>;

    /// Human-readable name for logs and reports.
    fn name(&self) -> &str;

    /// Whether the caller must attach a throughput prediction to requests.
    fn requires_prediction(&self) -> bool {
        false
    }

    /// Optional: strategy-specific counters to include in output.
    fn custom_metrics(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}

/// The nodes strictly between the two endpoints of `path`.
pub fn interior(path: &[String]) -> &[String] {
    if path.len() < 2 {
        return &[];
    }
    &path[1..path.len() - 1]
}

/// Directed links between consecutive interior nodes of `path`.
pub fn interior_links(path: &[String]) -> impl Iterator<Item = (&str, &str)> {
    interior(path)
        .windows(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
}
