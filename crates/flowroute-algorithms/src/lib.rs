//! Built-in path-selection strategies for flowroute.
//!
//! This crate provides the [`RoutingStrategy`] trait and the strategies a
//! flow-routing controller can be configured with:
//!
//! | Strategy | Metric | Picks |
//! |----------|--------|-------|
//! | [`ShortestPath`] | hops, load_by_counter | Dijkstra over hop count or link load |
//! | [`Ecmp`] | hash, round_robin, random | One of the equal-cost egress ports at the edge switch |
//! | [`LeastLoadedPath`] | load_by_counter | Path whose most loaded link is least loaded |
//! | [`FlowPrediction`] | throughput | Feasible path with the most remaining capacity |
//!
//! Strategy and metric are chosen together as a [`Selection`] and resolved
//! once, so an unsupported or unimplemented pairing is rejected before any
//! flow is routed.

pub mod ecmp;
pub mod flow_prediction;
pub mod path_property;
pub mod selection;
pub mod shortest_path;
pub mod traits;

pub use ecmp::{Ecmp, EcmpMode, ECMP_BASE};
pub use flow_prediction::{FlowPrediction, PathAssessment};
pub use path_property::LeastLoadedPath;
pub use selection::{
    EcmpMetric, PathMetric, PredictionMetric, Selection, SelectionError, ShortestPathMetric,
    Strategy,
};
pub use shortest_path::ShortestPath;
pub use traits::*;

/// Create a routing strategy from its configured strategy and metric names.
pub fn strategy_by_name(
    strategy: &str,
    metric: &str,
    seed: u64,
) -> Result<Box<dyn RoutingStrategy>, SelectionError> {
    Selection::parse(strategy, metric)?.resolve(seed)
}

/// List every (strategy, metric) pairing that routes end-to-end.
pub fn available_selections() -> Vec<(&'static str, &'static str)> {
    Selection::all()
        .into_iter()
        .filter(Selection::is_implemented)
        .map(|s| (s.strategy().as_str(), s.metric_name()))
        .collect()
}
