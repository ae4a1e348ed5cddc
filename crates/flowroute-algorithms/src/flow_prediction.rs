//! Prediction-based flow routing (PFR).
//!
//! Places a flow using its predicted throughput. For every simple path the
//! router computes
//!
//! ```text
//! capacity  = MIN over interior links of capacity
//! load      = MAX over interior links of the load metric
//! remaining = capacity - load
//! flow_load = throughput_bps / (MIN bandwidth * topology data rate)
//! ```
//!
//! A path is feasible when `flow_load < remaining`. Among feasible paths the
//! one with the most remaining capacity wins; if none is feasible the path
//! with the most remaining capacity overall is used instead. Ties go to the
//! path enumerated first. The decision carries `flow_load` so the caller can
//! reserve it on the chosen path before telemetry measures the flow.

use crate::traits::*;
use std::collections::HashMap;

/// Capacity of a path whose interior has no link to fold.
const FULL_CAPACITY: f64 = 1.0;

/// Per-path figures the placement is decided on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathAssessment {
    pub capacity: f64,
    pub load: f64,
    pub remaining: f64,
    pub flow_load: f64,
}

impl PathAssessment {
    pub fn is_feasible(&self) -> bool {
        self.flow_load < self.remaining
    }
}

/// Flow-prediction router.
pub struct FlowPrediction {
    load_metric: LinkProperty,
    placed: u64,
    fallbacks: u64,
}

impl FlowPrediction {
    pub fn new(load_metric: LinkProperty) -> Self {
        Self {
            load_metric,
            placed: 0,
            fallbacks: 0,
        }
    }

    /// Compute capacity, load and the flow's relative load for one path.
    pub fn assess(
        &self,
        topology: &dyn TopologyView,
        path: &[String],
        throughput: &Throughput,
    ) -> Result<PathAssessment, RoutingError> {
        let capacity = topology
            .path_aggregate(path, LinkProperty::Capacity, AggregateMode::Min)?
            .unwrap_or(FULL_CAPACITY);
        let load = topology
            .path_aggregate(path, self.load_metric, AggregateMode::Max)?
            .unwrap_or(0.0);
        let flow_load = topology
            .path_aggregate(path, LinkProperty::Bandwidth, AggregateMode::Min)?
            .map(|bw| throughput.bits_per_second() / (bw * topology.data_rate().bits_per_second()))
            .unwrap_or(0.0);

        Ok(PathAssessment {
            capacity,
            load,
            remaining: capacity - load,
            flow_load,
        })
    }

    /// Index of the path to place the flow on, and whether it was feasible.
    ///
    /// Returns `None` only for an empty slice.
    pub fn place(assessments: &[PathAssessment]) -> Option<(usize, bool)> {
        let most_remaining = |feasible_only: bool| {
            let mut best: Option<(usize, f64)> = None;
            for (i, a) in assessments.iter().enumerate() {
                if feasible_only && !a.is_feasible() {
                    continue;
                }
                if best.map_or(true, |(_, r)| a.remaining > r) {
                    best = Some((i, a.remaining));
                }
            }
            best.map(|(i, _)| i)
        };

        most_remaining(true)
            .map(|i| (i, true))
            .or_else(|| most_remaining(false).map(|i| (i, false)))
    }
}

impl RoutingStrategy for FlowPrediction {
    fn route(
        &mut self,
        request: &FlowRequest,
        topology: &dyn TopologyView,
    ) -> Result<RoutingDecision, RoutingError> {
        let throughput = request
            .predicted_throughput
            .ok_or_else(|| RoutingError::MissingPrediction(request.flow_hash.clone()))?;

        let mut paths = topology.all_simple_paths(&request.src_host, &request.dst_host);
        let assessments: Vec<PathAssessment> = paths
            .iter()
            .map(|p| self.assess(topology, p, &throughput))
            .collect::<Result<_, _>>()?;

        let (index, feasible) =
            Self::place(&assessments).ok_or_else(|| RoutingError::NoPath {
                src: request.src_host.clone(),
                dst: request.dst_host.clone(),
            })?;

        self.placed += 1;
        if !feasible {
            self.fallbacks += 1;
            tracing::debug!(
                flow = %request.flow_hash,
                remaining = assessments[index].remaining,
                flow_load = assessments[index].flow_load,
                "no feasible path, placing on path with most remaining capacity"
            );
        }

        Ok(RoutingDecision::RouteWithReservation {
            path: paths.swap_remove(index),
            flow_load: assessments[index].flow_load,
        })
    }

    fn name(&self) -> &str {
        "flow_prediction"
    }

    fn requires_prediction(&self) -> bool {
        true
    }

    fn custom_metrics(&self) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert("pfr_placed".to_string(), self.placed as f64);
        m.insert("pfr_fallbacks".to_string(), self.fallbacks as f64);
        m
    }
}
