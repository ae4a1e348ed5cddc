//! Strategy and metric selection.
//!
//! A controller is configured with a strategy name and a metric name. The
//! valid metrics depend on the strategy, and only some pairings are routed
//! end-to-end. [`Selection::resolve`] turns a pairing into a boxed
//! [`RoutingStrategy`] once at startup; anything else is an error there.

use crate::ecmp::{Ecmp, EcmpMode};
use crate::flow_prediction::FlowPrediction;
use crate::path_property::LeastLoadedPath;
use crate::shortest_path::ShortestPath;
use crate::traits::{LinkProperty, RoutingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Unknown flow forwarding strategy: {0}")]
    UnknownStrategy(String),
    #[error("No valid mapping between flow forwarding strategy and metric (strategy: {strategy} | metric: {metric})")]
    Mismatch { strategy: String, metric: String },
    #[error("{strategy}/{metric} is not implemented yet: {reason}")]
    NotImplemented {
        strategy: &'static str,
        metric: &'static str,
        reason: &'static str,
    },
}

/// Top-level flow forwarding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ShortestPath,
    Ecmp,
    PathProperty,
    FlowPrediction,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::ShortestPath,
        Strategy::Ecmp,
        Strategy::PathProperty,
        Strategy::FlowPrediction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::ShortestPath => "shortest_path",
            Strategy::Ecmp => "ecmp",
            Strategy::PathProperty => "path_property",
            Strategy::FlowPrediction => "flow_prediction",
        }
    }

    pub fn parse(name: &str) -> Result<Self, SelectionError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == name)
            .ok_or_else(|| SelectionError::UnknownStrategy(name.to_string()))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortestPathMetric {
    Hops,
    Bandwidth,
    LoadByCounter,
    LoadByProbe,
    LatencyByProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcmpMetric {
    Hash,
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathMetric {
    LoadByCounter,
    LoadByProbe,
    LatencyByProbe,
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionMetric {
    Throughput,
    Duration,
    Bytes,
    /// Bytes and duration, combined into a throughput.
    Combined,
}

/// A strategy together with one of its own metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selection {
    ShortestPath(ShortestPathMetric),
    Ecmp(EcmpMetric),
    PathProperty(PathMetric),
    FlowPrediction(PredictionMetric),
}

impl Selection {
    /// Parse a strategy/metric pair, rejecting metrics that belong to a
    /// different strategy.
    pub fn parse(strategy: &str, metric: &str) -> Result<Self, SelectionError> {
        let parsed = Strategy::parse(strategy)?;
        Self::all()
            .into_iter()
            .find(|s| s.strategy() == parsed && s.metric_name() == metric)
            .ok_or_else(|| SelectionError::Mismatch {
                strategy: strategy.to_string(),
                metric: metric.to_string(),
            })
    }

    /// Every structurally valid pairing, implemented or not.
    pub fn all() -> Vec<Selection> {
        use EcmpMetric as E;
        use PathMetric as P;
        use PredictionMetric as F;
        use ShortestPathMetric as S;
        vec![
            Selection::ShortestPath(S::Hops),
            Selection::ShortestPath(S::Bandwidth),
            Selection::ShortestPath(S::LoadByCounter),
            Selection::ShortestPath(S::LoadByProbe),
            Selection::ShortestPath(S::LatencyByProbe),
            Selection::Ecmp(E::Hash),
            Selection::Ecmp(E::RoundRobin),
            Selection::Ecmp(E::Random),
            Selection::PathProperty(P::LoadByCounter),
            Selection::PathProperty(P::LoadByProbe),
            Selection::PathProperty(P::LatencyByProbe),
            Selection::PathProperty(P::Combined),
            Selection::FlowPrediction(F::Throughput),
            Selection::FlowPrediction(F::Duration),
            Selection::FlowPrediction(F::Bytes),
            Selection::FlowPrediction(F::Combined),
        ]
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Selection::ShortestPath(_) => Strategy::ShortestPath,
            Selection::Ecmp(_) => Strategy::Ecmp,
            Selection::PathProperty(_) => Strategy::PathProperty,
            Selection::FlowPrediction(_) => Strategy::FlowPrediction,
        }
    }

    pub fn metric_name(&self) -> &'static str {
        match self {
            Selection::ShortestPath(m) => match m {
                ShortestPathMetric::Hops => "hops",
                ShortestPathMetric::Bandwidth => "bandwidth",
                ShortestPathMetric::LoadByCounter => "load_by_counter",
                ShortestPathMetric::LoadByProbe => "load_by_probe",
                ShortestPathMetric::LatencyByProbe => "latency_by_probe",
            },
            Selection::Ecmp(m) => match m {
                EcmpMetric::Hash => "hash",
                EcmpMetric::RoundRobin => "round_robin",
                EcmpMetric::Random => "random",
            },
            Selection::PathProperty(m) => match m {
                PathMetric::LoadByCounter => "load_by_counter",
                PathMetric::LoadByProbe => "load_by_probe",
                PathMetric::LatencyByProbe => "latency_by_probe",
                PathMetric::Combined => "combined",
            },
            Selection::FlowPrediction(m) => match m {
                PredictionMetric::Throughput => "throughput",
                PredictionMetric::Duration => "duration",
                PredictionMetric::Bytes => "bytes",
                PredictionMetric::Combined => "combined",
            },
        }
    }

    pub fn is_implemented(&self) -> bool {
        self.unimplemented_reason().is_none()
    }

    fn unimplemented_reason(&self) -> Option<&'static str> {
        match self {
            Selection::ShortestPath(ShortestPathMetric::Bandwidth) => {
                Some("raw bandwidth is not a usable shortest-path weight")
            }
            Selection::ShortestPath(ShortestPathMetric::LoadByProbe)
            | Selection::PathProperty(PathMetric::LoadByProbe) => {
                Some("link loads collected by probing are not available")
            }
            Selection::ShortestPath(ShortestPathMetric::LatencyByProbe)
            | Selection::PathProperty(PathMetric::LatencyByProbe) => {
                Some("link latencies collected by probing are not available")
            }
            Selection::PathProperty(PathMetric::Combined) => Some(
                "combining probed loads, counter loads and probed latencies is not available",
            ),
            Selection::FlowPrediction(PredictionMetric::Duration) => {
                Some("a flow's predicted duration is not considered")
            }
            Selection::FlowPrediction(PredictionMetric::Bytes) => {
                Some("a flow's predicted number of bytes is not considered")
            }
            Selection::FlowPrediction(PredictionMetric::Combined) => {
                Some("predicted bytes and duration are not combined into a throughput")
            }
            _ => None,
        }
    }

    /// Build the strategy for this selection. `seed` feeds random ECMP.
    pub fn resolve(self, seed: u64) -> Result<Box<dyn RoutingStrategy>, SelectionError> {
        if let Some(reason) = self.unimplemented_reason() {
            return Err(SelectionError::NotImplemented {
                strategy: self.strategy().as_str(),
                metric: self.metric_name(),
                reason,
            });
        }
        let strategy: Box<dyn RoutingStrategy> = match self {
            Selection::ShortestPath(ShortestPathMetric::Hops) => Box::new(ShortestPath::hops()),
            Selection::ShortestPath(_) => {
                Box::new(ShortestPath::weighted(LinkProperty::LoadByCounter))
            }
            Selection::Ecmp(EcmpMetric::Hash) => Box::new(Ecmp::new(EcmpMode::Hash, seed)),
            Selection::Ecmp(EcmpMetric::RoundRobin) => {
                Box::new(Ecmp::new(EcmpMode::RoundRobin, seed))
            }
            Selection::Ecmp(EcmpMetric::Random) => Box::new(Ecmp::new(EcmpMode::Random, seed)),
            Selection::PathProperty(_) => {
                Box::new(LeastLoadedPath::new(LinkProperty::LoadByCounter))
            }
            Selection::FlowPrediction(_) => {
                Box::new(FlowPrediction::new(LinkProperty::LoadByCounter))
            }
        };
        Ok(strategy)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy(), self.metric_name())
    }
}
