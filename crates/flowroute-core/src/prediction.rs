//! Throughput predictions for flow-prediction placement.

use flowroute_algorithms::Throughput;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Supplies a predicted throughput for a flow, by flow hash.
pub trait PredictionSource: Send + Sync {
    fn predict(&self, flow_hash: &str) -> Option<Throughput>;
}

/// Predictions held in memory, e.g. loaded from a recorded run.
#[derive(Debug, Default)]
pub struct StaticPredictions {
    by_flow: RwLock<HashMap<String, Throughput>>,
}

impl StaticPredictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flow_hash: &str, throughput: Throughput) {
        self.by_flow.write().insert(flow_hash.to_string(), throughput);
    }

    pub fn len(&self) -> usize {
        self.by_flow.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(String, Throughput)> for StaticPredictions {
    fn from_iter<I: IntoIterator<Item = (String, Throughput)>>(iter: I) -> Self {
        Self {
            by_flow: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl PredictionSource for StaticPredictions {
    fn predict(&self, flow_hash: &str) -> Option<Throughput> {
        self.by_flow.read().get(flow_hash).copied()
    }
}
