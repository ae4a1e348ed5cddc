//! Least-loaded path routing.
//!
//! Routes each flow along the simple path whose most loaded interior link is
//! the least loaded. Ties go to the path enumerated first.

use crate::traits::*;

/// Path-property (load-aware) router.
pub struct LeastLoadedPath {
    /// Load metric folded with MAX over each path.
    metric: LinkProperty,
}

impl LeastLoadedPath {
    pub fn new(metric: LinkProperty) -> Self {
        Self { metric }
    }
}

impl RoutingStrategy for LeastLoadedPath {
    fn route(
        &mut self,
        request: &FlowRequest,
        topology: &dyn TopologyView,
    ) -> Result<RoutingDecision, RoutingError> {
        let mut best: Option<(Path, f64)> = None;
        for path in topology.all_simple_paths(&request.src_host, &request.dst_host) {
            let load = topology
                .path_aggregate(&path, self.metric, AggregateMode::Max)?
                .unwrap_or(0.0);
            if best.as_ref().map_or(true, |(_, best_load)| load < *best_load) {
                best = Some((path, load));
            }
        }

        best.map(|(path, _)| RoutingDecision::Route(path))
            .ok_or_else(|| RoutingError::NoPath {
                src: request.src_host.clone(),
                dst: request.dst_host.clone(),
            })
    }

    fn name(&self) -> &str {
        "least_loaded_path"
    }
}
