//! Shortest-path routing.
//!
//! Routes every flow along the Dijkstra shortest path between its hosts,
//! either by hop count or weighted by a live link metric. Ignores any state
//! other than the metric it is weighted by.

use crate::traits::*;

/// Shortest-path router.
pub struct ShortestPath {
    /// Link property used as edge weight; `None` counts hops.
    weight: Option<LinkProperty>,
    name: String,
}

impl ShortestPath {
    pub fn hops() -> Self {
        Self {
            weight: None,
            name: "shortest_path_hops".to_string(),
        }
    }

    pub fn weighted(key: LinkProperty) -> Self {
        Self {
            weight: Some(key),
            name: format!("shortest_path_{}", key),
        }
    }
}

impl RoutingStrategy for ShortestPath {
    fn route(
        &mut self,
        request: &FlowRequest,
        topology: &dyn TopologyView,
    ) -> Result<RoutingDecision, RoutingError> {
        topology
            .shortest_path(&request.src_host, &request.dst_host, self.weight)
            .map(RoutingDecision::Route)
            .ok_or_else(|| RoutingError::NoPath {
                src: request.src_host.clone(),
                dst: request.dst_host.clone(),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
