//! Equal-cost multi-path routing.
//!
//! The decision is taken at the first switch behind the source host (the
//! "ECMP switch"). Its egress ports `[ECMP_BASE, ECMP_BASE + count)` are the
//! candidates; one is picked by the switch-computed flow hash, by a
//! per-switch round-robin counter, or by a seeded random draw, and the flow
//! follows the first enumerated path that leaves through that port.

use crate::traits::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// First ECMP candidate port. Port 0 is unused and port 1 faces the host.
pub const ECMP_BASE: u32 = 2;

/// How the egress port is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcmpMode {
    Hash,
    RoundRobin,
    Random,
}

/// ECMP router.
///
/// Keeps one round-robin index per switch, keyed by switch name, so the
/// rotation of one edge switch is unaffected by flows entering elsewhere.
pub struct Ecmp {
    mode: EcmpMode,
    /// switch -> next round-robin offset from `ECMP_BASE`.
    round_robin: HashMap<String, u32>,
    rng: ChaCha8Rng,
    name: String,
}

impl Ecmp {
    pub fn new(mode: EcmpMode, seed: u64) -> Self {
        let name = match mode {
            EcmpMode::Hash => "ecmp_hash",
            EcmpMode::RoundRobin => "ecmp_round_robin",
            EcmpMode::Random => "ecmp_random",
        };
        Self {
            mode,
            round_robin: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            name: name.to_string(),
        }
    }

    /// Next round-robin port at `switch`, advancing its counter modulo `count`.
    pub fn next_round_robin_port(&mut self, switch: &str, count: u32) -> u32 {
        let index = self.round_robin.entry(switch.to_string()).or_insert(0);
        let port = *index + ECMP_BASE;
        *index = (*index + 1) % count;
        port
    }

    fn select_port(
        &mut self,
        request: &FlowRequest,
        switch: &str,
        topology: &dyn TopologyView,
    ) -> Result<u32, RoutingError> {
        if self.mode == EcmpMode::Hash {
            return request
                .ecmp_hint
                .ok_or_else(|| RoutingError::MissingEcmpHint(request.flow_hash.clone()));
        }

        let count = topology
            .ecmp_port_count(switch)
            .filter(|&c| c > 0)
            .ok_or_else(|| RoutingError::NoEcmpPorts(switch.to_string()))?;

        Ok(match self.mode {
            EcmpMode::RoundRobin => self.next_round_robin_port(switch, count),
            _ => self.rng.gen_range(ECMP_BASE..ECMP_BASE + count),
        })
    }
}

impl RoutingStrategy for Ecmp {
    fn route(
        &mut self,
        request: &FlowRequest,
        topology: &dyn TopologyView,
    ) -> Result<RoutingDecision, RoutingError> {
        let paths = topology.all_simple_paths(&request.src_host, &request.dst_host);
        let ecmp_switch = paths
            .first()
            .and_then(|p| p.get(1))
            .cloned()
            .ok_or_else(|| RoutingError::NoPath {
                src: request.src_host.clone(),
                dst: request.dst_host.clone(),
            })?;

        let port = self.select_port(request, &ecmp_switch, topology)?;
        let neighbor = topology
            .neighbor_on_port(&ecmp_switch, port)
            .ok_or_else(|| RoutingError::EcmpPortUnmapped {
                switch: ecmp_switch.clone(),
                port,
            })?;

        paths
            .iter()
            .find(|p| {
                p.get(1) == Some(&ecmp_switch) && p.get(2).map(String::as_str) == Some(neighbor)
            })
            .cloned()
            .map(RoutingDecision::Route)
            .ok_or_else(|| RoutingError::NoEcmpPath {
                switch: ecmp_switch.clone(),
                neighbor: neighbor.to_string(),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom_metrics(&self) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert(
            "ecmp_switches_tracked".to_string(),
            self.round_robin.len() as f64,
        );
        m
    }
}
