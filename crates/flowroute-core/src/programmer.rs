//! Translating paths into per-switch table entries.
//!
//! A path is programmed one interior switch at a time, from the
//! source-adjacent switch to the destination-adjacent one, each entry sending
//! the flow out of the port that leads to the next node. Ports are resolved
//! against the graph first ([`RuleProgrammer::plan`]) so installs can run
//! without holding the graph lock.

use crate::control_plane::{ControlPlane, ControlPlaneError, TableEntry};
use crate::graph::TopologyGraph;
use flowroute_algorithms::{interior, ECMP_BASE, TopologyView};
use std::sync::Arc;
use thiserror::Error;

/// Table, action, match-field and parameter names of the forwarding
/// pipeline.
pub mod tables {
    pub const FLOW_FORWARDING: &str = "FlowForwardingIngress.flow_forwarding_table";
    pub const FLOW_HASH_ONE: &str = "meta.flow_hash_one";
    pub const FLOW_HASH_TWO: &str = "meta.flow_hash_two";
    pub const TO_PORT_ACTION: &str = "FlowForwardingIngress.to_port_action";
    pub const PORT: &str = "port";

    pub const SWITCH_ID: &str = "FlowForwardingEgress.switch_id_update_table";
    pub const WRITE_SWITCH_ID_ACTION: &str = "FlowForwardingEgress.write_switch_id_action";
    pub const SWITCH_ID_PARAM: &str = "switch_id";

    pub const ECMP_RESULT: &str = "FlowForwardingIngress.ecmp_result_computation_table";
    pub const COMPUTE_ECMP_RESULT_ACTION: &str =
        "FlowForwardingIngress.compute_ecmp_result_action";
    pub const ECMP_BASE_PARAM: &str = "ecmp_base";
    pub const ECMP_COUNT_PARAM: &str = "ecmp_count";

    pub const NEXTHOP_MAC: &str = "FlowForwardingIngress.nexthop_mac_update_table";
    pub const EGRESS_SPEC: &str = "standard_metadata.egress_spec";
    pub const UPDATE_NEXTHOP_MAC_ACTION: &str = "FlowForwardingIngress.update_nexthop_mac_action";
    pub const NEXTHOP_MAC_PARAM: &str = "nexthop_mac";

    pub const SOURCE_MAC: &str = "FlowForwardingIngress.source_mac_update_table";
    pub const UPDATE_SOURCE_MAC_ACTION: &str = "FlowForwardingIngress.update_source_mac_action";
    pub const SOURCE_MAC_PARAM: &str = "source_mac";

    pub const ICMP_FORWARDING: &str = "FlowForwardingIngress.icmp_forwarding_table";
    pub const IPV4_SRC: &str = "hdr.ipv4.src_addr";
    pub const IPV4_DST: &str = "hdr.ipv4.dst_addr";
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    #[error("No port on {switch} leads to {next}")]
    UnresolvedPort { switch: String, next: String },
    #[error("No path between hosts {src} and {dst}")]
    NoPath { src: String, dst: String },
    #[error("Install failed after {programmed} switch(es) were programmed: {source}")]
    Install {
        programmed: usize,
        #[source]
        source: ControlPlaneError,
    },
}

impl ProgramError {
    /// Switches already programmed when the error occurred.
    pub fn programmed(&self) -> usize {
        match self {
            ProgramError::Install { programmed, .. } => *programmed,
            _ => 0,
        }
    }
}

/// One interior switch of a path and the port the flow leaves it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub switch: String,
    pub port: u32,
}

/// Installs path and startup entries through the control plane.
#[derive(Clone)]
pub struct RuleProgrammer {
    control_plane: Arc<dyn ControlPlane>,
}

impl RuleProgrammer {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Resolve the egress port of every interior switch of `path`.
    pub fn plan(graph: &TopologyGraph, path: &[String]) -> Result<Vec<Hop>, ProgramError> {
        let switches = interior(path);
        switches
            .iter()
            .enumerate()
            .map(|(i, switch)| {
                // interior index i sits at path index i + 1
                let next = &path[i + 2];
                graph
                    .egress_port(switch, next)
                    .map(|port| Hop {
                        switch: switch.clone(),
                        port,
                    })
                    .ok_or_else(|| ProgramError::UnresolvedPort {
                        switch: switch.clone(),
                        next: next.clone(),
                    })
            })
            .collect()
    }

    /// Install one entry per hop, in path order. Stops at the first failure.
    pub fn install<F>(&self, hops: &[Hop], entry_for: F) -> Result<Vec<(String, TableEntry)>, ProgramError>
    where
        F: Fn(u32) -> TableEntry,
    {
        let mut installed = Vec::with_capacity(hops.len());
        for hop in hops {
            let entry = entry_for(hop.port);
            self.control_plane
                .install_rule(&hop.switch, &entry)
                .map_err(|source| ProgramError::Install {
                    programmed: installed.len(),
                    source,
                })?;
            installed.push((hop.switch.clone(), entry));
        }
        Ok(installed)
    }

    /// Install a prepared list of entries, in order.
    pub fn install_all(&self, entries: &[(String, TableEntry)]) -> Result<usize, ProgramError> {
        for (i, (switch, entry)) in entries.iter().enumerate() {
            self.control_plane
                .install_rule(switch, entry)
                .map_err(|source| ProgramError::Install {
                    programmed: i,
                    source,
                })?;
        }
        Ok(entries.len())
    }

    /// Forwarding entry matching the two switch-computed flow hashes.
    pub fn forwarding_entry(flow_hash_one: u16, flow_hash_two: u32, port: u32) -> TableEntry {
        TableEntry::builder(tables::FLOW_FORWARDING, tables::TO_PORT_ACTION)
            .match_field(tables::FLOW_HASH_ONE, flow_hash_one.to_be_bytes().to_vec())
            .match_field(tables::FLOW_HASH_TWO, flow_hash_two.to_be_bytes().to_vec())
            .param(tables::PORT, port)
            .build()
    }

    /// Entries every switch needs before the first flow arrives: identity,
    /// ECMP range, next-hop and source MAC rewrites, and hop-count ICMP
    /// paths between every pair of hosts in both directions.
    pub fn static_entries(graph: &TopologyGraph) -> Result<Vec<(String, TableEntry)>, ProgramError> {
        let mut entries = Vec::new();

        for node in graph.switches() {
            let Some(switch) = node.as_switch() else {
                continue;
            };
            let name = node.name.clone();

            entries.push((
                name.clone(),
                TableEntry::builder(tables::SWITCH_ID, tables::WRITE_SWITCH_ID_ACTION)
                    .param(tables::SWITCH_ID_PARAM, switch.device_id)
                    .default_action()
                    .build(),
            ));

            let ecmp_count = graph.ecmp_port_count(&name).unwrap_or(0);
            entries.push((
                name.clone(),
                TableEntry::builder(tables::ECMP_RESULT, tables::COMPUTE_ECMP_RESULT_ACTION)
                    .param(tables::ECMP_BASE_PARAM, ECMP_BASE)
                    .param(tables::ECMP_COUNT_PARAM, ecmp_count)
                    .default_action()
                    .build(),
            ));

            for (&port, peer) in &switch.ports {
                let Some(peer_mac) = graph.node(peer).map(|n| n.mac().to_string()) else {
                    continue;
                };
                entries.push((
                    name.clone(),
                    TableEntry::builder(tables::NEXTHOP_MAC, tables::UPDATE_NEXTHOP_MAC_ACTION)
                        .match_field(tables::EGRESS_SPEC, port)
                        .param(tables::NEXTHOP_MAC_PARAM, peer_mac)
                        .build(),
                ));
            }

            entries.push((
                name,
                TableEntry::builder(tables::SOURCE_MAC, tables::UPDATE_SOURCE_MAC_ACTION)
                    .param(tables::SOURCE_MAC_PARAM, switch.mgmt_mac.as_str())
                    .default_action()
                    .build(),
            ));
        }

        let hosts: Vec<_> = graph.hosts().collect();
        for (i, h1) in hosts.iter().enumerate() {
            for h2 in &hosts[i + 1..] {
                let (Some(a), Some(b)) = (h1.as_host(), h2.as_host()) else {
                    continue;
                };
                let path = graph
                    .shortest(&h1.name, &h2.name, None)
                    .ok_or_else(|| ProgramError::NoPath {
                        src: h1.name.clone(),
                        dst: h2.name.clone(),
                    })?;
                let reversed: Vec<String> = path.iter().rev().cloned().collect();

                for (p, src_ip, dst_ip) in [(&path, &a.ip, &b.ip), (&reversed, &b.ip, &a.ip)] {
                    for hop in Self::plan(graph, p)? {
                        entries.push((
                            hop.switch,
                            TableEntry::builder(tables::ICMP_FORWARDING, tables::TO_PORT_ACTION)
                                .match_field(tables::IPV4_SRC, src_ip.as_str())
                                .match_field(tables::IPV4_DST, dst_ip.as_str())
                                .param(tables::PORT, hop.port)
                                .build(),
                        ));
                    }
                }
            }
        }

        Ok(entries)
    }
}
