//! Flow state tracking.
//!
//! The [`FlowTracker`] handles the first packet of every flow a switch hands
//! to the controller. Each flow is identified by a hash of its 5-tuple; a
//! flow already in the seen-set is discarded, any other flow is routed,
//! programmed onto its path's switches and then handed back for delivery.
//!
//! The whole sequence runs under one decision lock, so at most one flow is
//! decided and programmed at a time even when several switches report
//! packets concurrently. The graph's write guard is only held while the path
//! is chosen, reserved and resolved to ports; rule installs run without it.

use crate::graph::{GraphError, TopologyGraph};
use crate::metrics::{FlowRecord, ForwardingMetrics, MetricsCollector, Stage, StageTimings};
use crate::prediction::PredictionSource;
use crate::programmer::{ProgramError, RuleProgrammer};
use crate::control_plane::TableEntry;
use flowroute_algorithms::{FlowRequest, LinkProperty, RoutingError, RoutingStrategy};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("No host has IP address {0}")]
    UnknownHost(String),
    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingError),
    #[error("Reservation failed: {0}")]
    Graph(#[from] GraphError),
    #[error("Programming failed: {0}")]
    Program(#[from] ProgramError),
}

/// A flow's 5-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: String,
    pub dst_ip: String,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    /// Stable lowercase hex SHA-256 of `src_dst_proto_sport_dport`.
    pub fn flow_hash(&self) -> String {
        let digest = Sha256::digest(
            format!(
                "{}_{}_{}_{}_{}",
                self.src_ip, self.dst_ip, self.protocol, self.src_port, self.dst_port
            )
            .as_bytes(),
        );
        hex::encode(digest)
    }
}

/// Values the switch computed for the packet before punting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHint {
    pub flow_hash_one: u16,
    pub flow_hash_two: u32,
    /// ECMP egress port picked by the switch's own hash, when it ran one.
    #[serde(default)]
    pub ecmp_result: Option<u32>,
}

/// First packet of a flow as reported by a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketArrival {
    pub key: FlowKey,
    #[serde(default)]
    pub hint: PacketHint,
    /// Switch the packet was captured on.
    pub ingress: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Delivers a punted packet once its flow is handled.
pub trait PacketForwarder: Send + Sync {
    fn forward(&self, arrival: &PacketArrival) -> std::io::Result<()>;
}

/// Forwarder that only records which flows it was handed.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    forwarded: Mutex<Vec<FlowKey>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded(&self) -> Vec<FlowKey> {
        self.forwarded.lock().clone()
    }
}

impl PacketForwarder for RecordingForwarder {
    fn forward(&self, arrival: &PacketArrival) -> std::io::Result<()> {
        self.forwarded.lock().push(arrival.key.clone());
        Ok(())
    }
}

/// Flow hashes already handled, bounded by least-recent use when a
/// capacity is set.
///
/// An evicted flow is routed again if another of its packets is punted.
#[derive(Debug, Default)]
pub struct SeenSet {
    capacity: Option<usize>,
    /// flow hash -> last use tick.
    entries: HashMap<String, u64>,
    /// last use tick -> flow hash.
    order: BTreeMap<u64, String>,
    tick: u64,
    evictions: u64,
}

impl SeenSet {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.map(|c| c.max(1)),
            ..Default::default()
        }
    }

    /// Mark `flow_hash` as seen.
    ///
    /// Returns `None` if it was already seen, otherwise the hashes evicted to
    /// make room for it.
    pub fn observe(&mut self, flow_hash: &str) -> Option<Vec<String>> {
        self.tick += 1;
        if let Some(previous) = self.entries.insert(flow_hash.to_string(), self.tick) {
            self.order.remove(&previous);
            self.order.insert(self.tick, flow_hash.to_string());
            return None;
        }
        self.order.insert(self.tick, flow_hash.to_string());

        let mut evicted = Vec::new();
        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                let Some((_, oldest)) = self.order.pop_first() else {
                    break;
                };
                self.entries.remove(&oldest);
                self.evictions += 1;
                evicted.push(oldest);
            }
        }
        Some(evicted)
    }

    pub fn contains(&self, flow_hash: &str) -> bool {
        self.entries.contains_key(flow_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

/// Result of handling one punted packet.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// The flow was already handled; the packet was discarded.
    Duplicate,
    /// The flow was routed and its path programmed.
    Routed(FlowRecord),
}

struct TrackerState {
    seen: SeenSet,
    strategy: Box<dyn RoutingStrategy>,
    /// flow hash -> (switch, installed forwarding entry) in path order.
    /// Dropped with the flow's seen-set entry; the switch keeps the rule.
    installed: HashMap<String, Vec<(String, TableEntry)>>,
    metrics: MetricsCollector,
}

pub struct FlowTracker {
    state: Mutex<TrackerState>,
    graph: Arc<RwLock<TopologyGraph>>,
    programmer: RuleProgrammer,
    predictions: Option<Arc<dyn PredictionSource>>,
    forwarder: Arc<dyn PacketForwarder>,
    time_measurement: bool,
}

impl FlowTracker {
    pub fn new(
        strategy: Box<dyn RoutingStrategy>,
        graph: Arc<RwLock<TopologyGraph>>,
        programmer: RuleProgrammer,
        forwarder: Arc<dyn PacketForwarder>,
        seen_capacity: Option<usize>,
    ) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                seen: SeenSet::new(seen_capacity),
                strategy,
                installed: HashMap::new(),
                metrics: MetricsCollector::new(),
            }),
            graph,
            programmer,
            predictions: None,
            forwarder,
            time_measurement: false,
        }
    }

    pub fn with_predictions(mut self, predictions: Arc<dyn PredictionSource>) -> Self {
        self.set_predictions(predictions);
        self
    }

    pub fn set_predictions(&mut self, predictions: Arc<dyn PredictionSource>) {
        self.predictions = Some(predictions);
    }

    pub fn with_time_measurement(mut self, enabled: bool) -> Self {
        self.time_measurement = enabled;
        self
    }

    /// Handle the first packet of a flow reported by a switch.
    ///
    /// A failed flow stays in the seen-set and its packet is still handed to
    /// the forwarder.
    pub fn handle_arrival(&self, arrival: &PacketArrival) -> Result<FlowOutcome, FlowError> {
        let started = Instant::now();
        let flow_hash = arrival.key.flow_hash();

        let mut state = self.state.lock();
        let Some(evicted) = state.seen.observe(&flow_hash) else {
            state.metrics.record_duplicate();
            tracing::trace!(flow = %flow_hash, ingress = %arrival.ingress, "duplicate first packet discarded");
            return Ok(FlowOutcome::Duplicate);
        };
        for hash in &evicted {
            state.installed.remove(hash);
        }

        let mut timings = StageTimings::default();
        let result = self.route_and_program(&mut state, arrival, &flow_hash, &mut timings);

        let forward_started = Instant::now();
        if let Err(e) = self.forwarder.forward(arrival) {
            tracing::warn!(flow = %flow_hash, error = %e, "failed to forward punted packet");
        }
        timings.set(Stage::PacketForwarding, forward_started.elapsed());
        timings.set(Stage::FlowHandling, started.elapsed());

        match result {
            Ok(record) => {
                let record = FlowRecord {
                    timings: self.time_measurement.then_some(timings),
                    ..record
                };
                state.metrics.record(&record);
                Ok(FlowOutcome::Routed(record))
            }
            Err(e) => {
                state.metrics.record_failure();
                tracing::error!(
                    flow = %flow_hash,
                    src_ip = %arrival.key.src_ip,
                    dst_ip = %arrival.key.dst_ip,
                    error = %e,
                    "flow could not be routed"
                );
                Err(e)
            }
        }
    }

    fn route_and_program(
        &self,
        state: &mut TrackerState,
        arrival: &PacketArrival,
        flow_hash: &str,
        timings: &mut StageTimings,
    ) -> Result<FlowRecord, FlowError> {
        let decided = Instant::now();
        let (decision, hops) = {
            let mut graph = self.graph.write();
            let src_host = host_for(&graph, &arrival.key.src_ip)?;
            let dst_host = host_for(&graph, &arrival.key.dst_ip)?;
            let predicted_throughput = if state.strategy.requires_prediction() {
                self.predictions.as_ref().and_then(|p| p.predict(flow_hash))
            } else {
                None
            };
            let request = FlowRequest {
                flow_hash: flow_hash.to_string(),
                src_host,
                dst_host,
                ecmp_hint: arrival.hint.ecmp_result,
                predicted_throughput,
            };

            let decision = state.strategy.route(&request, &*graph)?;
            if let Some(flow_load) = decision.reservation() {
                graph.reserve(decision.path(), LinkProperty::LoadByCounter, flow_load)?;
            }
            let hops = RuleProgrammer::plan(&graph, decision.path())?;
            (decision, hops)
        };
        timings.set(Stage::PathDetermination, decided.elapsed());

        let programmed = Instant::now();
        let hint = arrival.hint;
        let installed = self.programmer.install(&hops, |port| {
            RuleProgrammer::forwarding_entry(hint.flow_hash_one, hint.flow_hash_two, port)
        })?;
        timings.set(Stage::PathProgramming, programmed.elapsed());

        let switches: Vec<&str> = installed.iter().map(|(s, _)| s.as_str()).collect();
        tracing::info!(
            flow = %flow_hash,
            strategy = state.strategy.name(),
            src_ip = %arrival.key.src_ip,
            dst_ip = %arrival.key.dst_ip,
            protocol = arrival.key.protocol,
            src_port = arrival.key.src_port,
            dst_port = arrival.key.dst_port,
            switches = ?switches,
            "programmed flow path"
        );
        state.installed.insert(flow_hash.to_string(), installed);

        let reserved_load = decision.reservation();
        Ok(FlowRecord {
            flow_hash: flow_hash.to_string(),
            path: decision.into_path(),
            reserved_load,
            timings: None,
        })
    }

    /// Forwarding entry installed on `switch` for a flow.
    pub fn installed_rule(&self, switch: &str, flow_hash: &str) -> Option<TableEntry> {
        self.state
            .lock()
            .installed
            .get(flow_hash)?
            .iter()
            .find(|(s, _)| s == switch)
            .map(|(_, entry)| entry.clone())
    }

    /// Number of forwarding entries tracked for flows still in the seen-set.
    pub fn installed_count(&self) -> usize {
        self.state.lock().installed.values().map(Vec::len).sum()
    }

    pub fn has_seen(&self, flow_hash: &str) -> bool {
        self.state.lock().seen.contains(flow_hash)
    }

    pub fn strategy_name(&self) -> String {
        self.state.lock().strategy.name().to_string()
    }

    /// Summary of every flow handled so far.
    pub fn metrics(&self) -> ForwardingMetrics {
        let state = self.state.lock();
        let mut custom = state.strategy.custom_metrics();
        custom.insert("seen_flows".to_string(), state.seen.len() as f64);
        custom.insert("seen_evictions".to_string(), state.seen.evictions() as f64);
        state.metrics.aggregate(state.strategy.name(), custom)
    }
}

fn host_for(graph: &TopologyGraph, ip: &str) -> Result<String, FlowError> {
    graph
        .map_ip_to_host(ip)
        .map(str::to_string)
        .ok_or_else(|| FlowError::UnknownHost(ip.to_string()))
}
