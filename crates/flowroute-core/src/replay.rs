//! Replaying recorded controller input.
//!
//! A replay file is JSONL, one event per line, tagged by `type`:
//!
//! ```text
//! {"type": "packet", "key": {...}, "hint": {...}, "ingress": "s1", "predicted_throughput": {"value": 3.0, "unit": "megabit"}}
//! {"type": "counter", "switch": "s1", "port": 2, "bytes": 125000}
//! {"type": "tick"}
//! ```
//!
//! `counter` adds bytes to a port's rx and tx counters on the in-memory
//! control plane, `tick` advances the clock by one monitor interval and runs
//! one telemetry round. Blank lines and lines starting with `#` are skipped.

use crate::clock::ManualClock;
use crate::config::RouterConfig;
use crate::control_plane::InMemoryControlPlane;
use crate::metrics::FlowRecord;
use crate::prediction::StaticPredictions;
use crate::telemetry::{counter_index, TelemetryMonitor};
use crate::tracker::{FlowError, FlowKey, FlowOutcome, PacketArrival, PacketHint};
use flowroute_algorithms::Throughput;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read replay file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse JSON at line {line}: {source}")]
    JsonParse {
        line: usize,
        source: serde_json::Error,
    },
}

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// First packet of a flow punted by a switch.
    Packet {
        key: FlowKey,
        #[serde(default)]
        hint: PacketHint,
        ingress: String,
        #[serde(default)]
        predicted_throughput: Option<Throughput>,
    },
    /// Traffic observed on a switch port since the previous event.
    Counter { switch: String, port: u32, bytes: u64 },
    /// One monitor interval elapses.
    Tick,
}

/// Load a replay file.
pub fn load_replay(path: &Path) -> Result<Vec<ReplayEvent>, ReplayError> {
    let file = std::fs::File::open(path)?;
    parse_replay(BufReader::new(file))
}

/// Parse replay events from any reader.
pub fn parse_replay<R: Read>(reader: BufReader<R>) -> Result<Vec<ReplayEvent>, ReplayError> {
    let mut events = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(trimmed).map_err(|e| ReplayError::JsonParse {
            line: line_num + 1,
            source: e,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Every prediction carried by the packets of a replay, keyed by flow hash.
pub fn predictions(events: &[ReplayEvent]) -> StaticPredictions {
    events
        .iter()
        .filter_map(|event| match event {
            ReplayEvent::Packet {
                key,
                predicted_throughput: Some(throughput),
                ..
            } => Some((key.flow_hash(), *throughput)),
            _ => None,
        })
        .collect()
}

/// Per-packet result of a replay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayDecision {
    Routed(FlowRecord),
    Duplicate { flow_hash: String },
    Failed { flow_hash: String, error: String },
}

/// Drives recorded events through a manual clock, the in-memory control
/// plane and a tick-by-tick telemetry monitor.
pub struct Replayer<'a> {
    clock: &'a ManualClock,
    control_plane: &'a InMemoryControlPlane,
    monitor: TelemetryMonitor,
    interval_ms: u64,
    rx_counter: String,
    tx_counter: String,
}

impl<'a> Replayer<'a> {
    pub fn new(
        config: &RouterConfig,
        clock: &'a ManualClock,
        control_plane: &'a InMemoryControlPlane,
        monitor: TelemetryMonitor,
    ) -> Self {
        Self {
            clock,
            control_plane,
            monitor,
            interval_ms: config.monitor.interval_ms,
            rx_counter: config.monitor.rx_counter.clone(),
            tx_counter: config.monitor.tx_counter.clone(),
        }
    }

    /// Apply every event in order; `route` handles each packet.
    pub fn run<F>(&mut self, events: &[ReplayEvent], mut route: F) -> Vec<ReplayDecision>
    where
        F: FnMut(&PacketArrival) -> Result<FlowOutcome, FlowError>,
    {
        let mut decisions = Vec::new();
        for event in events {
            match event {
                ReplayEvent::Packet {
                    key, hint, ingress, ..
                } => {
                    let arrival = PacketArrival {
                        key: key.clone(),
                        hint: *hint,
                        ingress: ingress.clone(),
                        payload: Vec::new(),
                    };
                    let flow_hash = key.flow_hash();
                    decisions.push(match route(&arrival) {
                        Ok(FlowOutcome::Routed(record)) => ReplayDecision::Routed(record),
                        Ok(FlowOutcome::Duplicate) => ReplayDecision::Duplicate { flow_hash },
                        Err(e) => ReplayDecision::Failed {
                            flow_hash,
                            error: e.to_string(),
                        },
                    });
                }
                ReplayEvent::Counter {
                    switch,
                    port,
                    bytes,
                } => {
                    let index = counter_index(*port);
                    for counter in [&self.rx_counter, &self.tx_counter] {
                        self.control_plane.add_bytes(switch, counter, index, *bytes);
                    }
                }
                ReplayEvent::Tick => {
                    self.clock.advance_by_ms(self.interval_ms);
                    self.monitor.tick();
                }
            }
        }
        decisions
    }
}
