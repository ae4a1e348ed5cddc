//! Metrics collection and measurement export for controller runs.
//!
//! Tracks per-flow stage timings (path determination, path programming,
//! packet forwarding and the whole first-packet handling), counts of routed,
//! duplicate and failed flows, and writes link loads and stage summaries as
//! CSV.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stages of handling a flow's first packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PathDetermination,
    PathProgramming,
    PacketForwarding,
    FlowHandling,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::PathDetermination,
        Stage::PathProgramming,
        Stage::PacketForwarding,
        Stage::FlowHandling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::PathDetermination => "path_determination",
            Stage::PathProgramming => "path_programming",
            Stage::PacketForwarding => "packet_forwarding",
            Stage::FlowHandling => "flow_handling",
        }
    }
}

/// Wall durations of one flow's stages, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub path_determination_ms: f64,
    pub path_programming_ms: f64,
    pub packet_forwarding_ms: f64,
    pub flow_handling_ms: f64,
}

impl StageTimings {
    pub fn set(&mut self, stage: Stage, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        match stage {
            Stage::PathDetermination => self.path_determination_ms = ms,
            Stage::PathProgramming => self.path_programming_ms = ms,
            Stage::PacketForwarding => self.packet_forwarding_ms = ms,
            Stage::FlowHandling => self.flow_handling_ms = ms,
        }
    }

    pub fn get(&self, stage: Stage) -> f64 {
        match stage {
            Stage::PathDetermination => self.path_determination_ms,
            Stage::PathProgramming => self.path_programming_ms,
            Stage::PacketForwarding => self.packet_forwarding_ms,
            Stage::FlowHandling => self.flow_handling_ms,
        }
    }
}

/// Per-flow routing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_hash: String,
    pub path: Vec<String>,
    /// Predicted load reserved on the path, if any.
    pub reserved_load: Option<f64>,
    /// Present only when time measurement is enabled.
    pub timings: Option<StageTimings>,
}

/// Percentile values for a distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Middle value, averaging the two middle values of an even count.
    pub median: f64,
}

impl Percentiles {
    /// Compute percentiles from a slice of values.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                p50: 0.0,
                p90: 0.0,
                p99: 0.0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                median: 0.0,
            };
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        Self {
            p50: percentile_sorted(&sorted, 50.0),
            p90: percentile_sorted(&sorted, 90.0),
            p99: percentile_sorted(&sorted, 99.0),
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            median,
        }
    }
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Aggregated metrics for a controller run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingMetrics {
    /// Strategy name.
    pub strategy: String,
    pub flows_routed: u64,
    pub duplicates_discarded: u64,
    pub flows_failed: u64,
    /// Stage name -> distribution over timed flows.
    pub stages: HashMap<String, Percentiles>,
    pub custom_metrics: HashMap<String, f64>,
}

/// Collector that accumulates flow counts while the controller runs.
///
/// Only stage timings are kept per flow, and only for flows that carry them.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    routed: u64,
    duplicates: u64,
    failures: u64,
    timings: Vec<StageTimings>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a routed flow.
    pub fn record(&mut self, record: &FlowRecord) {
        self.routed += 1;
        if let Some(timings) = &record.timings {
            self.timings.push(timings.clone());
        }
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Aggregate all records into a summary.
    pub fn aggregate(
        &self,
        strategy: &str,
        custom_metrics: HashMap<String, f64>,
    ) -> ForwardingMetrics {
        let stages = if self.timings.is_empty() {
            HashMap::new()
        } else {
            Stage::ALL
                .iter()
                .map(|&stage| {
                    let values: Vec<f64> = self.timings.iter().map(|t| t.get(stage)).collect();
                    (stage.as_str().to_string(), Percentiles::from_values(&values))
                })
                .collect()
        };

        ForwardingMetrics {
            strategy: strategy.to_string(),
            flows_routed: self.routed,
            duplicates_discarded: self.duplicates,
            flows_failed: self.failures,
            stages,
            custom_metrics,
        }
    }
}

/// Format metrics as a pretty-printed table string.
pub fn format_table(metrics: &ForwardingMetrics) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n{:=<70}\n",
        format!("  {} Results  ", metrics.strategy)
    ));
    out.push_str(&format!(
        "  Flows routed: {} | Duplicates: {} | Failed: {}\n",
        metrics.flows_routed, metrics.duplicates_discarded, metrics.flows_failed
    ));
    if !metrics.stages.is_empty() {
        out.push_str(&format!("{:-<70}\n", "  Stage timings  "));
        for stage in Stage::ALL {
            if let Some(p) = metrics.stages.get(stage.as_str()) {
                out.push_str(&format!(
                    "  {:<20} mean={:>8.3}  median={:>8.3}  P99={:>8.3} ms\n",
                    stage.as_str(),
                    p.mean,
                    p.median,
                    p.p99
                ));
            }
        }
    }
    if !metrics.custom_metrics.is_empty() {
        out.push_str(&format!("{:-<70}\n", "  Strategy  "));
        let mut keys: Vec<&String> = metrics.custom_metrics.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("  {:<28} {}\n", key, metrics.custom_metrics[key]));
        }
    }
    out.push_str(&format!("{:=<70}\n", ""));
    out
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes one `{link}.csv` per link with rows `timestamp_ms,load`.
///
/// A link's file is created on its first sample and starts with `0,0.0`.
#[derive(Debug)]
pub struct LoadExporter {
    dir: PathBuf,
    files: HashMap<String, BufWriter<File>>,
}

impl LoadExporter {
    pub fn new(dir: &Path) -> Result<Self, ExportError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: HashMap::new(),
        })
    }

    pub fn path_for(&self, link: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", link))
    }

    pub fn record(&mut self, link: &str, timestamp_ms: u64, load: f64) -> Result<(), ExportError> {
        let path = self.path_for(link);
        if !self.files.contains_key(link) {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map_err(io_error(&path))?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "0,0.0").map_err(io_error(&path))?;
            self.files.insert(link.to_string(), writer);
        }
        if let Some(writer) = self.files.get_mut(link) {
            writeln!(writer, "{},{}", timestamp_ms, load).map_err(io_error(&path))?;
            writer.flush().map_err(io_error(&path))?;
        }
        Ok(())
    }
}

/// Write `time_measure.csv` with mean and median per stage.
pub fn write_time_measure(dir: &Path, metrics: &ForwardingMetrics) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let path = dir.join("time_measure.csv");
    let mut out = String::from("stage,mean_ms,median_ms\n");
    for stage in Stage::ALL {
        if let Some(p) = metrics.stages.get(stage.as_str()) {
            out.push_str(&format!("{},{},{}\n", stage.as_str(), p.mean, p.median));
        }
    }
    fs::write(&path, out).map_err(io_error(&path))?;
    Ok(path)
}
