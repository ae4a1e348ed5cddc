//! Port-counter telemetry.
//!
//! Every tick the [`TelemetryMonitor`] reads the rx and tx byte counters of
//! each switch-to-switch link from the control plane, turns the byte delta
//! of the configured direction into a load ratio
//!
//! ```text
//! load = (bytes_now - bytes_last) * 8 / elapsed_s / (bw * data_rate)
//! ```
//!
//! and writes it into the graph's `load_by_counter` metric with history.
//! `elapsed_s` is the time since the link's last successful read, or one
//! interval for the first read. The ratio is not clamped and can exceed 1.0.
//! After each tick the shared [`ReadinessEvent`] is set.
//!
//! A failed counter read skips that link for the tick. The monitor never
//! stops on a single link's failure.

use crate::clock::Clock;
use crate::config::{CounterDirection, MonitorSection};
use crate::control_plane::{ControlPlane, ControlPlaneError, CounterReading};
use crate::graph::TopologyGraph;
use crate::metrics::LoadExporter;
use flowroute_algorithms::{DataRate, LinkProperty};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Counter cell index for a port. Port 0 is unused, so cells start at 1.
pub fn counter_index(port_id: u32) -> u32 {
    port_id.saturating_sub(1)
}

/// A generation counter other threads can wait on.
///
/// Each [`set`](ReadinessEvent::set) starts a new generation and wakes all
/// waiters.
#[derive(Debug, Default)]
pub struct ReadinessEvent {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl ReadinessEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.cond.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub fn is_set(&self) -> bool {
        self.generation() > 0
    }

    /// Wait until the generation moves past `seen`. Returns the new
    /// generation, or `None` on timeout.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        while *generation <= seen {
            if self.cond.wait_until(&mut generation, deadline).timed_out() {
                break;
            }
        }
        (*generation > seen).then_some(*generation)
    }
}

/// Monitor parameters derived from the `[monitor]` config section.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub direction: CounterDirection,
    pub rx_counter: String,
    pub tx_counter: String,
    pub data_rate: DataRate,
}

impl From<&MonitorSection> for MonitorSettings {
    fn from(section: &MonitorSection) -> Self {
        Self {
            interval: Duration::from_millis(section.interval_ms),
            direction: section.counter_direction,
            rx_counter: section.rx_counter.clone(),
            tx_counter: section.tx_counter.clone(),
            data_rate: section.data_rate,
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub links_updated: usize,
    pub links_skipped: usize,
}

/// A link the monitor polls, captured once at construction.
#[derive(Debug, Clone)]
struct MonitoredLink {
    name: String,
    switch: String,
    neighbor: String,
    index: u32,
    bandwidth: f64,
}

pub struct TelemetryMonitor {
    graph: Arc<RwLock<TopologyGraph>>,
    control_plane: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    readiness: Arc<ReadinessEvent>,
    exporter: Option<LoadExporter>,
    links: Vec<MonitoredLink>,
    /// (link name, direction) -> last reading and when it was taken.
    last: HashMap<(String, CounterDirection), (CounterReading, u64)>,
}

impl TelemetryMonitor {
    pub fn new(
        graph: Arc<RwLock<TopologyGraph>>,
        control_plane: Arc<dyn ControlPlane>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
        readiness: Arc<ReadinessEvent>,
    ) -> Self {
        let links = graph
            .read()
            .switch_links()
            .map(|l| MonitoredLink {
                name: l.name.clone(),
                switch: l.from.clone(),
                neighbor: l.to.clone(),
                index: counter_index(l.port_id),
                bandwidth: l.bandwidth,
            })
            .collect();
        Self {
            graph,
            control_plane,
            clock,
            settings,
            readiness,
            exporter: None,
            links,
            last: HashMap::new(),
        }
    }

    /// Also append every sample to per-link CSV files.
    pub fn with_exporter(mut self, exporter: LoadExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn readiness(&self) -> Arc<ReadinessEvent> {
        Arc::clone(&self.readiness)
    }

    /// Run one polling round over every switch-to-switch link.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let interval_s = self.settings.interval.as_secs_f64();
        let unit = self.settings.data_rate.bits_per_second();

        for i in 0..self.links.len() {
            let link = self.links[i].clone();
            let readings = match self.read_both(&link) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(link = %link.name, error = %e, "counter read failed, skipping link this tick");
                    report.links_skipped += 1;
                    continue;
                }
            };

            let timestamp = self.clock.now_ms();
            let mut byte_delta = 0;
            let mut elapsed_s = interval_s;
            for (direction, reading) in readings {
                let key = (link.name.clone(), direction);
                let previous = self.last.insert(key, (reading, timestamp));
                if direction != self.settings.direction {
                    continue;
                }
                let (before, taken_at) = previous.unwrap_or_default();
                byte_delta = reading.bytes.saturating_sub(before.bytes);
                if previous.is_some() && timestamp > taken_at {
                    elapsed_s = (timestamp - taken_at) as f64 / 1000.0;
                }
            }
            let load_bits = byte_delta as f64 * 8.0 / elapsed_s;
            let load = load_bits / (link.bandwidth * unit);

            if let Err(e) = self.graph.write().set_link_metric(
                &link.switch,
                &link.neighbor,
                LinkProperty::LoadByCounter,
                load,
                Some(timestamp),
            ) {
                tracing::warn!(link = %link.name, error = %e, "failed to store link load");
                report.links_skipped += 1;
                continue;
            }
            if let Some(exporter) = self.exporter.as_mut() {
                if let Err(e) = exporter.record(&link.name, timestamp, load) {
                    tracing::warn!(link = %link.name, error = %e, "failed to export link load");
                }
            }
            report.links_updated += 1;
        }

        tracing::debug!(
            updated = report.links_updated,
            skipped = report.links_skipped,
            "telemetry tick"
        );
        self.readiness.set();
        report
    }

    fn read_both(
        &self,
        link: &MonitoredLink,
    ) -> Result<[(CounterDirection, CounterReading); 2], ControlPlaneError> {
        let rx = self
            .control_plane
            .read_counter(&link.switch, &self.settings.rx_counter, link.index)?;
        let tx = self
            .control_plane
            .read_counter(&link.switch, &self.settings.tx_counter, link.index)?;
        Ok([(CounterDirection::Rx, rx), (CounterDirection::Tx, tx)])
    }

    /// Run the monitor on its own thread. The first tick happens one
    /// interval after the start.
    pub fn spawn(mut self) -> std::io::Result<MonitorHandle> {
        let stop = Arc::new(StopSignal::default());
        let signal = Arc::clone(&stop);
        let interval = self.settings.interval;

        let thread = std::thread::Builder::new()
            .name("flowroute-monitor".into())
            .spawn(move || {
                tracing::info!(
                    links = self.links.len(),
                    interval_ms = interval.as_millis() as u64,
                    "telemetry monitor started"
                );
                while !signal.wait(interval) {
                    self.tick();
                }
                tracing::info!("telemetry monitor stopped");
            })?;

        Ok(MonitorHandle {
            stop,
            thread: Some(thread),
        })
    }
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    /// Sleep for `timeout` unless stopped first. Returns whether stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }
}

/// Handle to a running monitor thread. Dropping it stops the monitor.
pub struct MonitorHandle {
    stop: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the loop and wait for the thread to exit. Idempotent.
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("telemetry monitor thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
