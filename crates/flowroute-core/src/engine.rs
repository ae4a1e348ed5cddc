//! Controller wiring.
//!
//! [`FlowRoutingEngine`] owns the shared topology graph and connects the two
//! actors that use it: the telemetry monitor, running on its own thread, and
//! the flow tracker, called once per punted packet.

use crate::clock::Clock;
use crate::config::RouterConfig;
use crate::control_plane::ControlPlane;
use crate::graph::TopologyGraph;
use crate::metrics::{write_time_measure, ExportError, ForwardingMetrics, LoadExporter};
use crate::prediction::PredictionSource;
use crate::programmer::{ProgramError, RuleProgrammer};
use crate::telemetry::{MonitorHandle, MonitorSettings, ReadinessEvent, TelemetryMonitor};
use crate::topology::{TopologyError, TopologySpec};
use crate::tracker::{FlowError, FlowOutcome, FlowTracker, PacketArrival, PacketForwarder};
use flowroute_algorithms::SelectionError;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error("Strategy error: {0}")]
    Selection(#[from] SelectionError),
    #[error("Static table programming failed: {0}")]
    Program(#[from] ProgramError),
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("Failed to spawn telemetry monitor: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Engine already started")]
    AlreadyStarted,
}

/// What `start()` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub static_entries: usize,
    pub monitor_started: bool,
}

pub struct FlowRoutingEngine {
    config: RouterConfig,
    graph: Arc<RwLock<TopologyGraph>>,
    control_plane: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    programmer: RuleProgrammer,
    tracker: FlowTracker,
    readiness: Arc<ReadinessEvent>,
    monitor: Option<MonitorHandle>,
    started: bool,
}

impl FlowRoutingEngine {
    /// Wire an engine around an already built graph.
    pub fn new(
        config: RouterConfig,
        graph: TopologyGraph,
        control_plane: Arc<dyn ControlPlane>,
        clock: Arc<dyn Clock>,
        forwarder: Arc<dyn PacketForwarder>,
    ) -> Result<Self, EngineError> {
        let strategy = config.selection()?.resolve(config.controller.seed)?;
        let graph = Arc::new(RwLock::new(graph));
        let programmer = RuleProgrammer::new(Arc::clone(&control_plane));
        let tracker = FlowTracker::new(
            strategy,
            Arc::clone(&graph),
            programmer.clone(),
            forwarder,
            config.controller.seen_capacity,
        )
        .with_time_measurement(config.controller.time_measurement);

        Ok(Self {
            config,
            graph,
            control_plane,
            clock,
            programmer,
            tracker,
            readiness: Arc::new(ReadinessEvent::new()),
            monitor: None,
            started: false,
        })
    }

    /// Wire an engine, loading the topology named by the config.
    pub fn from_config(
        config: RouterConfig,
        control_plane: Arc<dyn ControlPlane>,
        clock: Arc<dyn Clock>,
        forwarder: Arc<dyn PacketForwarder>,
    ) -> Result<Self, EngineError> {
        let spec = TopologySpec::from_file(&config.topology.path)?;
        let graph = TopologyGraph::from_spec(&spec, config.monitor.data_rate)?;
        Self::new(config, graph, control_plane, clock, forwarder)
    }

    pub fn with_predictions(mut self, predictions: Arc<dyn PredictionSource>) -> Self {
        self.tracker.set_predictions(predictions);
        self
    }

    /// Program the static tables, then start the telemetry monitor if it is
    /// enabled.
    pub fn start(&mut self) -> Result<StartupReport, EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }

        let entries = RuleProgrammer::static_entries(&self.graph.read())?;
        let static_entries = self.programmer.install_all(&entries)?;
        tracing::info!(
            entries = static_entries,
            switches = self.graph.read().switches().count(),
            "static tables programmed"
        );

        if self.config.monitor.enabled {
            let monitor = self.telemetry_monitor()?;
            self.monitor = Some(monitor.spawn().map_err(EngineError::Spawn)?);
        }
        self.started = true;

        tracing::info!(
            controller = %self.config.controller.name,
            strategy = %self.tracker.strategy_name(),
            "flow routing engine started"
        );
        Ok(StartupReport {
            static_entries,
            monitor_started: self.monitor.is_some(),
        })
    }

    /// A monitor over this engine's graph, sharing its readiness event and
    /// exporting loads when an export directory is configured. `start()`
    /// runs one on its own thread; callers may instead drive one tick by
    /// tick.
    pub fn telemetry_monitor(&self) -> Result<TelemetryMonitor, EngineError> {
        let monitor = TelemetryMonitor::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.control_plane),
            Arc::clone(&self.clock),
            MonitorSettings::from(&self.config.monitor),
            Arc::clone(&self.readiness),
        );
        Ok(match &self.config.export.dir {
            Some(dir) => monitor.with_exporter(LoadExporter::new(dir)?),
            None => monitor,
        })
    }

    /// Handle the first packet of a flow.
    pub fn handle_packet(&self, arrival: &PacketArrival) -> Result<FlowOutcome, FlowError> {
        self.tracker.handle_arrival(arrival)
    }

    /// Block until the monitor finishes its next round, up to `timeout`.
    pub fn wait_for_telemetry(&self, timeout: Duration) -> bool {
        let seen = self.readiness.generation();
        self.readiness.wait_past(seen, timeout).is_some()
    }

    pub fn graph(&self) -> Arc<RwLock<TopologyGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn tracker(&self) -> &FlowTracker {
        &self.tracker
    }

    pub fn readiness(&self) -> Arc<ReadinessEvent> {
        Arc::clone(&self.readiness)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn is_monitor_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(MonitorHandle::is_running)
    }

    /// Stop the monitor and summarize the run. Writes `time_measure.csv`
    /// when stage timings were recorded and an export directory is set.
    pub fn shutdown(&mut self) -> Result<ForwardingMetrics, EngineError> {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        let metrics = self.tracker.metrics();
        if let Some(dir) = &self.config.export.dir {
            if self.config.controller.time_measurement {
                let path = write_time_measure(dir, &metrics)?;
                tracing::info!(path = %path.display(), "stage timings written");
            }
        }
        tracing::info!(
            routed = metrics.flows_routed,
            duplicates = metrics.duplicates_discarded,
            failed = metrics.flows_failed,
            "flow routing engine stopped"
        );
        Ok(metrics)
    }
}

impl Drop for FlowRoutingEngine {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}
