/// Integration tests for first-packet handling.
mod common;

use common::{arrival, leaf_spine};
use flowroute_algorithms::{strategy_by_name, DataRate, LinkProperty, RoutingError, Throughput};
use flowroute_core::control_plane::{FieldValue, InMemoryControlPlane};
use flowroute_core::graph::TopologyGraph;
use flowroute_core::prediction::StaticPredictions;
use flowroute_core::programmer::{tables, ProgramError, RuleProgrammer};
use flowroute_core::tracker::{FlowError, FlowOutcome, FlowTracker, RecordingForwarder};
use parking_lot::RwLock;
use std::sync::Arc;

struct Harness {
    tracker: FlowTracker,
    graph: Arc<RwLock<TopologyGraph>>,
    control_plane: Arc<InMemoryControlPlane>,
    forwarder: Arc<RecordingForwarder>,
}

fn harness(strategy: &str, metric: &str, seen_capacity: Option<usize>) -> Harness {
    let graph = Arc::new(RwLock::new(leaf_spine()));
    let control_plane = Arc::new(InMemoryControlPlane::new());
    let forwarder = Arc::new(RecordingForwarder::new());
    let tracker = FlowTracker::new(
        strategy_by_name(strategy, metric, 42).unwrap(),
        Arc::clone(&graph),
        RuleProgrammer::new(control_plane.clone()),
        forwarder.clone(),
        seen_capacity,
    );
    Harness {
        tracker,
        graph,
        control_plane,
        forwarder,
    }
}

fn routed_path(outcome: FlowOutcome) -> Vec<String> {
    match outcome {
        FlowOutcome::Routed(record) => record.path,
        FlowOutcome::Duplicate => panic!("expected a routed flow"),
    }
}

#[test]
fn test_duplicate_first_packets_are_discarded() {
    let h = harness("ecmp", "round_robin", None);
    let first = h.tracker.handle_arrival(&arrival(1000)).unwrap();
    assert_eq!(routed_path(first).len(), 5);
    let installs = h.control_plane.installed().len();
    assert_eq!(installs, 3);

    for _ in 0..3 {
        assert!(matches!(
            h.tracker.handle_arrival(&arrival(1000)).unwrap(),
            FlowOutcome::Duplicate
        ));
    }
    assert_eq!(h.control_plane.installed().len(), installs);
    // duplicates are dropped, not forwarded
    assert_eq!(h.forwarder.forwarded().len(), 1);

    let metrics = h.tracker.metrics();
    assert_eq!(metrics.flows_routed, 1);
    assert_eq!(metrics.duplicates_discarded, 3);
}

#[test]
fn test_rules_follow_path_and_hint() {
    let h = harness("shortest_path", "hops", None);
    let a = arrival(1234);
    let path = routed_path(h.tracker.handle_arrival(&a).unwrap());
    let hash = a.key.flow_hash();

    let installed = h.control_plane.installed_in(tables::FLOW_FORWARDING);
    let switches: Vec<&str> = installed.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(switches, vec!["s1", path[2].as_str(), "s2"]);

    let graph = h.graph.read();
    for (switch, entry) in &installed {
        let next = &path[path.iter().position(|n| n == switch).unwrap() + 1];
        let port = graph.egress_port(switch, next).unwrap();
        assert_eq!(entry.param(tables::PORT), Some(&FieldValue::Int(u64::from(port))));
        assert_eq!(
            entry.match_fields()[tables::FLOW_HASH_ONE],
            FieldValue::Bytes(1234u16.to_be_bytes().to_vec())
        );
        assert_eq!(h.tracker.installed_rule(switch, &hash).as_ref(), Some(entry));
    }
    assert_eq!(h.tracker.installed_count(), 3);
}

#[test]
fn test_pfr_reserves_predicted_load() {
    let h = harness("flow_prediction", "throughput", None);
    let predictions = Arc::new(StaticPredictions::new());
    let a = arrival(1);
    predictions.insert(&a.key.flow_hash(), Throughput::new(3.0, DataRate::Megabit));
    let tracker = h.tracker.with_predictions(predictions);

    {
        let mut g = h.graph.write();
        for (x, y, load) in [("s1", "s3", 0.4), ("s3", "s2", 0.4), ("s1", "s4", 0.8), ("s4", "s2", 0.8)] {
            g.set_link_metric(x, y, LinkProperty::LoadByCounter, load, None)
                .unwrap();
        }
    }

    let record = match tracker.handle_arrival(&a).unwrap() {
        FlowOutcome::Routed(record) => record,
        FlowOutcome::Duplicate => panic!("expected a routed flow"),
    };
    assert_eq!(record.path[2], "s3");
    assert!((record.reserved_load.unwrap() - 0.3).abs() < 1e-12);

    let g = h.graph.read();
    for (x, y) in [("s1", "s3"), ("s3", "s2")] {
        let load = g.get_link_metric(x, y, LinkProperty::LoadByCounter).unwrap();
        assert!((load - 0.7).abs() < 1e-12);
    }
    assert_eq!(g.get_link_metric("s1", "s4", LinkProperty::LoadByCounter).unwrap(), 0.8);
}

#[test]
fn test_pfr_without_prediction_is_a_flow_error() {
    let h = harness("flow_prediction", "throughput", None);
    assert!(matches!(
        h.tracker.handle_arrival(&arrival(1)),
        Err(FlowError::Routing(RoutingError::MissingPrediction(_)))
    ));
    assert!(h.control_plane.installed().is_empty());
}

#[test]
fn test_unknown_host_fails_but_forwards() {
    let h = harness("shortest_path", "hops", None);
    let mut a = arrival(1);
    a.key.dst_ip = "10.9.9.9".to_string();
    assert!(matches!(
        h.tracker.handle_arrival(&a),
        Err(FlowError::UnknownHost(ip)) if ip == "10.9.9.9"
    ));
    assert_eq!(h.forwarder.forwarded().len(), 1);
    assert!(h.tracker.has_seen(&a.key.flow_hash()));
    assert_eq!(h.tracker.metrics().flows_failed, 1);
}

#[test]
fn test_install_failure_reports_partial_programming() {
    let h = harness("ecmp", "round_robin", None);
    // round robin sends the first flow through s3
    h.control_plane.fail_installs_on("s3");
    let err = h.tracker.handle_arrival(&arrival(1)).unwrap_err();
    match err {
        FlowError::Program(e @ ProgramError::Install { .. }) => assert_eq!(e.programmed(), 1),
        other => panic!("expected an install failure, got {:?}", other),
    }
    assert_eq!(h.forwarder.forwarded().len(), 1);
    assert_eq!(h.tracker.installed_count(), 0);

    // the engine keeps going
    h.control_plane.restore_installs();
    assert!(h.tracker.handle_arrival(&arrival(2)).is_ok());
    let metrics = h.tracker.metrics();
    assert_eq!(metrics.flows_failed, 1);
    assert_eq!(metrics.flows_routed, 1);
}

#[test]
fn test_bounded_seen_set_reroutes_evicted_flows() {
    let h = harness("shortest_path", "hops", Some(1));
    assert!(matches!(h.tracker.handle_arrival(&arrival(1)).unwrap(), FlowOutcome::Routed(_)));
    assert!(matches!(h.tracker.handle_arrival(&arrival(2)).unwrap(), FlowOutcome::Routed(_)));
    // flow 1 was evicted by flow 2
    assert!(matches!(h.tracker.handle_arrival(&arrival(1)).unwrap(), FlowOutcome::Routed(_)));
    assert_eq!(h.tracker.metrics().custom_metrics["seen_evictions"], 2.0);
}

#[test]
fn test_bounded_seen_set_bounds_tracked_rules() {
    let h = harness("ecmp", "round_robin", Some(2));
    for i in 0..10 {
        assert!(matches!(h.tracker.handle_arrival(&arrival(i)).unwrap(), FlowOutcome::Routed(_)));
    }
    // two flows remembered, three switches each
    assert_eq!(h.tracker.installed_count(), 6);
    assert!(h.tracker.installed_rule("s1", &arrival(0).key.flow_hash()).is_none());
    assert!(h.tracker.installed_rule("s1", &arrival(9).key.flow_hash()).is_some());
    // the switches keep every rule
    assert_eq!(h.control_plane.installed_in(tables::FLOW_FORWARDING).len(), 30);

    let metrics = h.tracker.metrics();
    assert_eq!(metrics.flows_routed, 10);
    assert!(metrics.stages.is_empty());
}

#[test]
fn test_hash_ecmp_without_switch_hint() {
    let h = harness("ecmp", "hash", None);
    let mut a = arrival(1);
    a.hint.ecmp_result = None;
    assert!(matches!(
        h.tracker.handle_arrival(&a),
        Err(FlowError::Routing(RoutingError::MissingEcmpHint(_)))
    ));
    assert!(h.control_plane.installed().is_empty());
}

#[test]
fn test_time_measurement_toggle() {
    let h = harness("shortest_path", "hops", None);
    match h.tracker.handle_arrival(&arrival(1)).unwrap() {
        FlowOutcome::Routed(record) => assert!(record.timings.is_none()),
        FlowOutcome::Duplicate => panic!("expected a routed flow"),
    }
    assert!(h.tracker.metrics().stages.is_empty());

    let h = harness("shortest_path", "hops", None);
    let tracker = h.tracker.with_time_measurement(true);
    match tracker.handle_arrival(&arrival(1)).unwrap() {
        FlowOutcome::Routed(record) => {
            let t = record.timings.unwrap();
            assert!(t.flow_handling_ms >= t.path_determination_ms);
            assert!(t.flow_handling_ms >= t.path_programming_ms);
        }
        FlowOutcome::Duplicate => panic!("expected a routed flow"),
    }
    assert_eq!(tracker.metrics().stages.len(), 4);
}

#[test]
fn test_concurrent_duplicates_route_once() {
    let h = harness("ecmp", "round_robin", None);
    let outcomes: Vec<FlowOutcome> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| h.tracker.handle_arrival(&arrival(77)).unwrap()))
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });
    let routed = outcomes
        .iter()
        .filter(|o| matches!(o, FlowOutcome::Routed(_)))
        .count();
    assert_eq!(routed, 1);
    assert_eq!(h.control_plane.installed().len(), 3);
}

#[test]
fn test_concurrent_flows_share_round_robin() {
    let h = harness("ecmp", "round_robin", None);
    let paths: Vec<Vec<String>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let tracker = &h.tracker;
                s.spawn(move || routed_path(tracker.handle_arrival(&arrival(100 + i)).unwrap()))
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });
    let via_s3 = paths.iter().filter(|p| p[2] == "s3").count();
    assert_eq!(via_s3, 4);
    assert_eq!(paths.len() - via_s3, 4);
}
