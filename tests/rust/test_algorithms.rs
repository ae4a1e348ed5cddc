/// Integration tests for the routing strategies on a live topology graph.
mod common;

use common::{leaf_spine, path};
use flowroute_algorithms::*;
use flowroute_core::graph::TopologyGraph;
use std::collections::HashMap;

fn request(flow: &str) -> FlowRequest {
    FlowRequest {
        flow_hash: flow.to_string(),
        src_host: "h1".to_string(),
        dst_host: "h2".to_string(),
        ecmp_hint: None,
        predicted_throughput: None,
    }
}

fn with_prediction(flow: &str, mbps: f64) -> FlowRequest {
    FlowRequest {
        predicted_throughput: Some(Throughput::new(mbps, DataRate::Megabit)),
        ..request(flow)
    }
}

/// Load every interior link of the path through `spine`.
fn load_spine(g: &mut TopologyGraph, spine: &str, load: f64) {
    for (a, b) in [("s1", spine), (spine, "s2")] {
        g.set_link_metric(a, b, LinkProperty::LoadByCounter, load, None)
            .unwrap();
    }
}

#[test]
fn test_shortest_path_hops_ignores_load() {
    let mut g = leaf_spine();
    let mut algo = strategy_by_name("shortest_path", "hops", 42).unwrap();
    let before = algo.route(&request("f"), &g).unwrap().into_path();
    load_spine(&mut g, &before[2], 0.99);
    let after = algo.route(&request("f"), &g).unwrap().into_path();
    assert_eq!(before, after);
    assert_eq!(after.len(), 5);
}

#[test]
fn test_shortest_path_by_counter_load() {
    let mut g = leaf_spine();
    load_spine(&mut g, "s3", 0.7);
    let mut algo = strategy_by_name("shortest_path", "load_by_counter", 42).unwrap();
    let decision = algo.route(&request("f"), &g).unwrap();
    assert_eq!(decision.path(), path(&["h1", "s1", "s4", "s2", "h2"]).as_slice());
    assert!(decision.reservation().is_none());
}

#[test]
fn test_round_robin_fairness() {
    let g = leaf_spine();
    let mut algo = strategy_by_name("ecmp", "round_robin", 42).unwrap();
    let mut per_spine: HashMap<String, usize> = HashMap::new();
    for i in 0..10 {
        let p = algo.route(&request(&i.to_string()), &g).unwrap().into_path();
        *per_spine.entry(p[2].clone()).or_default() += 1;
    }
    assert_eq!(per_spine.get("s3"), Some(&5));
    assert_eq!(per_spine.get("s4"), Some(&5));
}

#[test]
fn test_round_robin_alternates() {
    let g = leaf_spine();
    let mut algo = strategy_by_name("ecmp", "round_robin", 42).unwrap();
    let spines: Vec<String> = (0..4)
        .map(|i| algo.route(&request(&i.to_string()), &g).unwrap().into_path()[2].clone())
        .collect();
    assert_eq!(spines, vec!["s3", "s4", "s3", "s4"]);
}

#[test]
fn test_ecmp_hash_follows_switch_hint() {
    let g = leaf_spine();
    let mut algo = strategy_by_name("ecmp", "hash", 42).unwrap();
    let mut req = request("f");
    req.ecmp_hint = Some(3);
    assert_eq!(algo.route(&req, &g).unwrap().path()[2], "s4");
    req.ecmp_hint = Some(2);
    assert_eq!(algo.route(&req, &g).unwrap().path()[2], "s3");
    req.ecmp_hint = Some(7);
    assert!(matches!(
        algo.route(&req, &g),
        Err(RoutingError::EcmpPortUnmapped { port: 7, .. })
    ));
}

#[test]
fn test_ecmp_random_stays_on_uplinks() {
    let g = leaf_spine();
    let mut algo = strategy_by_name("ecmp", "random", 7).unwrap();
    for i in 0..20 {
        let p = algo.route(&request(&i.to_string()), &g).unwrap().into_path();
        assert!(p[2] == "s3" || p[2] == "s4");
    }
}

#[test]
fn test_path_property_picks_least_loaded() {
    let mut g = leaf_spine();
    load_spine(&mut g, "s3", 0.6);
    load_spine(&mut g, "s4", 0.2);
    let mut algo = strategy_by_name("path_property", "load_by_counter", 42).unwrap();
    assert_eq!(algo.route(&request("f"), &g).unwrap().path()[2], "s4");
}

#[test]
fn test_pfr_places_on_feasible_path_and_reserves() {
    let mut g = leaf_spine();
    // remaining capacity: s3 path 0.6, s4 path 0.2
    load_spine(&mut g, "s3", 0.4);
    load_spine(&mut g, "s4", 0.8);
    let mut algo = strategy_by_name("flow_prediction", "throughput", 42).unwrap();
    assert!(algo.requires_prediction());

    // 3 Mbit/s on 10 Mbit/s links
    let decision = algo.route(&with_prediction("f", 3.0), &g).unwrap();
    assert_eq!(decision.path()[2], "s3");
    let flow_load = decision.reservation().unwrap();
    assert!((flow_load - 0.3).abs() < 1e-12);

    let before: Vec<f64> = [("s1", "s3"), ("s3", "s2")]
        .iter()
        .map(|(a, b)| g.get_link_metric(a, b, LinkProperty::LoadByCounter).unwrap())
        .collect();
    g.reserve(decision.path(), LinkProperty::LoadByCounter, flow_load)
        .unwrap();
    for ((a, b), old) in [("s1", "s3"), ("s3", "s2")].iter().zip(before) {
        let new = g.get_link_metric(a, b, LinkProperty::LoadByCounter).unwrap();
        assert!((new - old - 0.3).abs() < 1e-12);
    }
    // the other path is untouched
    assert_eq!(
        g.get_link_metric("s1", "s4", LinkProperty::LoadByCounter).unwrap(),
        0.8
    );
}

#[test]
fn test_pfr_falls_back_to_most_remaining() {
    let mut g = leaf_spine();
    // remaining capacity: s3 path 0.1, s4 path 0.05
    load_spine(&mut g, "s3", 0.9);
    load_spine(&mut g, "s4", 0.95);
    let mut algo = strategy_by_name("flow_prediction", "throughput", 42).unwrap();
    let decision = algo.route(&with_prediction("f", 3.0), &g).unwrap();
    assert_eq!(decision.path()[2], "s3");
    assert_eq!(algo.custom_metrics().get("pfr_fallbacks"), Some(&1.0));
}

#[test]
fn test_pfr_without_prediction_fails() {
    let g = leaf_spine();
    let mut algo = strategy_by_name("flow_prediction", "throughput", 42).unwrap();
    assert!(matches!(
        algo.route(&request("f"), &g),
        Err(RoutingError::MissingPrediction(_))
    ));
}

#[test]
fn test_unknown_hosts_have_no_path() {
    let g = leaf_spine();
    let mut req = request("f");
    req.dst_host = "h9".to_string();
    for (strategy, metric) in available_selections() {
        let mut algo = strategy_by_name(strategy, metric, 42).unwrap();
        let mut r = req.clone();
        r.ecmp_hint = Some(2);
        r.predicted_throughput = Some(Throughput::new(1.0, DataRate::Megabit));
        assert!(
            matches!(algo.route(&r, &g), Err(RoutingError::NoPath { .. })),
            "{}/{} should report no path",
            strategy,
            metric
        );
    }
}

#[test]
fn test_selection_errors() {
    assert!(matches!(
        strategy_by_name("ecmp", "hops", 42),
        Err(SelectionError::Mismatch { .. })
    ));
    assert!(matches!(
        strategy_by_name("path_property", "latency_by_probe", 42),
        Err(SelectionError::NotImplemented { .. })
    ));
    assert!(matches!(
        strategy_by_name("teleport", "hops", 42),
        Err(SelectionError::UnknownStrategy(_))
    ));
}

#[test]
fn test_available_selections() {
    let available = available_selections();
    assert!(available.contains(&("shortest_path", "hops")));
    assert!(available.contains(&("ecmp", "round_robin")));
    assert!(available.contains(&("flow_prediction", "throughput")));
    assert!(!available.contains(&("shortest_path", "load_by_probe")));
    for (strategy, metric) in available {
        assert!(strategy_by_name(strategy, metric, 1).is_ok());
    }
}
