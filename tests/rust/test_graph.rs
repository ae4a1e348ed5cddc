/// Integration tests for the topology graph.
mod common;

use common::{leaf_spine, line_of_four, path};
use flowroute_algorithms::{AggregateMode, LinkProperty, TopologyView};
use flowroute_core::graph::GraphError;
use flowroute_core::topology::{TopologyError, TopologySpec};

#[test]
fn test_leaf_spine_structure() {
    let g = leaf_spine();
    assert_eq!(g.switches().count(), 4);
    assert_eq!(g.hosts().count(), 2);
    // 4 inter-switch cables, one directed edge per side
    assert_eq!(g.switch_links().count(), 8);
    // 2 host cables, mirrored
    assert_eq!(g.links().count(), 12);

    assert_eq!(g.egress_port("s1", "s3"), Some(2));
    assert_eq!(g.egress_port("s3", "s1"), Some(1));
    assert_eq!(g.egress_port("s2", "h2"), Some(1));
    assert_eq!(g.neighbor_on_port("s1", 3), Some("s4"));
    assert_eq!(g.ecmp_port_count("s1"), Some(2));
    assert_eq!(g.ecmp_port_count("s3"), Some(1));
    assert_eq!(g.ecmp_port_count("h1"), None);
}

#[test]
fn test_links_start_idle_at_full_capacity() {
    let g = leaf_spine();
    for link in g.links() {
        assert_eq!(link.capacity, 1.0);
        assert_eq!(link.value(LinkProperty::LoadByCounter), 0.0);
        assert!(g
            .link_history(&link.from, &link.to, LinkProperty::LoadByCounter)
            .unwrap()
            .is_empty());
    }
    assert_eq!(g.link("s1", "s3").unwrap().name, "s1-s3");
}

#[test]
fn test_map_ip_to_host() {
    let g = leaf_spine();
    assert_eq!(g.map_ip_to_host("10.0.2.2"), Some("h2"));
    assert_eq!(g.map_ip_to_host("10.9.9.9"), None);
}

#[test]
fn test_simple_paths_through_both_spines() {
    let g = leaf_spine();
    let paths = g.simple_paths("h1", "h2");
    assert_eq!(paths.len(), 2);
    let spines: Vec<&str> = paths.iter().map(|p| p[2].as_str()).collect();
    assert!(spines.contains(&"s3"));
    assert!(spines.contains(&"s4"));
    assert!(g.simple_paths("h1", "h1").is_empty());
}

#[test]
fn test_hop_count_shortest_path_is_minimal() {
    let g = leaf_spine();
    let shortest = g.shortest("h1", "h2", None).unwrap();
    let min_len = g.simple_paths("h1", "h2").iter().map(Vec::len).min().unwrap();
    assert_eq!(shortest.len(), min_len);
    assert_eq!(shortest.first().map(String::as_str), Some("h1"));
    assert_eq!(shortest.last().map(String::as_str), Some("h2"));
}

#[test]
fn test_weighted_shortest_path_avoids_load() {
    let mut g = leaf_spine();
    g.set_link_metric("s1", "s3", LinkProperty::LoadByCounter, 0.9, None)
        .unwrap();
    let p = g.shortest("h1", "h2", Some(LinkProperty::LoadByCounter)).unwrap();
    assert_eq!(p, path(&["h1", "s1", "s4", "s2", "h2"]));
}

#[test]
fn test_min_and_max_aggregates() {
    let mut g = line_of_four();
    let p = path(&["h1", "s1", "s2", "s3", "s4", "h2"]);

    for ((a, b), v) in [("s1", "s2"), ("s2", "s3"), ("s3", "s4")]
        .into_iter()
        .zip([0.5, 1.0, 0.8])
    {
        g.set_link_metric(a, b, LinkProperty::LoadByCounter, v, None).unwrap();
    }
    assert_eq!(
        g.aggregate(&p, LinkProperty::LoadByCounter, AggregateMode::Min).unwrap(),
        Some(0.5)
    );

    for ((a, b), v) in [("s1", "s2"), ("s2", "s3"), ("s3", "s4")]
        .into_iter()
        .zip([0.1, 0.9, 0.3])
    {
        g.set_link_metric(a, b, LinkProperty::LoadByCounter, v, None).unwrap();
    }
    assert_eq!(
        g.aggregate(&p, LinkProperty::LoadByCounter, AggregateMode::Max).unwrap(),
        Some(0.9)
    );
}

#[test]
fn test_aggregate_of_single_switch_path_is_none() {
    let g = leaf_spine();
    assert_eq!(
        g.aggregate(&path(&["h1", "s1", "h1"]), LinkProperty::Capacity, AggregateMode::Min)
            .unwrap(),
        None
    );
}

#[test]
fn test_history_keeps_every_sample() {
    let mut g = leaf_spine();
    for (ts, v) in [(1000, 0.1), (2000, 0.4), (3000, 0.2)] {
        g.set_link_metric("s1", "s3", LinkProperty::LoadByCounter, v, Some(ts))
            .unwrap();
    }
    let history = g
        .link_history("s1", "s3", LinkProperty::LoadByCounter)
        .unwrap();
    let stamps: Vec<u64> = history.keys().copied().collect();
    assert_eq!(stamps, vec![1000, 2000, 3000]);
    assert_eq!(
        g.get_link_metric("s1", "s3", LinkProperty::LoadByCounter).unwrap(),
        0.2
    );
}

#[test]
fn test_reserve_credits_interior_links_only() {
    let mut g = leaf_spine();
    let p = path(&["h1", "s1", "s3", "s2", "h2"]);
    g.reserve(&p, LinkProperty::LoadByCounter, 0.25).unwrap();
    assert_eq!(g.get_link_metric("s1", "s3", LinkProperty::LoadByCounter).unwrap(), 0.25);
    assert_eq!(g.get_link_metric("s3", "s2", LinkProperty::LoadByCounter).unwrap(), 0.25);
    assert_eq!(g.get_link_metric("h1", "s1", LinkProperty::LoadByCounter).unwrap(), 0.0);
    // reservations are not samples
    assert!(g
        .link_history("s1", "s3", LinkProperty::LoadByCounter)
        .unwrap()
        .is_empty());
}

#[test]
fn test_static_properties_are_read_only() {
    let mut g = leaf_spine();
    assert_eq!(
        g.set_link_metric("s1", "s3", LinkProperty::Capacity, 0.5, None),
        Err(GraphError::StaticProperty(LinkProperty::Capacity))
    );
    assert!(matches!(
        g.get_link_metric("s1", "s2", LinkProperty::LoadByCounter),
        Err(GraphError::UnknownLink { .. })
    ));
}

#[test]
fn test_invalid_descriptions_are_rejected() {
    let dangling = r#"{"nodes": [{"kind": "host", "name": "h1", "ip": "10.0.0.1", "mac": "aa"}],
                       "links": [{"node1": "h1", "port1": 0, "node2": "s9", "port2": 1, "bw": 10}]}"#;
    assert!(matches!(
        TopologySpec::from_str(dangling),
        Err(TopologyError::Validation(_))
    ));

    let reused_port = r#"{"nodes": [
            {"kind": "switch", "name": "s1", "device_id": 1, "mgmt_mac": "bb"},
            {"kind": "host", "name": "h1", "ip": "10.0.0.1", "mac": "aa"},
            {"kind": "host", "name": "h2", "ip": "10.0.0.2", "mac": "ac"}],
        "links": [
            {"node1": "h1", "port1": 0, "node2": "s1", "port2": 1, "bw": 10},
            {"node1": "h2", "port1": 0, "node2": "s1", "port2": 1, "bw": 10}]}"#;
    assert!(TopologySpec::from_str(reused_port).is_err());
}
