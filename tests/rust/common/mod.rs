//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use flowroute_algorithms::DataRate;
use flowroute_core::config::RouterConfig;
use flowroute_core::graph::{LinkAttributes, TopologyGraph};
use flowroute_core::topology::{Node, TopologySpec};
use flowroute_core::tracker::{FlowKey, PacketArrival, PacketHint};

/// Two leaves and two spines. h1 sits on s1, h2 on s2, each leaf has one
/// uplink per spine on ports 2 and 3.
pub const LEAF_SPINE: &str = r#"{
    "nodes": [
        {"kind": "switch", "name": "s1", "device_id": 1, "mgmt_mac": "00:00:00:00:01:00"},
        {"kind": "switch", "name": "s2", "device_id": 2, "mgmt_mac": "00:00:00:00:02:00"},
        {"kind": "switch", "name": "s3", "device_id": 3, "mgmt_mac": "00:00:00:00:03:00"},
        {"kind": "switch", "name": "s4", "device_id": 4, "mgmt_mac": "00:00:00:00:04:00"},
        {"kind": "host", "name": "h1", "ip": "10.0.1.1", "mac": "00:00:0a:00:01:01"},
        {"kind": "host", "name": "h2", "ip": "10.0.2.2", "mac": "00:00:0a:00:02:02"}
    ],
    "links": [
        {"node1": "h1", "port1": 0, "node2": "s1", "port2": 1, "bw": 10},
        {"node1": "h2", "port1": 0, "node2": "s2", "port2": 1, "bw": 10},
        {"node1": "s1", "port1": 2, "node2": "s3", "port2": 1, "bw": 10},
        {"node1": "s1", "port1": 3, "node2": "s4", "port2": 1, "bw": 10},
        {"node1": "s2", "port1": 2, "node2": "s3", "port2": 2, "bw": 10},
        {"node1": "s2", "port1": 3, "node2": "s4", "port2": 2, "bw": 10}
    ]
}"#;

pub fn leaf_spine() -> TopologyGraph {
    let spec = TopologySpec::from_str(LEAF_SPINE).unwrap();
    TopologyGraph::from_spec(&spec, DataRate::Megabit).unwrap()
}

/// h1 - s1 - s2 - s3 - s4 - h2, every link 10 units wide.
pub fn line_of_four() -> TopologyGraph {
    let mut g = TopologyGraph::new(DataRate::Megabit);
    g.add_node(Node::host("h1", "10.0.1.1", "aa:00:00:00:00:01")).unwrap();
    g.add_node(Node::host("h2", "10.0.2.2", "aa:00:00:00:00:02")).unwrap();
    for (i, name) in ["s1", "s2", "s3", "s4"].iter().enumerate() {
        g.add_node(Node::switch(name, i as u32 + 1, &format!("bb:00:00:00:00:0{}", i + 1)))
            .unwrap();
    }
    let attrs = |port_id| LinkAttributes {
        port_id,
        bandwidth: 10.0,
        delay: 0.0,
        loss: 0.0,
    };
    g.add_link("s1", "h1", attrs(1)).unwrap();
    g.add_link("s4", "h2", attrs(1)).unwrap();
    for pair in [["s1", "s2"], ["s2", "s3"], ["s3", "s4"]] {
        g.add_link(pair[0], pair[1], attrs(2)).unwrap();
        g.add_link(pair[1], pair[0], attrs(3)).unwrap();
    }
    g
}

pub fn path(nodes: &[&str]) -> Vec<String> {
    nodes.iter().map(|n| n.to_string()).collect()
}

pub fn arrival(src_port: u16) -> PacketArrival {
    PacketArrival {
        key: FlowKey {
            src_ip: "10.0.1.1".to_string(),
            dst_ip: "10.0.2.2".to_string(),
            protocol: 17,
            src_port,
            dst_port: 5001,
        },
        hint: PacketHint {
            flow_hash_one: src_port,
            flow_hash_two: u32::from(src_port) << 8,
            ecmp_result: Some(2),
        },
        ingress: "s1".to_string(),
        payload: Vec::new(),
    }
}

pub fn config(strategy: &str, metric: &str) -> RouterConfig {
    RouterConfig::from_str(&format!(
        r#"
[controller]
name = "integration"
strategy = "{strategy}"
metric = "{metric}"

[monitor]
enabled = false
interval_ms = 1000

[topology]
path = "unused.json"
"#
    ))
    .unwrap()
}
