//! Directed, attributed topology graph.
//!
//! Nodes are switches and hosts; edges are directed links. A switch-switch
//! cable becomes two edges, one per direction, each carrying the egress port
//! of its own source switch. A host-facing cable becomes one edge plus a
//! mirror with identical attributes, so paths can start and end at hosts.
//!
//! Every edge starts with `capacity = 1.0` and all dynamic metrics at zero.
//! Dynamic metrics keep a timestamp-ordered history next to their current
//! value; static properties cannot be written after construction.

use crate::topology::{Node, NodeAttributes, NodeKind, TopologyError, TopologySpec};
use flowroute_algorithms::{
    interior_links, AggregateMode, DataRate, LinkProperty, Path, RoutingError, TopologyView,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),
    #[error("Unknown link {node1} -> {node2}")]
    UnknownLink { node1: String, node2: String },
    #[error("Duplicate link {node1} -> {node2}")]
    DuplicateLink { node1: String, node2: String },
    #[error("Link property {0} is static and cannot be written")]
    StaticProperty(LinkProperty),
}

/// Static attributes supplied when a link is added.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkAttributes {
    /// Egress port on the source switch.
    pub port_id: u32,
    pub bandwidth: f64,
    pub delay: f64,
    pub loss: f64,
}

/// Current value of a dynamic metric and its timestamped history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSeries {
    pub current: f64,
    /// Timestamp in milliseconds -> value.
    pub history: BTreeMap<u64, f64>,
}

/// A directed edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub name: String,
    pub from: String,
    pub to: String,
    pub port_id: u32,
    pub capacity: f64,
    pub bandwidth: f64,
    pub delay: f64,
    pub loss: f64,
    metrics: BTreeMap<LinkProperty, MetricSeries>,
    #[serde(skip)]
    from_index: usize,
    #[serde(skip)]
    to_index: usize,
}

impl Link {
    /// Current value of any property, static or dynamic.
    pub fn value(&self, key: LinkProperty) -> f64 {
        match key {
            LinkProperty::Capacity => self.capacity,
            LinkProperty::Bandwidth => self.bandwidth,
            LinkProperty::Delay => self.delay,
            LinkProperty::Loss => self.loss,
            dynamic => self.metrics.get(&dynamic).map_or(0.0, |m| m.current),
        }
    }

    pub fn series(&self, key: LinkProperty) -> Option<&MetricSeries> {
        self.metrics.get(&key)
    }

    fn set(
        &mut self,
        key: LinkProperty,
        value: f64,
        record_at: Option<u64>,
    ) -> Result<(), GraphError> {
        if !key.is_dynamic() {
            return Err(GraphError::StaticProperty(key));
        }
        let series = self.metrics.entry(key).or_default();
        series.current = value;
        if let Some(ts) = record_at {
            series.history.insert(ts, value);
        }
        Ok(())
    }
}

/// Dijkstra frontier entry, min-ordered by cost then insertion sequence.
#[derive(Debug, Clone, Copy)]
struct Frontier {
    cost: f64,
    sequence: u64,
    node: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want min-heap
        other
            .cost
            .total_cmp(&self.cost)
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// The live topology graph shared by the router, telemetry and programmer.
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    links: Vec<Link>,
    link_index: HashMap<(usize, usize), usize>,
    /// node -> outgoing link indices, in insertion order.
    adjacency: Vec<Vec<usize>>,
    data_rate: DataRate,
}

impl TopologyGraph {
    pub fn new(data_rate: DataRate) -> Self {
        Self {
            data_rate,
            ..Default::default()
        }
    }

    /// Build the graph for a parsed topology description.
    pub fn from_spec(spec: &TopologySpec, data_rate: DataRate) -> Result<Self, TopologyError> {
        let mut graph = Self::new(data_rate);
        for node in &spec.nodes {
            graph.add_node(Node::from(node))?;
        }

        for link in &spec.links {
            let kind1 = graph.node_kind(&link.node1)?;
            let kind2 = graph.node_kind(&link.node2)?;
            let attrs = |port_id| LinkAttributes {
                port_id,
                bandwidth: link.bw,
                delay: link.delay,
                loss: link.loss,
            };
            match (kind1, kind2) {
                (NodeKind::Switch, NodeKind::Switch) => {
                    graph.add_link(&link.node1, &link.node2, attrs(link.port1))?;
                    graph.add_link(&link.node2, &link.node1, attrs(link.port2))?;
                }
                (NodeKind::Switch, NodeKind::Host) => {
                    graph.add_link(&link.node1, &link.node2, attrs(link.port1))?;
                }
                (NodeKind::Host, NodeKind::Switch) => {
                    graph.add_link(&link.node2, &link.node1, attrs(link.port2))?;
                }
                (NodeKind::Host, NodeKind::Host) => {
                    return Err(TopologyError::Validation(format!(
                        "hosts {} and {} cannot be linked directly",
                        link.node1, link.node2
                    )));
                }
            }
        }

        tracing::debug!(
            nodes = graph.nodes.len(),
            links = graph.links.len(),
            "topology graph built"
        );
        Ok(graph)
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node_index.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }
        self.node_index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        self.adjacency.push(Vec::new());
        Ok(())
    }

    /// Add a directed link. A link touching a host is mirrored with the same
    /// attributes. A switch source records `port_id -> to` in its port table.
    pub fn add_link(
        &mut self,
        from: &str,
        to: &str,
        attrs: LinkAttributes,
    ) -> Result<(), GraphError> {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        let host_adjacent =
            self.nodes[a].kind() == NodeKind::Host || self.nodes[b].kind() == NodeKind::Host;

        self.insert_edge(a, b, attrs)?;
        if host_adjacent {
            self.insert_edge(b, a, attrs)?;
        }
        Ok(())
    }

    fn insert_edge(&mut self, a: usize, b: usize, attrs: LinkAttributes) -> Result<(), GraphError> {
        if self.link_index.contains_key(&(a, b)) {
            return Err(GraphError::DuplicateLink {
                node1: self.nodes[a].name.clone(),
                node2: self.nodes[b].name.clone(),
            });
        }

        let from = self.nodes[a].name.clone();
        let to = self.nodes[b].name.clone();
        if let NodeAttributes::Switch(switch) = &mut self.nodes[a].attributes {
            switch.ports.insert(attrs.port_id, to.clone());
        }

        let metrics = LinkProperty::DYNAMIC
            .iter()
            .map(|&key| (key, MetricSeries::default()))
            .collect();
        let link = Link {
            name: format!("{}-{}", from, to),
            from,
            to,
            port_id: attrs.port_id,
            capacity: 1.0,
            bandwidth: attrs.bandwidth,
            delay: attrs.delay,
            loss: attrs.loss,
            metrics,
            from_index: a,
            to_index: b,
        };

        self.link_index.insert((a, b), self.links.len());
        self.adjacency[a].push(self.links.len());
        self.links.push(link);
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.node_index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind() == NodeKind::Switch)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind() == NodeKind::Host)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn link(&self, from: &str, to: &str) -> Option<&Link> {
        let a = *self.node_index.get(from)?;
        let b = *self.node_index.get(to)?;
        self.link_index.get(&(a, b)).map(|&i| &self.links[i])
    }

    /// Directed switch-to-switch links, in insertion order.
    pub fn switch_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| {
            self.nodes[l.from_index].kind() == NodeKind::Switch
                && self.nodes[l.to_index].kind() == NodeKind::Switch
        })
    }

    pub fn get_link_metric(
        &self,
        from: &str,
        to: &str,
        key: LinkProperty,
    ) -> Result<f64, GraphError> {
        Ok(self.link_or_err(from, to)?.value(key))
    }

    /// Overwrite a dynamic metric. With `record_at`, the value is also
    /// appended to the metric's history under that timestamp.
    pub fn set_link_metric(
        &mut self,
        from: &str,
        to: &str,
        key: LinkProperty,
        value: f64,
        record_at: Option<u64>,
    ) -> Result<(), GraphError> {
        let index = self.link_position(from, to)?;
        self.links[index].set(key, value, record_at)
    }

    pub fn link_history(
        &self,
        from: &str,
        to: &str,
        key: LinkProperty,
    ) -> Result<&BTreeMap<u64, f64>, GraphError> {
        let link = self.link_or_err(from, to)?;
        link.series(key)
            .map(|s| &s.history)
            .ok_or(GraphError::StaticProperty(key))
    }

    /// Credit `amount` onto `key` of every interior link of `path`, without
    /// recording history.
    pub fn reserve(
        &mut self,
        path: &[String],
        key: LinkProperty,
        amount: f64,
    ) -> Result<(), GraphError> {
        for (from, to) in interior_links(path) {
            let index = self.link_position(from, to)?;
            let current = self.links[index].value(key);
            self.links[index].set(key, current + amount, None)?;
        }
        Ok(())
    }

    /// Fold `key` over the interior links of `path`.
    ///
    /// `Ok(None)` when the interior has no link. Equal values keep the
    /// earlier link.
    pub fn aggregate(
        &self,
        path: &[String],
        key: LinkProperty,
        mode: AggregateMode,
    ) -> Result<Option<f64>, GraphError> {
        let mut acc: Option<f64> = None;
        for (from, to) in interior_links(path) {
            let value = self.get_link_metric(from, to, key)?;
            acc = match acc {
                Some(current) if !mode.dominates(value, current) => Some(current),
                _ => Some(value),
            };
        }
        Ok(acc)
    }

    /// Host whose IP address is `ip`.
    pub fn map_ip_to_host(&self, ip: &str) -> Option<&str> {
        self.hosts()
            .find(|n| n.as_host().map_or(false, |h| h.ip == ip))
            .map(|n| n.name.as_str())
    }

    /// Port on `from` that leads to `to`.
    pub fn egress_port(&self, from: &str, to: &str) -> Option<u32> {
        self.link(from, to).map(|l| l.port_id)
    }

    /// Dijkstra shortest path; every edge weighs 1 when `weight` is `None`.
    pub fn shortest(&self, src: &str, dst: &str, weight: Option<LinkProperty>) -> Option<Path> {
        let source = *self.node_index.get(src)?;
        let target = *self.node_index.get(dst)?;

        let n = self.nodes.len();
        let mut dist: Vec<Option<f64>> = vec![None; n];
        let mut pred: Vec<Option<usize>> = vec![None; n];
        let mut settled = vec![false; n];
        let mut heap = BinaryHeap::new();
        let mut sequence = 0u64;

        dist[source] = Some(0.0);
        heap.push(Frontier {
            cost: 0.0,
            sequence,
            node: source,
        });

        while let Some(Frontier { cost, node, .. }) = heap.pop() {
            if settled[node] {
                continue;
            }
            settled[node] = true;
            if node == target {
                break;
            }
            for &li in &self.adjacency[node] {
                let link = &self.links[li];
                let next = link.to_index;
                if settled[next] {
                    continue;
                }
                let step = weight.map_or(1.0, |key| link.value(key));
                let candidate = cost + step;
                if dist[next].map_or(true, |d| candidate < d) {
                    dist[next] = Some(candidate);
                    pred[next] = Some(node);
                    sequence += 1;
                    heap.push(Frontier {
                        cost: candidate,
                        sequence,
                        node: next,
                    });
                }
            }
        }

        if !settled[target] {
            return None;
        }
        let mut path = vec![self.nodes[target].name.clone()];
        let mut current = target;
        while let Some(prev) = pred[current] {
            path.push(self.nodes[prev].name.clone());
            current = prev;
        }
        path.reverse();
        Some(path)
    }

    /// All simple paths in depth-first order, following each node's links
    /// in insertion order.
    pub fn simple_paths(&self, src: &str, dst: &str) -> Vec<Path> {
        let mut out = Vec::new();
        let (Some(&source), Some(&target)) = (self.node_index.get(src), self.node_index.get(dst))
        else {
            return out;
        };
        if source == target {
            return out;
        }
        let mut stack = Vec::new();
        self.walk(source, target, &mut stack, &mut out);
        out
    }

    fn walk(&self, node: usize, target: usize, stack: &mut Vec<usize>, out: &mut Vec<Path>) {
        stack.push(node);
        if node == target {
            out.push(stack.iter().map(|&i| self.nodes[i].name.clone()).collect());
        } else {
            for &li in &self.adjacency[node] {
                let next = self.links[li].to_index;
                if !stack.contains(&next) {
                    self.walk(next, target, stack, out);
                }
            }
        }
        stack.pop();
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    fn node_kind(&self, name: &str) -> Result<NodeKind, GraphError> {
        self.node(name)
            .map(Node::kind)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    fn index_of(&self, name: &str) -> Result<usize, GraphError> {
        self.node_index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    fn link_position(&self, from: &str, to: &str) -> Result<usize, GraphError> {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        self.link_index
            .get(&(a, b))
            .copied()
            .ok_or_else(|| GraphError::UnknownLink {
                node1: from.to_string(),
                node2: to.to_string(),
            })
    }

    fn link_or_err(&self, from: &str, to: &str) -> Result<&Link, GraphError> {
        self.link_position(from, to).map(|i| &self.links[i])
    }
}

impl TopologyView for TopologyGraph {
    fn shortest_path(&self, src: &str, dst: &str, weight: Option<LinkProperty>) -> Option<Path> {
        self.shortest(src, dst, weight)
    }

    fn all_simple_paths(&self, src: &str, dst: &str) -> Vec<Path> {
        self.simple_paths(src, dst)
    }

    fn path_aggregate(
        &self,
        path: &[String],
        key: LinkProperty,
        mode: AggregateMode,
    ) -> Result<Option<f64>, RoutingError> {
        self.aggregate(path, key, mode)
            .map_err(|e| RoutingError::Topology(e.to_string()))
    }

    fn neighbor_on_port(&self, switch: &str, port: u32) -> Option<&str> {
        self.node(switch)?
            .as_switch()?
            .ports
            .get(&port)
            .map(String::as_str)
    }

    /// Highest port number minus one: port 1 faces the host, the rest are
    /// equal-cost uplinks.
    fn ecmp_port_count(&self, switch: &str) -> Option<u32> {
        let ports = &self.node(switch)?.as_switch()?.ports;
        ports.keys().next_back().map(|max| max.saturating_sub(1))
    }

    fn data_rate(&self) -> DataRate {
        self.data_rate
    }
}
