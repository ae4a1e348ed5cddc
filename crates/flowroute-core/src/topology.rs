//! Static topology description.
//!
//! The fabric is described once, as JSON, by its switches, hosts and the
//! point-to-point links between them. [`TopologySpec`] is that description;
//! [`Node`] is what a described node becomes inside the graph.

use crate::graph::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Failed to read topology file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse topology JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid topology: {0}")]
    Validation(String),
    #[error("Failed to build topology graph: {0}")]
    Graph(#[from] GraphError),
}

/// Kind of a fabric node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Switch,
    Host,
}

/// One described node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSpec {
    Switch {
        name: String,
        device_id: u32,
        mgmt_mac: String,
        #[serde(default)]
        mgmt_ip: Option<String>,
    },
    Host {
        name: String,
        ip: String,
        mac: String,
    },
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            NodeSpec::Switch { name, .. } | NodeSpec::Host { name, .. } => name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSpec::Switch { .. } => NodeKind::Switch,
            NodeSpec::Host { .. } => NodeKind::Host,
        }
    }
}

/// One described point-to-point link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub node1: String,
    /// Port on `node1`; ignored when `node1` is a host.
    pub port1: u32,
    pub node2: String,
    /// Port on `node2`; ignored when `node2` is a host.
    pub port2: u32,
    /// Raw bandwidth in topology data-rate units.
    pub bw: f64,
    /// Propagation delay in milliseconds.
    #[serde(default)]
    pub delay: f64,
    /// Loss in percent.
    #[serde(default)]
    pub loss: f64,
}

/// The complete static fabric description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologySpec {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

impl TopologySpec {
    /// Load a topology description from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a topology description from a JSON string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, TopologyError> {
        let spec: TopologySpec = serde_json::from_str(s)?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let mut kinds = std::collections::HashMap::new();
        for node in &self.nodes {
            if kinds.insert(node.name(), node.kind()).is_some() {
                return Err(TopologyError::Validation(format!(
                    "duplicate node {}",
                    node.name()
                )));
            }
        }

        let mut used_ports = HashSet::new();
        for link in &self.links {
            for (node, port) in [(&link.node1, link.port1), (&link.node2, link.port2)] {
                match kinds.get(node.as_str()) {
                    None => {
                        return Err(TopologyError::Validation(format!(
                            "link {}-{} references unknown node {}",
                            link.node1, link.node2, node
                        )))
                    }
                    Some(NodeKind::Switch) => {
                        if port == 0 {
                            return Err(TopologyError::Validation(format!(
                                "switch {} uses reserved port 0",
                                node
                            )));
                        }
                        if !used_ports.insert((node.as_str(), port)) {
                            return Err(TopologyError::Validation(format!(
                                "port {} on switch {} is used by more than one link",
                                port, node
                            )));
                        }
                    }
                    Some(NodeKind::Host) => {}
                }
            }
            if link.bw <= 0.0 {
                return Err(TopologyError::Validation(format!(
                    "link {}-{} must have bw > 0",
                    link.node1, link.node2
                )));
            }
        }
        Ok(())
    }
}

/// Attributes of a switch node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchAttributes {
    pub device_id: u32,
    pub mgmt_mac: String,
    pub mgmt_ip: Option<String>,
    /// Data port -> peer node, filled in as links are added.
    pub ports: BTreeMap<u32, String>,
}

/// Attributes of a host node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostAttributes {
    pub ip: String,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeAttributes {
    Switch(SwitchAttributes),
    Host(HostAttributes),
}

/// A node in the topology graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub attributes: NodeAttributes,
}

impl Node {
    pub fn switch(name: &str, device_id: u32, mgmt_mac: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: NodeAttributes::Switch(SwitchAttributes {
                device_id,
                mgmt_mac: mgmt_mac.to_string(),
                mgmt_ip: None,
                ports: BTreeMap::new(),
            }),
        }
    }

    pub fn host(name: &str, ip: &str, mac: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: NodeAttributes::Host(HostAttributes {
                ip: ip.to_string(),
                mac: mac.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.attributes {
            NodeAttributes::Switch(_) => NodeKind::Switch,
            NodeAttributes::Host(_) => NodeKind::Host,
        }
    }

    pub fn as_switch(&self) -> Option<&SwitchAttributes> {
        match &self.attributes {
            NodeAttributes::Switch(s) => Some(s),
            NodeAttributes::Host(_) => None,
        }
    }

    pub fn as_host(&self) -> Option<&HostAttributes> {
        match &self.attributes {
            NodeAttributes::Host(h) => Some(h),
            NodeAttributes::Switch(_) => None,
        }
    }

    /// MAC a neighbor rewrites as next hop when forwarding to this node.
    pub fn mac(&self) -> &str {
        match &self.attributes {
            NodeAttributes::Switch(s) => &s.mgmt_mac,
            NodeAttributes::Host(h) => &h.mac,
        }
    }
}

impl From<&NodeSpec> for Node {
    fn from(spec: &NodeSpec) -> Self {
        match spec {
            NodeSpec::Switch {
                name,
                device_id,
                mgmt_mac,
                mgmt_ip,
            } => Node {
                name: name.clone(),
                attributes: NodeAttributes::Switch(SwitchAttributes {
                    device_id: *device_id,
                    mgmt_mac: mgmt_mac.clone(),
                    mgmt_ip: mgmt_ip.clone(),
                    ports: BTreeMap::new(),
                }),
            },
            NodeSpec::Host { name, ip, mac } => Node::host(name, ip, mac),
        }
    }
}
