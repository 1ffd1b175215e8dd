//! Network Topology Service
//!
//! Directed capacitated graphs with the queries the encoders need: node
//! pairs, edge capacities, aggregate capacities and path sets. Topologies
//! load from and save to networkx node-link JSON.

mod paths;
pub mod partition;

pub use paths::{Path, PathType};

use crate::error::{MetaOptError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;

/// Ordered `(source, destination)` node pair.
pub type NodePair = (String, String);

/// Capacity assumed for links that do not specify one.
pub const DEFAULT_CAPACITY: f64 = 1000.0;

/// A directed capacitated edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub capacity: f64,
}

/// Directed graph with per-edge capacity.
///
/// Nodes keep insertion order; successors are kept sorted so every path
/// query is deterministic.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    capacities: BTreeMap<NodePair, f64>,
    successors: Vec<BTreeSet<usize>>,
}

impl Topology {
    /// Empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; adding an existing node is a no-op.
    pub fn add_node(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        if let Some(&i) = self.index.get(&name) {
            return i;
        }
        let i = self.nodes.len();
        self.index.insert(name.clone(), i);
        self.nodes.push(name);
        self.successors.push(BTreeSet::new());
        i
    }

    /// Add (or overwrite) a directed edge, creating missing endpoints.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>, capacity: f64) -> Result<()> {
        let (source, target) = (source.into(), target.into());
        if source == target {
            return Err(MetaOptError::topology(format!("self-loop on {}", source)));
        }
        if !(capacity.is_finite() && capacity >= 0.0) {
            return Err(MetaOptError::topology(format!(
                "edge {}->{} has invalid capacity {}",
                source, target, capacity
            )));
        }
        let s = self.add_node(source.clone());
        let t = self.add_node(target.clone());
        self.successors[s].insert(t);
        self.capacities.insert((source, target), capacity);
        Ok(())
    }

    /// Add both directions with the same capacity
    pub fn add_bidirectional_edge(&mut self, a: &str, b: &str, capacity: f64) -> Result<()> {
        self.add_edge(a, b, capacity)?;
        self.add_edge(b, a, capacity)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.capacities.len()
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All edges in `(source, target)` order
    pub fn edges(&self) -> Vec<Edge> {
        self.capacities
            .iter()
            .map(|((s, t), &c)| Edge {
                source: s.clone(),
                target: t.clone(),
                capacity: c,
            })
            .collect()
    }

    /// Every ordered pair of distinct nodes
    pub fn node_pairs(&self) -> Vec<NodePair> {
        let mut pairs = Vec::with_capacity(self.nodes.len() * self.nodes.len().saturating_sub(1));
        for s in &self.nodes {
            for t in &self.nodes {
                if s != t {
                    pairs.push((s.clone(), t.clone()));
                }
            }
        }
        pairs
    }

    /// Ordered pairs of distinct nodes with a directed path between them
    pub fn reachable_pairs(&self) -> Vec<NodePair> {
        let mut pairs = Vec::new();
        for (s, name) in self.nodes.iter().enumerate() {
            let reach = self.reachable_from(s);
            for (t, other) in self.nodes.iter().enumerate() {
                if s != t && reach[t] {
                    pairs.push((name.clone(), other.clone()));
                }
            }
        }
        pairs
    }

    fn reachable_from(&self, s: usize) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([s]);
        seen[s] = true;
        while let Some(u) = queue.pop_front() {
            for &v in &self.successors[u] {
                if !seen[v] {
                    seen[v] = true;
                    queue.push_back(v);
                }
            }
        }
        seen
    }

    /// Capacity of edge `source → target`
    pub fn capacity(&self, source: &str, target: &str) -> Result<f64> {
        self.capacities
            .get(&(source.to_string(), target.to_string()))
            .copied()
            .ok_or_else(|| MetaOptError::topology(format!("no edge {}->{}", source, target)))
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.capacities.contains_key(&(source.to_string(), target.to_string()))
    }

    /// Largest edge capacity (0 for an edgeless graph)
    pub fn max_capacity(&self) -> f64 {
        self.capacities.values().copied().fold(0.0, f64::max)
    }

    /// Sum of all edge capacities
    pub fn total_capacity(&self) -> f64 {
        self.capacities.values().sum()
    }

    /// Copy with every capacity divided by `k`
    pub fn split_capacity(&self, k: usize) -> Result<Topology> {
        if k == 0 {
            return Err(MetaOptError::invalid_parameter("k", "must be at least 1"));
        }
        let mut out = self.clone();
        for c in out.capacities.values_mut() {
            *c /= k as f64;
        }
        Ok(out)
    }

    /// Nodes adjacent to `name` in either direction
    pub fn neighbors(&self, name: &str) -> Result<Vec<String>> {
        let i = self.node_index(name)?;
        let mut out: BTreeSet<usize> = self.successors[i].clone();
        for (u, succ) in self.successors.iter().enumerate() {
            if succ.contains(&i) {
                out.insert(u);
            }
        }
        Ok(out.into_iter().map(|j| self.nodes[j].clone()).collect())
    }

    pub(crate) fn node_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| MetaOptError::topology(format!("unknown node {}", name)))
    }

    pub(crate) fn node_name(&self, i: usize) -> &str {
        &self.nodes[i]
    }

    pub(crate) fn successor_indices(&self, i: usize) -> &BTreeSet<usize> {
        &self.successors[i]
    }

    /// Parse networkx node-link JSON.
    ///
    /// Links without a `capacity` attribute get [`DEFAULT_CAPACITY`]. An
    /// undirected document (`"directed": false`) adds both directions.
    pub fn from_json(json: &str) -> Result<Topology> {
        let doc: NodeLinkGraph = serde_json::from_str(json)?;
        let mut topo = Topology::new();
        for node in &doc.nodes {
            topo.add_node(node.id.to_string());
        }
        for link in &doc.links {
            let capacity = link.capacity.unwrap_or(DEFAULT_CAPACITY);
            let (s, t) = (link.source.to_string(), link.target.to_string());
            if doc.directed {
                topo.add_edge(s, t, capacity)?;
            } else {
                topo.add_bidirectional_edge(&s, &t, capacity)?;
            }
        }
        Ok(topo)
    }

    /// Serialize as directed networkx node-link JSON
    pub fn to_json(&self) -> Result<String> {
        let doc = NodeLinkGraph {
            directed: true,
            multigraph: false,
            graph: serde_json::Value::Object(serde_json::Map::new()),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeEntry { id: NodeId::Name(n.clone()) })
                .collect(),
            links: self
                .capacities
                .iter()
                .map(|((s, t), &c)| LinkEntry {
                    source: NodeId::Name(s.clone()),
                    target: NodeId::Name(t.clone()),
                    capacity: Some(c),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Read a node-link JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Topology> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Write a node-link JSON file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeLinkGraph {
    #[serde(default = "default_directed")]
    directed: bool,
    #[serde(default)]
    multigraph: bool,
    #[serde(default)]
    graph: serde_json::Value,
    nodes: Vec<NodeEntry>,
    #[serde(alias = "edges")]
    links: Vec<LinkEntry>,
}

fn default_directed() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeEntry {
    id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkEntry {
    source: NodeId,
    target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    capacity: Option<f64>,
}

/// networkx ids are commonly integers; both forms are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NodeId {
    Number(i64),
    Name(String),
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Number(n) => write!(f, "{}", n),
            NodeId::Name(s) => f.write_str(s),
        }
    }
}
