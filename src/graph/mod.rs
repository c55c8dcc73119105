pub mod generate;

pub use generate::{GraphConfig, GraphKind};

use crate::error::{EngineError, Result};
use crate::ids::{AgentId, GroupId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    pub weight: f64,
    pub bias: f64,
}

impl Default for EdgeData {
    fn default() -> Self {
        Self { weight: 1.0, bias: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Greedy,
    Random,
    Human,
}

/// Per-node attribute slots. `group`, `switches` and `pay` are written back
/// when a simulation exports its final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: AgentId,
    pub skills: Vec<i32>,
    pub group: Option<GroupId>,
    pub switches: u32,
    pub pay: f64,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub struct SocialGraph {
    directed: bool,
    nodes: Vec<NodeData>,
    adj: Vec<BTreeMap<AgentId, EdgeData>>,
}

impl SocialGraph {
    pub fn new(n: usize, nskills: usize) -> Self {
        let nodes = (0..n)
            .map(|i| NodeData {
                id: AgentId::new(i as u32),
                skills: vec![0; nskills],
                group: None,
                switches: 0,
                pay: 0.0,
                kind: NodeKind::default(),
            })
            .collect();
        Self {
            directed: false,
            nodes,
            adj: vec![BTreeMap::new(); n],
        }
    }

    pub fn new_directed(n: usize, nskills: usize) -> Self {
        let mut graph = Self::new(n, nskills);
        graph.directed = true;
        graph
    }

    pub fn complete(n: usize, nskills: usize) -> Self {
        let mut graph = Self::new(n, nskills);
        for u in 0..n {
            for v in (u + 1)..n {
                graph.connect(AgentId::new(u as u32), AgentId::new(v as u32));
            }
        }
        graph
    }

    /// Turns an undirected graph into a directed one with both arcs kept.
    pub fn into_directed(mut self) -> Self {
        self.directed = true;
        self
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn node(&self, id: AgentId) -> &NodeData {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: AgentId) -> &mut NodeData {
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[NodeData] {
        &self.nodes
    }

    pub fn ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    pub fn set_skills(&mut self, id: AgentId, skills: Vec<i32>) {
        self.nodes[id.index()].skills = skills;
    }

    pub fn connect(&mut self, u: AgentId, v: AgentId) {
        self.add_edge(u, v, EdgeData::default());
    }

    pub fn add_edge(&mut self, u: AgentId, v: AgentId, data: EdgeData) {
        if u == v {
            return;
        }
        self.adj[u.index()].insert(v, data);
        if !self.directed {
            self.adj[v.index()].insert(u, data);
        }
    }

    pub fn remove_edge(&mut self, u: AgentId, v: AgentId) {
        self.adj[u.index()].remove(&v);
        if !self.directed {
            self.adj[v.index()].remove(&u);
        }
    }

    pub fn has_edge(&self, u: AgentId, v: AgentId) -> bool {
        self.adj[u.index()].contains_key(&v)
    }

    pub fn edge(&self, u: AgentId, v: AgentId) -> Option<&EdgeData> {
        self.adj[u.index()].get(&v)
    }

    pub fn edge_mut(&mut self, u: AgentId, v: AgentId) -> Option<&mut EdgeData> {
        self.adj[u.index()].get_mut(&v)
    }

    pub fn neighbors(&self, u: AgentId) -> impl Iterator<Item = (AgentId, &EdgeData)> + '_ {
        self.adj[u.index()].iter().map(|(v, e)| (*v, e))
    }

    pub fn degree(&self, u: AgentId) -> usize {
        self.adj[u.index()].len()
    }

    /// Each undirected edge once (u < v); every arc for directed graphs.
    pub fn edges(&self) -> Vec<(AgentId, AgentId, EdgeData)> {
        let mut out = Vec::new();
        for (u, nbrs) in self.adj.iter().enumerate() {
            let u = AgentId::new(u as u32);
            for (v, e) in nbrs {
                if self.directed || u < *v {
                    out.push((u, *v, *e));
                }
            }
        }
        out
    }

    pub fn edge_count(&self) -> usize {
        self.edges().len()
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut EdgeData> + '_ {
        self.adj.iter_mut().flat_map(|nbrs| nbrs.values_mut())
    }

    // Weak connectivity; arcs are followed both ways.
    pub fn is_connected(&self) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        let mut undirected: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (u, nbrs) in self.adj.iter().enumerate() {
            for v in nbrs.keys() {
                undirected[u].push(v.index());
                undirected[v.index()].push(u);
            }
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([0usize]);
        seen[0] = true;
        let mut count = 1;
        while let Some(u) = queue.pop_front() {
            for &v in &undirected[u] {
                if !seen[v] {
                    seen[v] = true;
                    count += 1;
                    queue.push_back(v);
                }
            }
        }
        count == self.nodes.len()
    }

    pub fn total_skills(&self) -> Vec<i32> {
        let width = self.nodes.first().map_or(0, |n| n.skills.len());
        let mut total = vec![0; width];
        for node in &self.nodes {
            for (t, s) in total.iter_mut().zip(&node.skills) {
                *t += s;
            }
        }
        total
    }

    pub fn check_nskills(&self, nskills: usize) -> Result<()> {
        match self.nodes.iter().find(|n| n.skills.len() != nskills) {
            Some(node) => Err(EngineError::Graph(format!(
                "node {} has {} skills, expected {}",
                node.id,
                node.skills.len(),
                nskills
            ))),
            None => Ok(()),
        }
    }
}
