// Graph builders for runs that don't bring their own topology.

use super::{EdgeData, SocialGraph};
use crate::error::{EngineError, Result};
use crate::ids::AgentId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Triangular};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MAX_TRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GraphKind {
    Complete,
    Cycle,
    Path,
    Star,
    Wheel,
    RandomCycle,
    RandomCycle4,
    ConnectedWattsStrogatz,
    Gnm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub kind: GraphKind,
    pub connections: usize,
    pub max_connections: usize,
    pub prob_rewire: f64,
    pub directed: bool,
    pub seed: Option<u64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            kind: GraphKind::ConnectedWattsStrogatz,
            connections: 5,
            max_connections: 8,
            prob_rewire: 0.25,
            directed: false,
            seed: None,
        }
    }
}

fn id(i: usize) -> AgentId {
    AgentId::new(i as u32)
}

/// Build a topology, retrying random kinds until the result is connected
/// and no node has more than `max_connections` neighbours.
pub fn generate(cfg: &GraphConfig, n: usize, nskills: usize, rng: &mut StdRng) -> Result<SocialGraph> {
    let mut seeded;
    let rng = match cfg.seed {
        Some(seed) => {
            seeded = StdRng::seed_from_u64(seed);
            &mut seeded
        }
        None => rng,
    };

    for attempt in 0..MAX_TRIES {
        let graph = build(cfg, n, nskills, rng);
        let connected = graph.is_connected();
        let crowded: Vec<usize> = if cfg.kind == GraphKind::Complete {
            Vec::new()
        } else {
            graph
                .ids()
                .map(|u| graph.degree(u))
                .filter(|d| *d > cfg.max_connections)
                .collect()
        };
        if !crowded.is_empty() {
            debug!("Too many edges on attempt {}: {:?}", attempt, crowded);
        }
        if connected && crowded.is_empty() {
            return Ok(if cfg.directed { graph.into_directed() } else { graph });
        }
    }

    warn!("Gave up building a {:?} graph for {} nodes", cfg.kind, n);
    Err(EngineError::Graph(
        "could not create valid graph; maximum number of tries exceeded".to_string(),
    ))
}

fn build(cfg: &GraphConfig, n: usize, nskills: usize, rng: &mut StdRng) -> SocialGraph {
    match cfg.kind {
        GraphKind::Complete => SocialGraph::complete(n, nskills),
        GraphKind::Cycle => ring(&(0..n).collect::<Vec<_>>(), nskills, 1),
        GraphKind::Path => {
            let mut g = SocialGraph::new(n, nskills);
            for i in 1..n {
                g.connect(id(i - 1), id(i));
            }
            g
        }
        GraphKind::Star => {
            let mut g = SocialGraph::new(n, nskills);
            for i in 1..n {
                g.connect(id(0), id(i));
            }
            g
        }
        GraphKind::Wheel => {
            let mut g = SocialGraph::new(n, nskills);
            for i in 1..n {
                g.connect(id(0), id(i));
                if i + 1 < n {
                    g.connect(id(i), id(i + 1));
                }
            }
            if n > 3 {
                g.connect(id(n - 1), id(1));
            }
            g
        }
        GraphKind::RandomCycle => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            ring(&order, nskills, 1)
        }
        GraphKind::RandomCycle4 => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            ring(&order, nskills, 2)
        }
        GraphKind::ConnectedWattsStrogatz => watts_strogatz(n, nskills, cfg.connections, cfg.prob_rewire, rng),
        GraphKind::Gnm => {
            let target = (cfg.connections / 2) * n;
            gnm(n, nskills, target, rng)
        }
    }
}

// Each node linked to the next `reach` nodes around the ring.
fn ring(order: &[usize], nskills: usize, reach: usize) -> SocialGraph {
    let n = order.len();
    let mut g = SocialGraph::new(n, nskills);
    if n < 2 {
        return g;
    }
    for i in 0..n {
        for step in 1..=reach {
            g.connect(id(order[i]), id(order[(i + step) % n]));
        }
    }
    g
}

fn watts_strogatz(n: usize, nskills: usize, k: usize, p: f64, rng: &mut StdRng) -> SocialGraph {
    let half = (k / 2).max(1);
    let mut g = SocialGraph::new(n, nskills);
    if n < 2 {
        return g;
    }
    for step in 1..=half {
        for u in 0..n {
            g.connect(id(u), id((u + step) % n));
        }
    }
    if n <= half + 1 {
        return g;
    }
    for step in 1..=half {
        for u in 0..n {
            let v = (u + step) % n;
            if rng.r#gen::<f64>() >= p || !g.has_edge(id(u), id(v)) {
                continue;
            }
            let mut w = rng.gen_range(0..n);
            let mut guard = 0;
            while w == u || g.has_edge(id(u), id(w)) {
                w = rng.gen_range(0..n);
                guard += 1;
                if guard > n * 4 {
                    break;
                }
            }
            if w != u && !g.has_edge(id(u), id(w)) {
                g.remove_edge(id(u), id(v));
                g.connect(id(u), id(w));
            }
        }
    }
    g
}

fn gnm(n: usize, nskills: usize, m: usize, rng: &mut StdRng) -> SocialGraph {
    let mut g = SocialGraph::new(n, nskills);
    let max_edges = n * n.saturating_sub(1) / 2;
    let m = m.min(max_edges);
    let mut placed = 0;
    while placed < m {
        let u = rng.gen_range(0..n);
        let v = rng.gen_range(0..n);
        if u != v && !g.has_edge(id(u), id(v)) {
            g.connect(id(u), id(v));
            placed += 1;
        }
    }
    g
}

/// Give every node `lev` distinct skills, `lev` drawn from 1..=min(nskills, maxskills).
pub fn assign_skills(graph: &mut SocialGraph, nskills: usize, maxskills: usize, rng: &mut StdRng) {
    let top = nskills.min(maxskills).max(1);
    let ids: Vec<AgentId> = graph.ids().collect();
    for u in ids {
        let lev = rng.gen_range(1..=top);
        let mut skills: Vec<i32> = (0..nskills).map(|i| i32::from(i < lev)).collect();
        skills.shuffle(rng);
        graph.set_skills(u, skills);
    }
    debug!("Total skills: {:?}", graph.total_skills());
}

pub fn assign_edge_biases(graph: &mut SocialGraph, rng: &mut StdRng) -> Result<()> {
    let tri = Triangular::new(-2.0, 2.0, 0.0).map_err(|e| EngineError::Graph(e.to_string()))?;
    for (u, v, _) in graph.edges() {
        let data = EdgeData {
            weight: 1.0,
            bias: tri.sample(rng),
        };
        graph.add_edge(u, v, data);
    }
    Ok(())
}
