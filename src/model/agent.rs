use super::{Actor, Skills};
use crate::graph::{NodeKind, SocialGraph};
use crate::ids::{AgentId, Candidate, GroupId};
use crate::strategies::{Disposition, Strategy};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One participant. Decisions are delegated to the owned strategy; the
/// population keeps the membership fields consistent.
pub struct Agent {
    id: AgentId,
    skills: Skills,
    group: GroupId,
    neighbors: BTreeSet<AgentId>,
    switches: u32,
    current_pay: f64,
    acceptances: Vec<GroupId>,
    bias: BTreeMap<AgentId, f64>,
    kind: NodeKind,
    disposition: Option<Disposition>,
    slow: bool,
    strategy: Mutex<Box<dyn Strategy>>,
}

impl Agent {
    pub fn new(id: AgentId, skills: Skills, kind: NodeKind, strategy: Box<dyn Strategy>) -> Self {
        let slow = strategy.is_slow();
        Self {
            id,
            skills,
            group: GroupId::founded_by(id),
            neighbors: BTreeSet::new(),
            switches: 0,
            current_pay: 0.0,
            acceptances: Vec::new(),
            bias: BTreeMap::new(),
            kind,
            disposition: None,
            slow,
            strategy: Mutex::new(strategy),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn neighbors(&self) -> &BTreeSet<AgentId> {
        &self.neighbors
    }

    pub fn switches(&self) -> u32 {
        self.switches
    }

    pub fn acceptances(&self) -> &[GroupId] {
        &self.acceptances
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Slow agents may block on outside input and get their own worker thread.
    pub fn is_slow(&self) -> bool {
        self.slow
    }

    pub fn is_human(&self) -> bool {
        self.kind == NodeKind::Human
    }

    pub fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    pub fn strategy_name(&self) -> String {
        self.strategy.lock().name().to_string()
    }

    /// This agent's opinion of `other`; 1.0 when it has none.
    pub fn bias_toward(&self, other: AgentId) -> f64 {
        self.bias.get(&other).copied().unwrap_or(1.0)
    }

    /// Mean opinion of a list of agents.
    pub fn bias_avg(&self, agents: &[AgentId]) -> f64 {
        if agents.is_empty() {
            return 1.0;
        }
        agents.iter().map(|a| self.bias_toward(*a)).sum::<f64>() / agents.len() as f64
    }

    pub(crate) fn strategy(&self) -> MutexGuard<'_, Box<dyn Strategy>> {
        self.strategy.lock()
    }

    pub(crate) fn strategy_mut(&mut self) -> &mut Box<dyn Strategy> {
        self.strategy.get_mut()
    }

    pub(crate) fn set_group(&mut self, group: GroupId) {
        self.group = group;
    }

    pub(crate) fn count_switch(&mut self) {
        self.switches += 1;
    }

    pub(crate) fn set_pay(&mut self, pay: f64) {
        self.current_pay = pay;
    }

    pub(crate) fn push_acceptance(&mut self, group: GroupId) {
        self.acceptances.push(group);
    }

    pub(crate) fn take_acceptances(&mut self) -> Vec<GroupId> {
        std::mem::take(&mut self.acceptances)
    }

    pub(crate) fn set_disposition(&mut self, disposition: Disposition) {
        self.disposition = Some(disposition);
    }

    pub(crate) fn set_bias(&mut self, other: AgentId, bias: f64) {
        self.bias.insert(other, bias);
    }

    pub(crate) fn add_neighbor(&mut self, other: AgentId) {
        if other != self.id {
            self.neighbors.insert(other);
        }
    }

    pub(crate) fn refresh_neighbors(&mut self, graph: &SocialGraph) {
        self.neighbors = graph.neighbors(self.id).map(|(v, _)| v).collect();
    }

    /// Clears per-round state. Group membership is handled by the population.
    pub(crate) fn reset(&mut self, graph: &SocialGraph) {
        self.acceptances.clear();
        self.switches = 0;
        self.current_pay = 0.0;
        self.refresh_neighbors(graph);
        self.strategy.get_mut().reset();
    }
}

impl Actor for Agent {
    fn candidate(&self) -> Candidate {
        Candidate::Agent(self.id)
    }

    fn skills(&self) -> &Skills {
        &self.skills
    }

    fn size(&self) -> usize {
        1
    }

    fn current_pay(&self) -> f64 {
        self.current_pay
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("skills", &self.skills)
            .field("group", &self.group)
            .field("switches", &self.switches)
            .field("current_pay", &self.current_pay)
            .field("kind", &self.kind)
            .field("slow", &self.slow)
            .finish_non_exhaustive()
    }
}
