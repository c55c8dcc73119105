use super::{Actor, Agent, Group};
use crate::error::{EngineError, Phase, Result};
use crate::graph::{EdgeData, SocialGraph};
use crate::ids::{AgentId, Candidate, GroupId};
use crate::payoff::PayoffModel;
use rand::Rng;
use rand_distr::{Distribution, Triangular};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Arena holding every agent and group of a run.
///
/// Agents and groups are indexed by id. There is one group slot per agent
/// (group ids are founder ids), so emptied groups stay around and can be
/// reused as landing spots for expelled members.
#[derive(Debug)]
pub struct Population {
    nskills: usize,
    agents: Vec<Agent>,
    groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub skills: Vec<i32>,
    pub group: GroupId,
    pub switches: u32,
    pub pay: f64,
    pub neighbors: Vec<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub members: Vec<AgentId>,
    pub skills: Vec<i32>,
    pub pay: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub agents: Vec<AgentSnapshot>,
    pub groups: Vec<GroupSnapshot>,
}

impl Population {
    /// Agents must be ordered by id starting from zero.
    pub fn new(nskills: usize, agents: Vec<Agent>, graph: &SocialGraph, payoff: &PayoffModel) -> Result<Self> {
        for (i, agent) in agents.iter().enumerate() {
            if agent.id().index() != i {
                return Err(EngineError::config(
                    Phase::Setup,
                    format!("agent at slot {} has id {}", i, agent.id()),
                ));
            }
            if agent.skills().len() != nskills {
                return Err(EngineError::config(
                    Phase::Setup,
                    format!("agent {} has {} skills, expected {}", agent.id(), agent.skills().len(), nskills),
                ));
            }
            if !graph.contains(agent.id()) {
                return Err(EngineError::Graph(format!("agent {} is not a graph node", agent.id())));
            }
        }

        let mut population = Self {
            nskills,
            agents,
            groups: Vec::new(),
        };
        for agent in &mut population.agents {
            agent.refresh_neighbors(graph);
        }
        population.init_groups(payoff);
        Ok(population)
    }

    /// Every agent back into its own singleton group.
    pub(crate) fn init_groups(&mut self, payoff: &PayoffModel) {
        let nskills = self.nskills;
        self.groups = self
            .agents
            .iter()
            .map(|a| Group::new(GroupId::founded_by(a.id()), nskills))
            .collect();
        for i in 0..self.agents.len() {
            let id = self.agents[i].id();
            self.add(GroupId::founded_by(id), id);
        }
        self.refresh_all(payoff);
    }

    fn add(&mut self, group: GroupId, agent: AgentId) {
        let member = &mut self.agents[agent.index()];
        self.groups[group.index()].add(agent, member.skills());
        member.set_group(group);
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn nskills(&self) -> usize {
        self.nskills
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn agent(&self, id: AgentId) -> &Agent {
        &self.agents[id.index()]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.index()]
    }

    pub fn group_of(&self, id: AgentId) -> &Group {
        self.group(self.agent(id).group())
    }

    pub(crate) fn agent_mut(&mut self, id: AgentId) -> &mut Agent {
        &mut self.agents[id.index()]
    }

    pub(crate) fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn actor(&self, candidate: Candidate) -> &dyn Actor {
        match candidate {
            Candidate::Agent(id) => self.agent(id),
            Candidate::Group(id) => self.group(id),
        }
    }

    pub fn occupied_groups(&self) -> impl Iterator<Item = &Group> + '_ {
        self.groups.iter().filter(|g| !g.is_empty())
    }

    pub fn empty_groups(&self) -> Vec<GroupId> {
        self.groups.iter().filter(|g| g.is_empty()).map(|g| g.id()).collect()
    }

    /// Distinct groups reachable over one edge, excluding the agent's own.
    pub fn neighbor_groups(&self, id: AgentId) -> BTreeSet<GroupId> {
        let own = self.agent(id).group();
        self.agent(id)
            .neighbors()
            .iter()
            .map(|n| self.agent(*n).group())
            .filter(|g| *g != own)
            .collect()
    }

    pub fn group_neighbor_groups(&self, group: GroupId) -> BTreeSet<GroupId> {
        let mut out = BTreeSet::new();
        for member in self.group(group).agents() {
            out.extend(self.neighbor_groups(*member));
        }
        out.remove(&group);
        out
    }

    /// Group id per agent, in agent order.
    pub fn assignment(&self) -> Vec<GroupId> {
        self.agents.iter().map(|a| a.group()).collect()
    }

    /// Moves `agent` into `to`, keeping both groups' cached skills and pay
    /// current. Returns the group it left.
    pub(crate) fn switch_group(&mut self, agent: AgentId, to: GroupId, payoff: &PayoffModel) -> GroupId {
        let from = self.agents[agent.index()].group();
        if from == to {
            return from;
        }
        let member = &mut self.agents[agent.index()];
        self.groups[from.index()].remove(agent, member.skills());
        self.groups[to.index()].add(agent, member.skills());
        member.set_group(to);
        member.count_switch();
        self.refresh(from, payoff);
        self.refresh(to, payoff);
        from
    }

    /// Moves every member of `from` into `into`.
    pub(crate) fn merge(&mut self, from: GroupId, into: GroupId, payoff: &PayoffModel) -> Vec<AgentId> {
        let mut moved = Vec::new();
        while let Some(last) = self.group(from).agents().last().copied() {
            self.switch_group(last, into, payoff);
            moved.push(last);
        }
        moved
    }

    pub(crate) fn refresh(&mut self, group: GroupId, payoff: &PayoffModel) {
        let g = &self.groups[group.index()];
        let pays: Vec<(usize, f64)> = g
            .agents()
            .iter()
            .map(|a| (a.index(), payoff.member_pay(&self.agents[a.index()], g)))
            .collect();
        let group_pay = payoff.group_pay(g, g.agents().iter().map(|a| &self.agents[a.index()]));
        for (i, pay) in pays {
            self.agents[i].set_pay(pay);
        }
        self.groups[group.index()].set_pay(group_pay);
    }

    pub(crate) fn refresh_all(&mut self, payoff: &PayoffModel) {
        for i in 0..self.groups.len() {
            self.refresh(GroupId::new(i as u32), payoff);
        }
    }

    pub(crate) fn take_application(&mut self, group: GroupId, candidate: Candidate) {
        self.groups[group.index()].take_application(candidate);
    }

    pub(crate) fn take_applications(&mut self, group: GroupId) -> Vec<Candidate> {
        self.groups[group.index()].take_applications()
    }

    pub(crate) fn notify_accept(&mut self, candidate: Candidate, group: GroupId) {
        match candidate {
            Candidate::Agent(id) => self.agents[id.index()].push_acceptance(group),
            Candidate::Group(id) => self.groups[id.index()].push_acceptance(group),
        }
    }

    pub(crate) fn take_acceptances(&mut self, agent: AgentId) -> Vec<GroupId> {
        self.agents[agent.index()].take_acceptances()
    }

    pub(crate) fn take_group_acceptances(&mut self, group: GroupId) -> Vec<GroupId> {
        self.groups[group.index()].take_acceptances()
    }

    pub(crate) fn clear_mailboxes(&mut self) {
        for group in &mut self.groups {
            group.take_applications();
            group.take_acceptances();
        }
        for agent in &mut self.agents {
            agent.take_acceptances();
        }
    }

    /// Links a newcomer to every other member of its group.
    pub(crate) fn fully_connect(&mut self, agent: AgentId, graph: &mut SocialGraph) {
        let group = self.agent(agent).group();
        let mates: Vec<AgentId> = self.group(group).agents().iter().copied().filter(|a| *a != agent).collect();
        for mate in mates {
            graph.add_edge(mate, agent, EdgeData::default());
            self.agents[mate.index()].add_neighbor(agent);
            self.agents[agent.index()].add_neighbor(mate);
        }
    }

    /// Opinions of neighbours: `Triangular(1, range, 1)` raised to +1 or -1.
    pub(crate) fn assign_biases<R: Rng + ?Sized>(&mut self, range: f64, rng: &mut R) -> Result<()> {
        let tri = Triangular::new(1.0, range.max(1.0), 1.0)
            .map_err(|e| EngineError::config(Phase::Setup, e.to_string()))?;
        for agent in &mut self.agents {
            let neighbors: Vec<AgentId> = agent.neighbors().iter().copied().collect();
            for n in neighbors {
                let bias: f64 = tri.sample(rng);
                let exp = if rng.r#gen::<bool>() { 1.0 } else { -1.0 };
                agent.set_bias(n, bias.powf(exp));
            }
        }
        Ok(())
    }

    /// Clears per-round state. Without `keep_teams` everyone goes back to a
    /// singleton group.
    pub(crate) fn reset(&mut self, graph: &SocialGraph, keep_teams: bool, payoff: &PayoffModel) {
        for agent in &mut self.agents {
            agent.reset(graph);
        }
        if keep_teams {
            self.clear_mailboxes();
            self.refresh_all(payoff);
        } else {
            for group in &mut self.groups {
                group.clear();
            }
            self.init_groups(payoff);
        }
    }

    /// Writes membership, switches and pay back onto the graph nodes.
    pub fn write_back(&self, graph: &mut SocialGraph) {
        for agent in &self.agents {
            let node = graph.node_mut(agent.id());
            node.skills = agent.skills().as_slice().to_vec();
            node.group = Some(agent.group());
            node.switches = agent.switches();
            node.pay = agent.current_pay();
            node.kind = agent.kind();
        }
    }

    /// Every broken membership or skill-sum invariant, as text.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = vec![0usize; self.agents.len()];
        for group in &self.groups {
            let mut sum = vec![0; self.nskills];
            for member in group.agents() {
                seen[member.index()] += 1;
                let agent = self.agent(*member);
                if agent.group() != group.id() {
                    problems.push(format!(
                        "group {} lists agent {} whose group is {}",
                        group.id(),
                        member,
                        agent.group()
                    ));
                }
                for (t, s) in sum.iter_mut().zip(agent.skills().as_slice()) {
                    *t += s;
                }
            }
            if group.skills().as_slice() != sum.as_slice() {
                problems.push(format!(
                    "group {} caches skills {:?} but members sum to {:?}",
                    group.id(),
                    group.skills(),
                    sum
                ));
            }
        }
        for agent in &self.agents {
            if !self.group(agent.group()).contains(agent.id()) {
                problems.push(format!("agent {} missing from group {}", agent.id(), agent.group()));
            }
            if seen[agent.id().index()] != 1 {
                problems.push(format!(
                    "agent {} appears in {} groups",
                    agent.id(),
                    seen[agent.id().index()]
                ));
            }
        }
        problems
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot {
            agents: self
                .agents
                .iter()
                .map(|a| AgentSnapshot {
                    id: a.id(),
                    skills: a.skills().as_slice().to_vec(),
                    group: a.group(),
                    switches: a.switches(),
                    pay: a.current_pay(),
                    neighbors: a.neighbors().iter().copied().collect(),
                })
                .collect(),
            groups: self
                .groups
                .iter()
                .map(|g| GroupSnapshot {
                    id: g.id(),
                    members: g.agents().to_vec(),
                    skills: g.skills().as_slice().to_vec(),
                    pay: g.current_pay(),
                })
                .collect(),
        }
    }
}
