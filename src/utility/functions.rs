use super::UtilityTuple;
use crate::graph::{EdgeData, SocialGraph};
use crate::ids::{AgentId, Candidate, GroupId};
use crate::model::{Actor, Population};
use crate::payoff::PayoffModel;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Family of utility functions used for joins, accept votes and merges.
///
/// All three put the payoff delta first and a random jitter last. `weighted`
/// and `bias` add a tie-strength dimension taken from the social graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtilityKind {
    #[default]
    Random,
    Weighted,
    Bias,
}

/// Read-only state every utility function looks at.
#[derive(Clone, Copy)]
pub struct UtilityInputs<'a> {
    pub population: &'a Population,
    pub graph: &'a SocialGraph,
    pub payoff: &'a PayoffModel,
}

#[derive(Default)]
struct Ties {
    total: HashMap<GroupId, f64>,
    count: HashMap<GroupId, usize>,
}

impl Ties {
    fn add(&mut self, group: GroupId, value: f64) {
        *self.total.entry(group).or_insert(0.0) += value;
        *self.count.entry(group).or_insert(0) += 1;
    }

    fn total(&self, group: GroupId) -> f64 {
        self.total.get(&group).copied().unwrap_or(0.0)
    }

    fn mean(&self, group: GroupId) -> f64 {
        self.total(group) / self.count.get(&group).copied().unwrap_or(0).max(1) as f64
    }
}

fn edge_value(kind: UtilityKind, edge: &EdgeData) -> f64 {
    match kind {
        UtilityKind::Bias => edge.bias,
        _ => edge.weight,
    }
}

// Tie strength from `agent` to each group its neighbours are in.
fn agent_ties(kind: UtilityKind, inputs: &UtilityInputs<'_>, agent: AgentId) -> Ties {
    let mut ties = Ties::default();
    for (nbr, edge) in inputs.graph.neighbors(agent) {
        ties.add(inputs.population.agent(nbr).group(), edge_value(kind, edge));
    }
    ties
}

// Tie strength between the members of `group` and the members of `other`.
fn boundary(kind: UtilityKind, inputs: &UtilityInputs<'_>, group: GroupId, other: &[AgentId]) -> (f64, usize) {
    let mut total = 0.0;
    let mut count = 0;
    for member in inputs.population.group(group).agents() {
        for v in other {
            if let Some(edge) = inputs.graph.edge(*member, *v) {
                total += edge_value(kind, edge);
                count += 1;
            }
        }
    }
    (total, count)
}

fn members_of(inputs: &UtilityInputs<'_>, candidate: Candidate) -> Vec<AgentId> {
    match candidate {
        Candidate::Agent(id) => vec![id],
        Candidate::Group(id) => inputs.population.group(id).agents().to_vec(),
    }
}

impl UtilityKind {
    /// Options for an agent holding acceptances:
    /// `(Δpay, [tie Δ], Δsize, jitter - 0.5, group)`.
    pub fn agent_join<R: Rng + ?Sized>(
        self,
        inputs: &UtilityInputs<'_>,
        agent: AgentId,
        acceptances: &[GroupId],
        rng: &mut R,
    ) -> Vec<UtilityTuple<GroupId>> {
        let pop = inputs.population;
        let me = pop.agent(agent);
        let own = pop.group(me.group());
        let now_pay = me.current_pay();
        let now_size = own.size() as f64;
        let ties = (self != UtilityKind::Random).then(|| agent_ties(self, inputs, agent));

        acceptances
            .iter()
            .map(|gid| {
                let g = pop.group(*gid);
                let mut dims = vec![inputs.payoff.projected_join_pay(me, g) - now_pay];
                if let Some(ties) = &ties {
                    dims.push(match self {
                        UtilityKind::Bias => ties.mean(*gid) - ties.mean(own.id()),
                        _ => ties.total(*gid) - ties.total(own.id()),
                    });
                }
                dims.push(g.size() as f64 - now_size);
                dims.push(rng.r#gen::<f64>() - 0.5);
                UtilityTuple::new(dims, *gid)
            })
            .collect()
    }

    /// Options for a member voting on applicants to its group:
    /// `(Δpay, [tie - 0.99 | mean bias], jitter, candidate)`.
    ///
    /// The jitter is non-negative, so an applicant that leaves pay unchanged
    /// is still accepted.
    pub fn group_accept<R: Rng + ?Sized>(
        self,
        inputs: &UtilityInputs<'_>,
        group: GroupId,
        applicants: &[Candidate],
        rng: &mut R,
    ) -> Vec<UtilityTuple<Candidate>> {
        let g = inputs.population.group(group);
        let now_pay = g.current_pay();
        applicants
            .iter()
            .map(|c| {
                let actor = inputs.population.actor(*c);
                let mut dims = vec![inputs.payoff.projected_merge_pay(g, actor) - now_pay];
                match self {
                    UtilityKind::Random => {}
                    UtilityKind::Weighted => {
                        let (total, _) = boundary(self, inputs, group, &members_of(inputs, *c));
                        dims.push(total - 0.99);
                    }
                    UtilityKind::Bias => {
                        let (total, count) = boundary(self, inputs, group, &members_of(inputs, *c));
                        dims.push(total / count.max(1) as f64);
                    }
                }
                dims.push(rng.r#gen::<f64>());
                UtilityTuple::new(dims, *c)
            })
            .collect()
    }

    /// Options for a group holding merge acceptances:
    /// `(Δpay, [tie - 0.99 | mean bias], jitter - 1, group)`.
    ///
    /// The jitter is negative, so equal pay never triggers a merge.
    pub fn group_merge<R: Rng + ?Sized>(
        self,
        inputs: &UtilityInputs<'_>,
        group: GroupId,
        acceptances: &[GroupId],
        rng: &mut R,
    ) -> Vec<UtilityTuple<GroupId>> {
        let pop = inputs.population;
        let g = pop.group(group);
        let now_pay = g.current_pay();
        acceptances
            .iter()
            .map(|other| {
                let target = pop.group(*other);
                let mut dims = vec![inputs.payoff.projected_merge_pay(target, g) - now_pay];
                match self {
                    UtilityKind::Random => {}
                    UtilityKind::Weighted => {
                        let (total, _) = boundary(self, inputs, group, target.agents());
                        dims.push(total - 0.99);
                    }
                    UtilityKind::Bias => {
                        let (total, count) = boundary(self, inputs, group, target.agents());
                        dims.push(total / count.max(1) as f64);
                    }
                }
                dims.push(rng.r#gen::<f64>() - 1.0);
                UtilityTuple::new(dims, *other)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::model::{Agent, Skills};
    use crate::payoff::TaskConfig;
    use crate::strategies::passive::Passive;
    use crate::utility::deterministic;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn world(n: usize) -> (Population, SocialGraph, PayoffModel) {
        let graph = SocialGraph::complete(n, n);
        let payoff = PayoffModel::new(&TaskConfig::default(), n, false);
        let agents = (0..n)
            .map(|i| {
                Agent::new(
                    AgentId::new(i as u32),
                    Skills::unit(n, i),
                    NodeKind::Greedy,
                    Box::new(Passive::new()),
                )
            })
            .collect();
        let pop = Population::new(n, agents, &graph, &payoff).unwrap();
        (pop, graph, payoff)
    }

    #[test]
    fn join_prefers_higher_pay() {
        let (mut pop, graph, payoff) = world(4);
        pop.switch_group(AgentId::new(2), GroupId::new(1), &payoff);
        let inputs = UtilityInputs { population: &pop, graph: &graph, payoff: &payoff };
        let mut rng = StdRng::seed_from_u64(2);
        let options = [GroupId::new(1), GroupId::new(3)];
        let tuples = UtilityKind::Random.agent_join(&inputs, AgentId::new(0), &options, &mut rng);
        assert_eq!(tuples.len(), 2);
        // joining {1,2} gives 30/3 = 10, joining {3} gives 10/2 = 5
        assert_eq!(tuples[0].dims[0], 10.0);
        assert_eq!(tuples[1].dims[0], 5.0);
        assert_eq!(deterministic(&tuples), Some(GroupId::new(1)));
    }

    #[test]
    fn weighted_accept_needs_a_tie() {
        let (pop, mut graph, payoff) = world(3);
        graph.remove_edge(AgentId::new(0), AgentId::new(2));
        let inputs = UtilityInputs { population: &pop, graph: &graph, payoff: &payoff };
        let mut rng = StdRng::seed_from_u64(4);
        let applicants = [Candidate::Agent(AgentId::new(1)), Candidate::Agent(AgentId::new(2))];
        let tuples = UtilityKind::Weighted.group_accept(&inputs, GroupId::new(0), &applicants, &mut rng);
        assert!((tuples[0].dims[1] - 0.01).abs() < 1e-9);
        assert!((tuples[1].dims[1] + 0.99).abs() < 1e-9);
        assert!(tuples.iter().all(|t| t.dims.len() == 3));
    }

    #[test]
    fn merge_jitter_is_negative() {
        let (mut pop, graph, payoff) = world(4);
        pop.switch_group(AgentId::new(1), GroupId::new(0), &payoff);
        pop.switch_group(AgentId::new(3), GroupId::new(2), &payoff);
        let inputs = UtilityInputs { population: &pop, graph: &graph, payoff: &payoff };
        let mut rng = StdRng::seed_from_u64(9);
        let tuples = UtilityKind::Random.group_merge(&inputs, GroupId::new(0), &[GroupId::new(2)], &mut rng);
        assert_eq!(tuples[0].dims[0], 15.0 - 5.0);
        assert!(tuples[0].dims[1] < 0.0);
    }
}
