use super::{DecisionView, Disposition, OfferProfile, Strategy, StrategyParams};
use crate::error::{Phase, Result};
use crate::ids::{AgentId, Candidate, GroupId};
use crate::model::Actor;
use crate::simulation::config::DelayConfig;
use crate::simulation::public_goods::{PotMultiplier, PublicGoodsOutcome};
use crate::utility::UtilityTuple;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::trace;

// Chance of posting a rating, indexed by the rating (1..=5).
const RATING_POST_PROBS: [f64; 6] = [1.0, 0.8, 0.5, 0.25, 0.5, 0.8];

/// Pay-maximising agent with a social memory.
///
/// Applies to neighbouring groups that would pay it more, votes for
/// applicants that raise pay and are remembered as good contributors, and
/// votes out members whose departure raises pay or who contribute less than
/// its own disposition would. Optional decision memory makes it give up on
/// proposals and votes that keep going nowhere.
#[derive(Debug)]
pub struct Greedy {
    rng: StdRng,
    delays: Option<DelayConfig>,
    disposition: Disposition,
    offers: OfferProfile,
    /// Remembered share of pay each agent put into the pot.
    contributions: BTreeMap<AgentId, f64>,
    global_ratings: BTreeMap<AgentId, f64>,
    propose_memory: HashMap<(GroupId, u64), u32>,
    vote_memory: HashMap<(Candidate, u64), u32>,
}

impl Greedy {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            rng: StdRng::seed_from_u64(params.agent_seed()),
            delays: params.delays.clone(),
            disposition: Disposition::Fair,
            offers: Disposition::Fair.offer_profile(),
            contributions: BTreeMap::new(),
            global_ratings: BTreeMap::new(),
            propose_memory: HashMap::new(),
            vote_memory: HashMap::new(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn remembered_contribution(&self, agent: AgentId) -> Option<f64> {
        self.contributions.get(&agent).copied()
    }

    fn pause(&mut self, phase: Phase) {
        let Some(delays) = &self.delays else {
            return;
        };
        let Some(delay) = delays.for_phase(phase) else {
            return;
        };
        let sampled = Normal::new(delay.mean_secs, delay.sd_secs.max(0.0))
            .map(|d| d.sample(&mut self.rng))
            .unwrap_or(delay.mean_secs);
        let secs = sampled.max(delays.min_secs) * delays.scale;
        if secs > 0.0 {
            trace!("Sleeping {:.2}s before {}", secs, phase);
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
    }

    fn keep_trying(&mut self, view: &DecisionView<'_>, repeats: u32) -> bool {
        let memory = &view.config.memory;
        repeats < memory.threshold || self.rng.r#gen::<f64>() < memory.decay.powi((repeats - memory.threshold) as i32)
    }

    /// Contribution band this agent holds itself and others to.
    fn band(&mut self, me: AgentId, view: &DecisionView<'_>) -> (f64, f64) {
        match self.disposition {
            Disposition::Conditional => {
                let own = self.contributions.get(&me).copied().unwrap_or(0.5);
                let jitter = (self.rng.r#gen::<f64>() - 0.5) * view.config.public_goods.conditional_variance;
                (own + jitter, own + jitter)
            }
            d => d.contribution_range(&view.config.public_goods.contrib_ranges),
        }
    }

    // Memory of an agent, else its global rating scaled to 0..1.
    fn reputation(&self, agent: AgentId) -> f64 {
        self.contributions
            .get(&agent)
            .copied()
            .unwrap_or_else(|| (self.global_ratings.get(&agent).copied().unwrap_or(1.0) - 1.0) / 4.0)
    }

    fn candidate_reputation(&self, view: &DecisionView<'_>, candidate: Candidate) -> f64 {
        match candidate {
            Candidate::Agent(id) => self.reputation(id),
            Candidate::Group(id) => {
                let members = view.population.group(id).agents();
                if members.is_empty() {
                    return 0.0;
                }
                members.iter().map(|m| self.reputation(*m)).sum::<f64>() / members.len() as f64
            }
        }
    }
}

impl Strategy for Greedy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn is_slow(&self) -> bool {
        self.delays.is_some()
    }

    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        self.pause(Phase::Propose);
        let pop = view.population;
        let agent = pop.agent(me);
        let now_pay = agent.current_pay();

        let mut ties: HashMap<GroupId, f64> = HashMap::new();
        for (nbr, edge) in view.graph.neighbors(me) {
            *ties.entry(pop.agent(nbr).group()).or_insert(0.0) += edge.weight;
        }

        let mut picks = Vec::new();
        for gid in pop.neighbor_groups(me) {
            let pay = view.payoff.projected_join_pay(agent, pop.group(gid));
            if view.payoff.is_biased() {
                if pay >= now_pay {
                    picks.push(gid);
                }
                continue;
            }
            if pay <= now_pay || ties.get(&gid).copied().unwrap_or(0.0) < 1.0 {
                continue;
            }
            if view.config.memory.enabled {
                let key = (gid, pay.to_bits());
                let repeats = self.propose_memory.get(&key).copied().unwrap_or(0);
                if !self.keep_trying(view, repeats) {
                    continue;
                }
                *self.propose_memory.entry(key).or_insert(0) += 1;
            }
            picks.push(gid);
        }
        Ok(picks)
    }

    fn acceptvote(
        &mut self,
        me: AgentId,
        view: &DecisionView<'_>,
        applicants: &[Candidate],
    ) -> Result<Option<Candidate>> {
        self.pause(Phase::AcceptVote);
        let pop = view.population;
        let group = pop.group_of(me);
        let now_pay = pop.agent(me).current_pay();

        let mut tuples = if view.config.social_sim_agents {
            let (low, _) = self.band(me, view);
            let mut tuples = Vec::with_capacity(applicants.len());
            for c in applicants {
                let gain = view.payoff.projected_merge_pay(group, pop.actor(*c)) - now_pay;
                let standing = self.candidate_reputation(view, *c) - low;
                tuples.push(UtilityTuple::new(vec![gain, standing, self.rng.r#gen::<f64>()], *c));
            }
            tuples
        } else {
            view.config
                .utility
                .group_accept(&view.utility_inputs(), group.id(), applicants, &mut self.rng)
        };

        if view.config.memory.enabled {
            let mut kept = Vec::with_capacity(tuples.len());
            for t in tuples {
                let repeats = self.vote_memory.get(&(t.option, t.dims[0].to_bits())).copied().unwrap_or(0);
                if self.keep_trying(view, repeats) {
                    kept.push(t);
                }
            }
            tuples = kept;
            if tuples.is_empty() {
                return Ok(None);
            }
        }

        let pick = view.config.tiebreak.select(&tuples, &mut self.rng);
        if let Some(choice) = pick {
            if view.config.memory.enabled {
                if let Some(t) = tuples.iter().find(|t| t.option == choice) {
                    *self.vote_memory.entry((choice, t.dims[0].to_bits())).or_insert(0) += 1;
                }
            }
        }
        Ok(pick)
    }

    fn consider(&mut self, me: AgentId, view: &DecisionView<'_>, acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        if acceptances.is_empty() {
            return Ok(None);
        }
        self.pause(Phase::Join);
        let tuples = view
            .config
            .utility
            .agent_join(&view.utility_inputs(), me, acceptances, &mut self.rng);
        Ok(view.config.tiebreak.select(&tuples, &mut self.rng))
    }

    fn expelvote(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        self.pause(Phase::Expel);
        let pop = view.population;
        let group = pop.group_of(me);
        let now_pay = pop.agent(me).current_pay();
        let others: Vec<AgentId> = group.agents().iter().copied().filter(|a| *a != me).collect();

        let tuples = if view.config.social_sim_agents {
            let (low, high) = self.band(me, view);
            others
                .iter()
                .map(|m| {
                    let gain = (view.payoff.pay_without(group, pop.agent(*m)) - now_pay).max(0.0);
                    let remembered = self.contributions.get(m).copied().unwrap_or(high);
                    let shortfall = (low + high) * 0.5 - remembered - self.rng.r#gen::<f64>();
                    UtilityTuple::new(vec![gain, shortfall], *m)
                })
                .collect::<Vec<_>>()
        } else {
            others
                .iter()
                .map(|m| {
                    let gain = view.payoff.pay_without(group, pop.agent(*m)) - now_pay;
                    UtilityTuple::new(vec![gain, self.rng.r#gen::<f64>()], *m)
                })
                .collect()
        };
        Ok(view.config.tiebreak.select(&tuples, &mut self.rng))
    }

    fn publicgoods(
        &mut self,
        me: AgentId,
        view: &DecisionView<'_>,
        stake: u32,
        _multiplier: PotMultiplier,
    ) -> Result<u32> {
        self.pause(Phase::PublicGoods);
        let contribution = match self.disposition {
            Disposition::Conditional => {
                let others: Vec<f64> = view
                    .population
                    .group_of(me)
                    .agents()
                    .iter()
                    .filter(|a| **a != me)
                    .filter_map(|a| self.contributions.get(a).copied())
                    .collect();
                let share = if others.is_empty() {
                    self.rng.r#gen::<f64>()
                } else {
                    let mean = others.iter().sum::<f64>() / others.len() as f64;
                    let jitter = (self.rng.r#gen::<f64>() - 0.5) * view.config.public_goods.conditional_variance;
                    (mean + jitter).clamp(0.0, 1.0)
                };
                (share * f64::from(stake)).round() as u32
            }
            d => {
                let (low, high) = d.contribution_range(&view.config.public_goods.contrib_ranges);
                let low = (low * f64::from(stake)) as u32;
                let high = ((high * f64::from(stake)) as u32).max(low);
                self.rng.gen_range(low..=high)
            }
        };
        Ok(contribution.min(stake))
    }

    fn publicgoods_postprocess(
        &mut self,
        _me: AgentId,
        view: &DecisionView<'_>,
        outcome: &PublicGoodsOutcome,
    ) -> Result<()> {
        if outcome.contribution.stake() == 0 {
            return Ok(());
        }
        let alpha = view.config.social_learning_rate;
        for (aid, c) in &outcome.team {
            let share = c.share();
            self.contributions
                .entry(*aid)
                .and_modify(|old| *old = alpha * share + (1.0 - alpha) * *old)
                .or_insert(share);
        }
        Ok(())
    }

    fn switched_group(&mut self, _me: AgentId, _to: GroupId) {
        self.propose_memory.clear();
        self.vote_memory.clear();
    }

    fn ratings(&mut self, me: AgentId) -> Result<BTreeMap<AgentId, u8>> {
        let mut out = BTreeMap::new();
        let remembered: Vec<(AgentId, f64)> = self.contributions.iter().map(|(a, c)| (*a, *c)).collect();
        for (aid, share) in remembered {
            if aid == me {
                continue;
            }
            let noise = self.rng.r#gen::<f64>() - 0.5;
            let rating = (share * 4.0 + 1.0 + noise).clamp(1.0, 5.0) as usize;
            if self.rng.r#gen::<f64>() < RATING_POST_PROBS[rating] {
                out.insert(aid, rating as u8);
            }
        }
        Ok(out)
    }

    fn update_ratings(&mut self, _me: AgentId, global: &BTreeMap<AgentId, f64>) -> Result<()> {
        self.global_ratings = global.clone();
        Ok(())
    }

    fn set_disposition(&mut self, disposition: Disposition) {
        self.disposition = disposition;
        self.offers = disposition.offer_profile();
    }

    fn ask_for_offer(&mut self, _me: AgentId, _other: AgentId) -> Result<u8> {
        Ok(self.offers.offer(&mut self.rng))
    }

    fn decide_offer(&mut self, _me: AgentId, _other: AgentId, amount: u8) -> Result<bool> {
        Ok(self.offers.accepts(amount, &mut self.rng))
    }

    /// Decision memory is per round; contribution memory and ratings carry
    /// over.
    fn reset(&mut self) {
        self.propose_memory.clear();
        self.vote_memory.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, SocialGraph};
    use crate::model::{Agent, Population, Skills};
    use crate::payoff::{PayoffModel, TaskConfig};
    use crate::simulation::config::SimConfig;
    use crate::simulation::public_goods::Contribution;
    use crate::strategies::passive::Passive;

    struct World {
        pop: Population,
        graph: SocialGraph,
        payoff: PayoffModel,
        config: SimConfig,
    }

    impl World {
        fn new(n: usize) -> Self {
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
            let config = SimConfig::default().with_memory(false);
            Self { pop, graph, payoff, config }
        }

        fn view(&self) -> DecisionView<'_> {
            DecisionView {
                population: &self.pop,
                graph: &self.graph,
                payoff: &self.payoff,
                config: &self.config,
                round: 0,
                iteration: 0,
            }
        }
    }

    fn greedy(id: u32) -> Greedy {
        Greedy::new(&StrategyParams::new(AgentId::new(id), 11))
    }

    #[test]
    fn proposes_only_to_better_paying_groups() {
        let mut world = World::new(4);
        // agent 0 joins 1: both earn 5, a lone agent earns 0
        world.pop.switch_group(AgentId::new(0), GroupId::new(1), &world.payoff);
        let mut g = greedy(2);
        let picks = g.propose(AgentId::new(2), &world.view()).unwrap();
        // joining {0,1} pays 30/3 = 10; joining {3} pays 5; both beat 0
        assert_eq!(picks, vec![GroupId::new(1), GroupId::new(3)]);

        let mut g = greedy(0);
        // agent 0 earns 5; joining a singleton also pays 10/2 = 5
        assert!(g.propose(AgentId::new(0), &world.view()).unwrap().is_empty());
    }

    #[test]
    fn memory_gives_up_on_repeated_proposals() {
        let mut world = World::new(3);
        world.config.memory.enabled = true;
        world.config.memory.threshold = 1;
        world.config.memory.decay = 0.0;
        let mut g = greedy(0);
        // repeats below the threshold always go ahead, and decay^0 is 1
        for _ in 0..2 {
            assert_eq!(g.propose(AgentId::new(0), &world.view()).unwrap().len(), 2);
        }
        assert!(g.propose(AgentId::new(0), &world.view()).unwrap().is_empty());
        g.switched_group(AgentId::new(0), GroupId::new(1));
        assert_eq!(g.propose(AgentId::new(0), &world.view()).unwrap().len(), 2);
    }

    #[test]
    fn votes_for_the_applicant_that_raises_pay() {
        let mut world = World::new(4);
        world.config.social_sim_agents = false;
        let mut g = greedy(0);
        let applicants = [Candidate::Agent(AgentId::new(1)), Candidate::Agent(AgentId::new(2))];
        let pick = g.acceptvote(AgentId::new(0), &world.view(), &applicants).unwrap();
        assert!(pick.is_some());
    }

    #[test]
    fn expels_the_member_whose_absence_pays_more() {
        let mut world = World::new(3);
        world.config.social_sim_agents = false;
        // agents 0 and 1 share skill 0; 2 adds breadth
        world.pop = {
            let agents = vec![
                Agent::new(AgentId::new(0), Skills::from_vec(vec![1, 0, 0]), NodeKind::Greedy, Box::new(Passive)),
                Agent::new(AgentId::new(1), Skills::from_vec(vec![1, 0, 0]), NodeKind::Greedy, Box::new(Passive)),
                Agent::new(AgentId::new(2), Skills::from_vec(vec![0, 1, 0]), NodeKind::Greedy, Box::new(Passive)),
            ];
            Population::new(3, agents, &world.graph, &world.payoff).unwrap()
        };
        world.pop.switch_group(AgentId::new(1), GroupId::new(0), &world.payoff);
        world.pop.switch_group(AgentId::new(2), GroupId::new(0), &world.payoff);
        // with all three: task [2,1,0] = 10 + 10 = 20, 20/3 each
        // without 0 or without 1: [1,1,0] = 10, 5 each
        let mut g = greedy(2);
        assert_eq!(g.expelvote(AgentId::new(2), &world.view()).unwrap(), None);
    }

    #[test]
    fn postprocess_blends_remembered_contributions() {
        let world = World::new(2);
        let mut g = greedy(0);
        let mut team = BTreeMap::new();
        team.insert(AgentId::new(0), Contribution::new(5, 5));
        team.insert(AgentId::new(1), Contribution::new(0, 10));
        let outcome = PublicGoodsOutcome {
            group: GroupId::new(0),
            contribution: Contribution::new(5, 5),
            multiplier: 1.25,
            shared: 3.125,
            team: team.clone(),
        };
        g.publicgoods_postprocess(AgentId::new(0), &world.view(), &outcome).unwrap();
        assert_eq!(g.remembered_contribution(AgentId::new(1)), Some(0.0));

        team.insert(AgentId::new(1), Contribution::new(10, 0));
        let outcome = PublicGoodsOutcome { team, ..outcome };
        g.publicgoods_postprocess(AgentId::new(0), &world.view(), &outcome).unwrap();
        let blended = g.remembered_contribution(AgentId::new(1)).unwrap();
        assert!((blended - 0.66).abs() < 1e-9);
    }

    #[test]
    fn contributions_respect_disposition() {
        let world = World::new(2);
        let mut g = greedy(0);
        g.set_disposition(Disposition::Mean);
        for _ in 0..50 {
            let c = g
                .publicgoods(AgentId::new(0), &world.view(), 20, PotMultiplier::Flat(1.25))
                .unwrap();
            assert!(c <= 5);
        }
        g.set_disposition(Disposition::Nice);
        for _ in 0..50 {
            let c = g
                .publicgoods(AgentId::new(0), &world.view(), 20, PotMultiplier::Flat(1.25))
                .unwrap();
            assert!((13..=20).contains(&c));
        }
    }

    #[test]
    fn ratings_skip_self_and_stay_in_range() {
        let mut g = greedy(0);
        g.contributions.insert(AgentId::new(0), 1.0);
        g.contributions.insert(AgentId::new(1), 0.0);
        g.contributions.insert(AgentId::new(2), 1.0);
        for _ in 0..50 {
            let ratings = g.ratings(AgentId::new(0)).unwrap();
            assert!(!ratings.contains_key(&AgentId::new(0)));
            assert!(ratings.values().all(|r| (1..=5).contains(r)));
        }
    }
}
