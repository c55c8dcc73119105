pub mod greedy;
pub mod human;
pub mod passive;
pub mod random;

use crate::error::Result;
use crate::graph::SocialGraph;
use crate::ids::{AgentId, Candidate, GroupId};
use crate::model::Population;
use crate::payoff::PayoffModel;
use crate::simulation::config::{ContribRanges, DelayConfig, SimConfig};
use crate::simulation::public_goods::{PotMultiplier, PublicGoodsOutcome};
use crate::utility::functions::UtilityInputs;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Read-only state handed to every decision. Nothing in the population or
/// graph changes while a view is alive.
#[derive(Clone, Copy)]
pub struct DecisionView<'a> {
    pub population: &'a Population,
    pub graph: &'a SocialGraph,
    pub payoff: &'a PayoffModel,
    pub config: &'a SimConfig,
    pub round: u32,
    pub iteration: u32,
}

impl<'a> DecisionView<'a> {
    pub fn utility_inputs(&self) -> UtilityInputs<'a> {
        UtilityInputs {
            population: self.population,
            graph: self.graph,
            payoff: self.payoff,
        }
    }
}

/// Membership change seen by the other members of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    Joined(AgentId),
    Left(AgentId),
    Expelled(Option<AgentId>),
}

/// How a simulated agent plays the public goods and ultimatum games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Nice,
    Mean,
    Fair,
    Random,
    /// Contributes about as much as its teammates did last time.
    Conditional,
}

impl Disposition {
    /// Order dispositions are handed out in when nobody is conditional.
    pub const CYCLE: [Disposition; 4] = [
        Disposition::Nice,
        Disposition::Mean,
        Disposition::Fair,
        Disposition::Random,
    ];

    /// Conditional agents have no fixed range and use the fair one.
    pub fn contribution_range(self, ranges: &ContribRanges) -> (f64, f64) {
        match self {
            Disposition::Nice => ranges.nice,
            Disposition::Mean => ranges.mean,
            Disposition::Fair | Disposition::Conditional => ranges.fair,
            Disposition::Random => ranges.random,
        }
    }

    pub fn offer_profile(self) -> OfferProfile {
        match self {
            Disposition::Nice => OfferProfile::Normal { mean: 7.0, sd: 1.0 },
            Disposition::Mean => OfferProfile::Normal { mean: 3.0, sd: 1.0 },
            Disposition::Fair | Disposition::Conditional => OfferProfile::Normal { mean: 5.0, sd: 1.0 },
            Disposition::Random => OfferProfile::Uniform { low: 1, high: 9 },
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Disposition::Nice => "nice",
            Disposition::Mean => "mean",
            Disposition::Fair => "fair",
            Disposition::Random => "random",
            Disposition::Conditional => "conditional",
        };
        f.write_str(name)
    }
}

/// Distribution of ultimatum offers, out of a pie of 10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OfferProfile {
    Normal { mean: f64, sd: f64 },
    Uniform { low: u8, high: u8 },
}

impl Default for OfferProfile {
    fn default() -> Self {
        OfferProfile::Normal { mean: 5.0, sd: 1.0 }
    }
}

impl OfferProfile {
    fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        match self {
            OfferProfile::Normal { mean, sd } => Normal::new(mean, sd.max(0.0))
                .map(|d| d.sample(rng))
                .unwrap_or(mean),
            OfferProfile::Uniform { low, high } => rng.gen_range(low.min(high)..=high.max(low)) as f64,
        }
    }

    pub fn offer<R: Rng + ?Sized>(self, rng: &mut R) -> u8 {
        self.sample(rng).round().clamp(0.0, 10.0) as u8
    }

    /// Accepts when the amount beats what this profile would have kept.
    pub fn accepts<R: Rng + ?Sized>(self, amount: u8, rng: &mut R) -> bool {
        let keep = 10.0 - self.sample(rng).round();
        f64::from(amount) > keep
    }
}

/// A participant's decision policy.
///
/// `me` is always the id of the agent that owns the strategy. Decisions see
/// the world through a [`DecisionView`] and return their choice; the
/// simulation applies it. Hooks with a default body are notifications that
/// only some strategies care about.
pub trait Strategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Slow strategies may block and get their own worker thread.
    fn is_slow(&self) -> bool {
        false
    }

    /// Groups to apply to.
    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>>;

    /// One applicant to admit to my group, or nobody.
    fn acceptvote(&mut self, me: AgentId, view: &DecisionView<'_>, applicants: &[Candidate])
    -> Result<Option<Candidate>>;

    /// The group to switch to among those that accepted me, or stay.
    fn consider(&mut self, me: AgentId, view: &DecisionView<'_>, acceptances: &[GroupId]) -> Result<Option<GroupId>>;

    /// A member of my group to expel. Naming myself means leaving.
    fn expelvote(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Option<AgentId>>;

    /// Amount of `stake` to put into the pot.
    fn publicgoods(&mut self, me: AgentId, view: &DecisionView<'_>, stake: u32, multiplier: PotMultiplier)
    -> Result<u32>;

    fn publicgoods_postprocess(
        &mut self,
        _me: AgentId,
        _view: &DecisionView<'_>,
        _outcome: &PublicGoodsOutcome,
    ) -> Result<()> {
        Ok(())
    }

    fn notify_group_accept(&mut self, _me: AgentId, _accepted: Option<Candidate>) -> Result<()> {
        Ok(())
    }

    fn notify_member(&mut self, _me: AgentId, _event: MemberEvent) -> Result<()> {
        Ok(())
    }

    fn switched_group(&mut self, _me: AgentId, _to: GroupId) {}

    fn postprocess_iter(&mut self, _me: AgentId, _view: &DecisionView<'_>) -> Result<()> {
        Ok(())
    }

    /// End of round. `global_pay` is the mean pay of agents with the same
    /// skills, present when no public goods game was played.
    fn postprocess(&mut self, _me: AgentId, _view: &DecisionView<'_>, _global_pay: Option<f64>) -> Result<()> {
        Ok(())
    }

    /// Ratings (1 to 5) this participant posts about others.
    fn ratings(&mut self, _me: AgentId) -> Result<BTreeMap<AgentId, u8>> {
        Ok(BTreeMap::new())
    }

    fn update_ratings(&mut self, _me: AgentId, _global: &BTreeMap<AgentId, f64>) -> Result<()> {
        Ok(())
    }

    fn set_disposition(&mut self, _disposition: Disposition) {}

    fn ask_for_offer(&mut self, _me: AgentId, _other: AgentId) -> Result<u8> {
        Ok(5)
    }

    fn decide_offer(&mut self, _me: AgentId, _other: AgentId, amount: u8) -> Result<bool> {
        Ok(amount >= 5)
    }

    fn ultimatum_conclusion(&mut self, _me: AgentId, _other: AgentId, _amount: u8, _accepted: bool) -> Result<()> {
        Ok(())
    }

    /// Clears per-round memory.
    fn reset(&mut self);
}

/// What a factory knows about the agent it builds a strategy for.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub agent: AgentId,
    pub seed: u64,
    /// Present when this agent should fake thinking time.
    pub delays: Option<DelayConfig>,
}

impl StrategyParams {
    pub fn new(agent: AgentId, seed: u64) -> Self {
        Self {
            agent,
            seed,
            delays: None,
        }
    }

    pub fn with_delays(mut self, delays: DelayConfig) -> Self {
        self.delays = Some(delays);
        self
    }

    /// Per-agent seed so two agents never share a random stream.
    pub fn agent_seed(&self) -> u64 {
        self.seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(u64::from(self.agent.raw()) + 1)
    }
}

type Factory = Box<dyn Fn(&StrategyParams) -> Box<dyn Strategy> + Send + Sync>;

pub struct StrategyRegistry {
    strategies: HashMap<String, Factory>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register("random", |p| Box::new(random::RandomStrategy::new(p)));
        self.register("dumb", |p| Box::new(random::RandomStrategy::new(p)));
        self.register("greedy", |p| Box::new(greedy::Greedy::new(p)));
        self.register("social", |p| Box::new(greedy::Greedy::new(p)));
        self.register("sim", |p| Box::new(greedy::Greedy::new(p)));
        self.register("passive", |_| Box::new(passive::Passive::new()));
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&StrategyParams) -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.strategies.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, name: &str, params: &StrategyParams) -> Option<Box<dyn Strategy>> {
        self.strategies.get(&name.to_lowercase()).map(|factory| factory(params))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(&name.to_lowercase())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn global() -> &'static StrategyRegistry {
        use std::sync::OnceLock;
        static REGISTRY: OnceLock<StrategyRegistry> = OnceLock::new();
        REGISTRY.get_or_init(StrategyRegistry::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn registry_knows_builtins() {
        let registry = StrategyRegistry::global();
        let names = registry.list();
        for name in ["greedy", "random", "passive", "social"] {
            assert!(names.contains(&name.to_string()), "missing {}", name);
        }
        let params = StrategyParams::new(AgentId::new(3), 42);
        let strategy = registry.create("Greedy", &params).unwrap();
        assert_eq!(strategy.name(), "greedy");
        assert!(!strategy.is_slow());
        assert!(registry.create("nope", &params).is_none());
    }

    #[test]
    fn delayed_strategies_are_slow() {
        let params = StrategyParams::new(AgentId::new(0), 1).with_delays(DelayConfig::default());
        assert!(StrategyRegistry::global().create("greedy", &params).unwrap().is_slow());
    }

    #[test]
    fn offers_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(8);
        for d in Disposition::CYCLE {
            for _ in 0..200 {
                assert!(d.offer_profile().offer(&mut rng) <= 10);
            }
        }
        let nice = Disposition::Nice.offer_profile();
        assert!(nice.accepts(10, &mut rng));
        assert!(!nice.accepts(0, &mut rng));
    }

    #[test]
    fn agent_seeds_differ() {
        let a = StrategyParams::new(AgentId::new(0), 7).agent_seed();
        let b = StrategyParams::new(AgentId::new(1), 7).agent_seed();
        assert_ne!(a, b);
    }
}
