use crate::error::{EngineError, Phase, Result};
use crate::graph::GraphConfig;
use crate::payoff::TaskConfig;
use crate::utility::{TieBreak, UtilityKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub name: String,
    pub num_agents: usize,
    /// Random ("dumb") agents: a fraction of the simulated agents when below
    /// one, otherwise a head count.
    pub random_agents: f64,
    /// Strategy name for the remaining simulated agents.
    pub strategy_name: String,
    pub nskills: usize,
    pub maxskills: usize,
    pub rounds: u32,
    pub nsteps: u32,
    pub deaditers: u32,
    pub time_limit: Option<Duration>,
    pub threaded: bool,
    pub seed: Option<u64>,
    pub skill_seed: Option<u64>,
    pub graph: GraphConfig,
    pub task: TaskConfig,
    pub utility: UtilityKind,
    pub tiebreak: TieBreak,
    pub groups_can_merge: bool,
    pub expel_agents: bool,
    pub fully_connect_groups: bool,
    pub keep_teams: bool,
    pub bias: bool,
    pub bias_range: f64,
    pub social_sim_agents: bool,
    pub social_learning_rate: f64,
    pub percent_conditional: f64,
    pub memory: MemoryConfig,
    pub delays: DelayConfig,
    pub public_goods: PublicGoodsConfig,
    pub ratings: RatingsConfig,
    pub ultimatum: UltimatumConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "default_sim".to_string(),
            num_agents: 16,
            random_agents: 0.0,
            strategy_name: "greedy".to_string(),
            nskills: 4,
            maxskills: 1,
            rounds: 1,
            nsteps: 10,
            deaditers: 1,
            time_limit: None,
            threaded: true,
            seed: None,
            skill_seed: None,
            graph: GraphConfig::default(),
            task: TaskConfig::default(),
            utility: UtilityKind::Random,
            tiebreak: TieBreak::Deterministic,
            groups_can_merge: false,
            expel_agents: false,
            fully_connect_groups: false,
            keep_teams: false,
            bias: false,
            bias_range: 4.0,
            social_sim_agents: true,
            social_learning_rate: 0.66,
            percent_conditional: 0.0,
            memory: MemoryConfig::default(),
            delays: DelayConfig::default(),
            public_goods: PublicGoodsConfig::default(),
            ratings: RatingsConfig::default(),
            ultimatum: UltimatumConfig::default(),
        }
    }
}

/// Agents stop repeating a decision that keeps failing: after `threshold`
/// repeats, each further try goes ahead with probability
/// `decay ^ (repeats - threshold)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub threshold: u32,
    pub decay: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1,
            decay: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Delay {
    pub mean_secs: f64,
    pub sd_secs: f64,
}

impl Delay {
    const fn new(mean_secs: f64, sd_secs: f64) -> Self {
        Self { mean_secs, sd_secs }
    }
}

/// Synthetic thinking time for simulated agents. Delayed agents are slow and
/// get their own worker thread in every fan-out phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    pub enabled: bool,
    /// Delay only the first n agents; 0 delays everyone.
    pub first_n: usize,
    /// Multiplier on every sampled delay, for quick dry runs.
    pub scale: f64,
    pub min_secs: f64,
    pub propose: Delay,
    pub acceptvote: Delay,
    pub join: Delay,
    pub expelvote: Delay,
    pub publicgoods: Delay,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            first_n: 8,
            scale: 1.0,
            min_secs: 0.25,
            propose: Delay::new(4.0, 2.0),
            acceptvote: Delay::new(5.0, 2.5),
            join: Delay::new(5.0, 1.5),
            expelvote: Delay::new(3.0, 1.5),
            publicgoods: Delay::new(10.0, 5.0),
        }
    }
}

impl DelayConfig {
    pub fn applies_to(&self, index: usize) -> bool {
        self.enabled && (self.first_n == 0 || index < self.first_n)
    }

    pub fn for_phase(&self, phase: Phase) -> Option<Delay> {
        match phase {
            Phase::Propose => Some(self.propose),
            Phase::AcceptVote => Some(self.acceptvote),
            Phase::Join => Some(self.join),
            Phase::Expel => Some(self.expelvote),
            Phase::PublicGoods => Some(self.publicgoods),
            _ => None,
        }
    }
}

/// Share of current pay a disposition contributes, low to high.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContribRanges {
    pub nice: (f64, f64),
    pub mean: (f64, f64),
    pub fair: (f64, f64),
    pub random: (f64, f64),
}

impl Default for ContribRanges {
    fn default() -> Self {
        Self {
            nice: (0.7, 1.0),
            mean: (0.0, 0.25),
            fair: (0.5, 0.8),
            random: (0.0, 1.0),
        }
    }
}

/// Logistic pot multiplier driven by contribution share and peer ratings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AltPublicGoods {
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub rating_intercept: f64,
    pub rating_slope: f64,
}

impl Default for AltPublicGoods {
    fn default() -> Self {
        Self {
            min_multiplier: 1.10,
            max_multiplier: 2.00,
            rating_intercept: 0.25,
            rating_slope: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicGoodsConfig {
    pub enabled: bool,
    /// Percent the pot grows by in flat mode.
    pub mult_percent: f64,
    pub contrib_ranges: ContribRanges,
    pub conditional_variance: f64,
    pub alt: Option<AltPublicGoods>,
}

impl Default for PublicGoodsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mult_percent: 25.0,
            contrib_ranges: ContribRanges::default(),
            conditional_variance: 0.1,
            alt: None,
        }
    }
}

impl PublicGoodsConfig {
    pub fn flat_multiplier(&self) -> f64 {
        1.0 + self.mult_percent * 0.01
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingsConfig {
    pub enabled: bool,
    pub show_global: bool,
}

impl Default for RatingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            show_global: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltimatumConfig {
    pub enabled: bool,
    pub iterations: u32,
    /// Pair every edge instead of only edges touching a human.
    pub all_participants: bool,
    pub retry: Duration,
}

impl Default for UltimatumConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            iterations: 2,
            all_participants: false,
            retry: Duration::from_secs(5),
        }
    }
}

impl SimConfig {
    pub fn with_agents(mut self, n: usize) -> Self {
        self.num_agents = n;
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy_name = strategy.into();
        self
    }

    pub fn with_skills(mut self, nskills: usize, maxskills: usize) -> Self {
        self.nskills = nskills;
        self.maxskills = maxskills;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_steps(mut self, nsteps: u32, deaditers: u32) -> Self {
        self.nsteps = nsteps;
        self.deaditers = deaditers;
        self
    }

    pub fn with_threads(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn with_expel(mut self, expel: bool) -> Self {
        self.expel_agents = expel;
        self
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.groups_can_merge = merge;
        self
    }

    pub fn with_public_goods(mut self, enabled: bool) -> Self {
        self.public_goods.enabled = enabled;
        self
    }

    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.memory.enabled = enabled;
        self
    }

    pub fn with_social_agents(mut self, social: bool) -> Self {
        self.social_sim_agents = social;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| Err(EngineError::config(Phase::Setup, reason));
        if self.num_agents == 0 {
            return fail("num_agents must be at least 1");
        }
        if self.nskills == 0 {
            return fail("nskills must be at least 1");
        }
        if self.maxskills == 0 {
            return fail("maxskills must be at least 1");
        }
        if self.rounds == 0 {
            return fail("rounds must be at least 1");
        }
        if self.random_agents < 0.0 {
            return fail("random_agents cannot be negative");
        }
        if !(0.0..=1.0).contains(&self.percent_conditional) {
            return fail("percent_conditional must be within 0..=1");
        }
        if !(0.0..=1.0).contains(&self.social_learning_rate) {
            return fail("social_learning_rate must be within 0..=1");
        }
        if self.bias && self.bias_range < 1.0 {
            return fail("bias_range must be at least 1");
        }
        if self.memory.enabled && !(0.0..=1.0).contains(&self.memory.decay) {
            return fail("memory decay must be within 0..=1");
        }
        if let Some(alt) = &self.public_goods.alt {
            if alt.max_multiplier < alt.min_multiplier {
                return fail("alternate public goods multiplier range is inverted");
            }
        }
        let r = &self.public_goods.contrib_ranges;
        for (lo, hi) in [r.nice, r.mean, r.fair, r.random] {
            if lo > hi || lo < 0.0 || hi > 1.0 {
                return fail("contribution ranges must satisfy 0 <= low <= high <= 1");
            }
        }
        if self.delays.enabled && self.delays.scale < 0.0 {
            return fail("delay scale cannot be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = SimConfig::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.public_goods.flat_multiplier() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(SimConfig::default().with_agents(0).validate().is_err());
        assert!(SimConfig::default().with_skills(4, 0).validate().is_err());
        let mut cfg = SimConfig::default();
        cfg.public_goods.alt = Some(AltPublicGoods {
            min_multiplier: 3.0,
            ..AltPublicGoods::default()
        });
        assert!(matches!(cfg.validate(), Err(EngineError::Configuration { .. })));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: SimConfig = serde_json::from_str(r#"{"num_agents": 4, "expel_agents": true}"#).unwrap();
        assert_eq!(cfg.num_agents, 4);
        assert!(cfg.expel_agents);
        assert_eq!(cfg.nsteps, 10);
        assert_eq!(cfg.strategy_name, "greedy");
    }

    #[test]
    fn delays_cover_first_n() {
        let mut delays = DelayConfig::default();
        assert!(!delays.applies_to(0));
        delays.enabled = true;
        assert!(delays.applies_to(7));
        assert!(!delays.applies_to(8));
        delays.first_n = 0;
        assert!(delays.applies_to(100));
    }
}
