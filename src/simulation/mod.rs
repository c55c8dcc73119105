pub mod concurrency;
pub mod config;
pub(crate) mod phases;
pub mod public_goods;
pub mod report;
pub mod ultimatum;

pub use config::SimConfig;
pub use report::{EndReason, RoundReport, SessionReport};

use crate::error::{EngineError, Phase, Result};
use crate::graph::{self, NodeKind, SocialGraph};
use crate::ids::{AgentId, IdAllocator};
use crate::metrics::{DecisionLog, NullLog, UltimatumRecord};
use crate::model::{Actor, Agent, Population, PopulationSnapshot, Skills};
use crate::payoff::PayoffModel;
use crate::strategies::human::{HumanAdapter, HumanInterface};
use crate::strategies::{Strategy, StrategyParams, StrategyRegistry};
use concurrency::PhaseRunner;
use phases::PhaseContext;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SimulationBuilder {
    config: SimConfig,
    graph: Option<SocialGraph>,
    humans: Vec<Box<dyn HumanInterface>>,
    log: Arc<dyn DecisionLog>,
    cancel: CancellationToken,
    registry: Option<StrategyRegistry>,
}

impl SimulationBuilder {
    /// Use this topology instead of generating one. Node skills are kept if
    /// any are set, otherwise they are rolled like a generated graph's.
    pub fn graph(mut self, graph: SocialGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Adds a human participant. Humans take the lowest agent ids, in the
    /// order they were added.
    pub fn human(mut self, interface: Box<dyn HumanInterface>) -> Self {
        self.humans.push(interface);
        self
    }

    pub fn log(mut self, log: Arc<dyn DecisionLog>) -> Self {
        self.log = log;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Simulation> {
        Simulation::setup(self)
    }
}

/// Owns one session: the graph, the population and every random stream.
///
/// Nothing outside the simulation writes to the population or the graph;
/// decisions only ever see them through a read-only view.
pub struct Simulation {
    config: SimConfig,
    graph: SocialGraph,
    population: Population,
    payoff: PayoffModel,
    rng: StdRng,
    runner: PhaseRunner,
    log: Arc<dyn DecisionLog>,
    cancel: CancellationToken,
    ids: IdAllocator,
    rounds_played: u32,
    last_ratings: BTreeMap<AgentId, f64>,
    ultimatum: Vec<UltimatumRecord>,
}

impl Simulation {
    pub fn builder(config: SimConfig) -> SimulationBuilder {
        SimulationBuilder {
            config,
            graph: None,
            humans: Vec::new(),
            log: Arc::new(NullLog),
            cancel: CancellationToken::new(),
            registry: None,
        }
    }

    pub fn new(config: SimConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    fn setup(builder: SimulationBuilder) -> Result<Self> {
        let SimulationBuilder {
            mut config,
            graph,
            humans,
            log,
            cancel,
            registry,
        } = builder;
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        config.seed = Some(seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut skill_rng = StdRng::seed_from_u64(config.skill_seed.unwrap_or_else(|| rng.r#gen()));

        let mut graph = match graph {
            Some(g) => {
                if g.len() != config.num_agents {
                    info!("Using the supplied graph's {} nodes as agents", g.len());
                    config.num_agents = g.len();
                }
                g.check_nskills(config.nskills)?;
                let mut g = g;
                if g.total_skills().iter().all(|s| *s == 0) {
                    graph::generate::assign_skills(&mut g, config.nskills, config.maxskills, &mut skill_rng);
                }
                g
            }
            None => {
                let mut g = graph::generate::generate(&config.graph, config.num_agents, config.nskills, &mut rng)?;
                graph::generate::assign_skills(&mut g, config.nskills, config.maxskills, &mut skill_rng);
                if config.bias {
                    graph::generate::assign_edge_biases(&mut g, &mut skill_rng)?;
                }
                g
            }
        };
        if humans.len() > config.num_agents {
            return Err(EngineError::config(
                Phase::Setup,
                format!("{} humans but only {} agents", humans.len(), config.num_agents),
            ));
        }

        let nhumans = humans.len();
        let sims = config.num_agents - nhumans;
        let nrandom = if config.random_agents < 1.0 {
            (config.random_agents * sims as f64).round() as usize
        } else {
            config.random_agents as usize
        }
        .min(sims);
        let mut sim_ids: Vec<usize> = (nhumans..config.num_agents).collect();
        sim_ids.shuffle(&mut rng);
        let random_ids: BTreeSet<usize> = sim_ids.into_iter().take(nrandom).collect();

        let registry = match &registry {
            Some(r) => r,
            None => StrategyRegistry::global(),
        };
        if !registry.contains(&config.strategy_name) {
            return Err(EngineError::UnknownStrategy(config.strategy_name.clone()));
        }

        let mut ids = IdAllocator::new();
        let mut humans = humans.into_iter();
        let mut agents = Vec::with_capacity(config.num_agents);
        for index in 0..config.num_agents {
            let id = ids.next_agent();
            let mut params = StrategyParams::new(id, seed);
            if config.delays.applies_to(index) {
                params = params.with_delays(config.delays.clone());
            }
            let (kind, strategy): (NodeKind, Box<dyn Strategy>) = if let Some(human) = humans.next() {
                (NodeKind::Human, Box::new(HumanAdapter::new(human)))
            } else if random_ids.contains(&index) {
                let strategy = registry
                    .create("random", &params)
                    .ok_or_else(|| EngineError::UnknownStrategy("random".to_string()))?;
                (NodeKind::Random, strategy)
            } else {
                let strategy = registry
                    .create(&config.strategy_name, &params)
                    .ok_or_else(|| EngineError::UnknownStrategy(config.strategy_name.clone()))?;
                (NodeKind::Greedy, strategy)
            };
            let skills = Skills::from_vec(graph.node(id).skills.clone());
            agents.push(Agent::new(id, skills, kind, strategy));
        }

        let payoff = PayoffModel::new(&config.task, config.nskills, config.bias);
        let mut population = Population::new(config.nskills, agents, &graph, &payoff)?;
        if config.bias {
            population.assign_biases(config.bias_range, &mut skill_rng)?;
        }
        let dispositions = ultimatum::assign_dispositions(&mut population, config.percent_conditional, &mut rng);
        debug!("Dispositions: {:?}", dispositions);
        population.write_back(&mut graph);

        info!(
            "Simulation {} ready: {} agents ({} human, {} random, {} {}), {} edges, seed {}",
            config.name,
            config.num_agents,
            nhumans,
            nrandom,
            sims - nrandom,
            config.strategy_name,
            graph.edge_count(),
            seed
        );

        Ok(Self {
            runner: PhaseRunner::new(config.threaded),
            config,
            graph,
            population,
            payoff,
            rng,
            log,
            cancel,
            ids,
            rounds_played: 0,
            last_ratings: BTreeMap::new(),
            ultimatum: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn graph(&self) -> &SocialGraph {
        &self.graph
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        self.population.snapshot()
    }

    pub fn last_ratings(&self) -> &BTreeMap<AgentId, f64> {
        &self.last_ratings
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The graph with membership, switches and pay written onto its nodes.
    pub fn export_graph(&mut self) -> &SocialGraph {
        self.population.write_back(&mut self.graph);
        &self.graph
    }

    /// Clears per-round state and, without `keep_teams`, puts everyone back
    /// into a singleton group.
    pub fn reset(&mut self) {
        self.population
            .reset(&self.graph, self.config.keep_teams, &self.payoff);
    }

    /// Plays the pairwise ultimatum pregame if it is enabled.
    pub fn run_ultimatum(&mut self) -> Result<&[UltimatumRecord]> {
        if self.config.ultimatum.enabled && self.ultimatum.is_empty() {
            self.ultimatum = ultimatum::run(
                &self.population,
                &self.graph,
                &self.config.ultimatum,
                self.log.as_ref(),
                &mut self.rng,
            )?;
            let accepted = self.ultimatum.iter().filter(|u| u.accepted).count();
            info!("Ultimatum: {} of {} offers accepted", accepted, self.ultimatum.len());
        }
        Ok(&self.ultimatum)
    }

    fn context(&mut self, round: u32, iteration: u32) -> PhaseContext<'_> {
        PhaseContext {
            population: &mut self.population,
            graph: &mut self.graph,
            payoff: &self.payoff,
            config: &self.config,
            runner: self.runner,
            log: self.log.as_ref(),
            rng: &mut self.rng,
            last_ratings: &self.last_ratings,
            round,
            iteration,
        }
    }

    /// Plays one round: the iteration loop, then public goods (or the plain
    /// round postprocess) and ratings.
    pub fn run_round(&mut self) -> Result<RoundReport> {
        let round = self.ids.next_round();
        if self.rounds_played > 0 {
            self.population.write_back(&mut self.graph);
            self.reset();
        }
        self.payoff.reshuffle(&mut self.rng);
        self.population.refresh_all(&self.payoff);

        let started = Instant::now();
        let deadline = self.config.time_limit.map(|limit| started + limit);
        let mut last = self.population.assignment();
        let mut dead = 0;
        let mut iterations = 0;
        let mut end_reason = EndReason::OutOfSteps;
        info!("Round {} starting", round);

        for step in 0..self.config.nsteps {
            let iteration = step + 1;
            let merge = self.config.groups_can_merge;
            let expel = self.config.expel_agents;
            let mut ctx = self.context(round, iteration);
            phases::propose(&mut ctx)?;
            if merge {
                phases::group_propose(&mut ctx)?;
            }
            phases::acceptvote(&mut ctx)?;
            if merge {
                phases::group_merge(&mut ctx)?;
            }
            phases::join(&mut ctx)?;
            if expel {
                phases::expel(&mut ctx)?;
            }
            phases::postprocess_iter(&mut ctx)?;
            iterations = iteration;

            let now = self.population.assignment();
            if now == last {
                dead += 1;
            } else {
                dead = 0;
            }
            last = now;
            debug!(
                "Round {} iteration {}: {} teams, {} dead iterations",
                round,
                iteration,
                self.population.occupied_groups().count(),
                dead
            );
            if dead > self.config.deaditers {
                end_reason = EndReason::Converged;
                break;
            }
            if self.cancel.is_cancelled() {
                warn!("Round {} cancelled after iteration {}", round, iteration);
                end_reason = EndReason::Cancelled;
                break;
            }
            if iteration > 2 && deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Round {} ran out of time after iteration {}", round, iteration);
                end_reason = EndReason::OutOfTime;
                break;
            }
        }

        let public_goods_on = self.config.public_goods.enabled;
        let ratings_on = self.config.ratings.enabled;
        let mut ctx = self.context(round, iterations);
        let public_goods = if public_goods_on {
            phases::public_goods(&mut ctx)?
        } else {
            phases::postprocess_round(&mut ctx)?;
            Vec::new()
        };
        let ratings = if ratings_on {
            phases::ratings(&mut ctx)?
        } else {
            BTreeMap::new()
        };
        ctx.team_status(Phase::RoundPostprocess);
        if ratings_on {
            self.last_ratings = ratings.clone();
        }
        self.population.write_back(&mut self.graph);
        self.rounds_played += 1;

        let violations = self.population.invariant_violations();
        for v in &violations {
            warn!("Round {}: {}", round, v);
        }

        let snapshot = self.population.snapshot();
        let report = RoundReport {
            round,
            iterations,
            end_reason,
            elapsed_secs: started.elapsed().as_secs_f64(),
            assignment: self.population.assignment(),
            groups: snapshot.groups.into_iter().filter(|g| !g.members.is_empty()).collect(),
            pay: self.population.agents().iter().map(|a| a.current_pay()).collect(),
            public_goods,
            ratings,
        };
        info!(
            "Round {} finished ({}) after {} iterations: {} teams, mean pay {:.2}",
            round,
            report.end_reason,
            report.iterations,
            report.team_count(),
            report.mean_pay()
        );
        Ok(report)
    }

    /// Runs the whole session: the ultimatum pregame (if enabled), then
    /// every configured round. Stops early when cancelled.
    pub fn run(&mut self) -> Result<SessionReport> {
        self.run_with(|_| {})
    }

    /// Like [`Simulation::run`], calling `on_round` after every round.
    pub fn run_with(&mut self, mut on_round: impl FnMut(&RoundReport)) -> Result<SessionReport> {
        let started = Instant::now();
        self.run_ultimatum()?;
        let mut rounds = Vec::with_capacity(self.config.rounds as usize);
        for _ in 0..self.config.rounds {
            let report = self.run_round()?;
            on_round(&report);
            let cancelled = report.end_reason == EndReason::Cancelled;
            rounds.push(report);
            if cancelled {
                break;
            }
        }
        Ok(SessionReport {
            name: self.config.name.clone(),
            seed: self.config.seed,
            agents: self.config.num_agents,
            strategy: self.config.strategy_name.clone(),
            ultimatum: self.ultimatum.clone(),
            rounds,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;

    fn config() -> SimConfig {
        SimConfig::default()
            .with_agents(8)
            .with_seed(7)
            .with_threads(false)
            .with_steps(6, 1)
    }

    #[test]
    fn setup_builds_one_agent_per_node() {
        let sim = Simulation::new(config()).unwrap();
        assert_eq!(sim.population().len(), 8);
        assert_eq!(sim.graph().len(), 8);
        assert!(sim.population().invariant_violations().is_empty());
        assert!(sim.population().agents().iter().all(|a| a.kind() == NodeKind::Greedy));
    }

    #[test]
    fn random_agent_share() {
        let mut cfg = config();
        cfg.random_agents = 0.5;
        let sim = Simulation::new(cfg).unwrap();
        let random = sim
            .population()
            .agents()
            .iter()
            .filter(|a| a.kind() == NodeKind::Random)
            .count();
        assert_eq!(random, 4);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = Simulation::new(config().with_strategy("oracle")).err().unwrap();
        assert!(matches!(err, EngineError::UnknownStrategy(name) if name == "oracle"));
    }

    #[test]
    fn rounds_keep_invariants_and_log() {
        let metrics = MetricsCollector::new();
        let mut sim = Simulation::builder(config().with_rounds(2))
            .log(Arc::new(metrics.clone()))
            .build()
            .unwrap();
        let session = sim.run().unwrap();
        assert_eq!(session.rounds.len(), 2);
        assert_eq!(sim.rounds_played(), 2);
        assert!(sim.population().invariant_violations().is_empty());
        for round in &session.rounds {
            assert!(round.iterations >= 1 && round.iterations <= 6);
            assert_eq!(round.assignment.len(), 8);
        }
        let events: BTreeSet<String> = metrics.team_statuses().into_iter().map(|t| t.event).collect();
        assert!(events.contains("apply"));
        assert!(events.contains("simend"));
    }

    #[test]
    fn cancelled_session_stops_after_one_round() {
        let mut sim = Simulation::new(config().with_rounds(3)).unwrap();
        sim.cancel_token().cancel();
        let session = sim.run().unwrap();
        assert_eq!(session.rounds.len(), 1);
        assert!(session.was_cancelled());
        assert_eq!(session.rounds[0].iterations, 1);
    }
}
