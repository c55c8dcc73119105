use std::collections::BTreeMap;
use std::sync::Arc;
use teamforge::error::Result;
use teamforge::graph::SocialGraph;
use teamforge::ids::{AgentId, Candidate, GroupId};
use teamforge::metrics::MetricsCollector;
use teamforge::model::Actor;
use teamforge::prelude::*;
use teamforge::simulation::public_goods::{Contribution, PotMultiplier, settle};
use teamforge::strategies::{DecisionView, StrategyParams};

fn four_specialists() -> SocialGraph {
    let mut graph = SocialGraph::complete(4, 4);
    for i in 0..4 {
        let mut skills = vec![0; 4];
        skills[i] = 1;
        graph.set_skills(AgentId::new(i as u32), skills);
    }
    graph
}

fn quiet_config(n: usize, nskills: usize) -> SimConfig {
    let mut cfg = SimConfig::default()
        .with_agents(n)
        .with_skills(nskills, 1)
        .with_seed(42)
        .with_threads(false)
        .with_memory(false)
        .with_social_agents(false)
        .with_public_goods(false);
    cfg.ratings.enabled = false;
    cfg
}

#[test]
fn specialists_end_up_in_one_team() {
    let cfg = quiet_config(4, 4).with_steps(20, 1);
    let mut sim = Simulation::builder(cfg).graph(four_specialists()).build().unwrap();
    let report = sim.run_round().unwrap();

    assert_eq!(report.end_reason, EndReason::Converged);
    assert_eq!(report.team_count(), 1);
    assert_eq!(report.largest_team(), 4);
    for pay in &report.pay {
        assert!((pay - 15.0).abs() < 1e-9, "pay {}", pay);
    }
    assert!(sim.population().invariant_violations().is_empty());

    let graph = sim.export_graph();
    let group = graph.node(AgentId::new(0)).group;
    assert!(graph.nodes().iter().all(|n| n.group == group));
}

#[test]
fn public_goods_split_the_multiplied_pot() {
    let mut team = BTreeMap::new();
    team.insert(AgentId::new(0), Contribution::new(5, 5));
    team.insert(AgentId::new(1), Contribution::new(0, 10));
    team.insert(AgentId::new(2), Contribution::new(10, 0));
    let outcomes = settle(GroupId::new(0), &team, 1.2);

    for outcome in outcomes.values() {
        assert!((outcome.shared - 6.0).abs() < 1e-9);
    }
    assert!((outcomes[&AgentId::new(1)].final_pay() - 16.0).abs() < 1e-9);
    assert!((outcomes[&AgentId::new(2)].final_pay() - 6.0).abs() < 1e-9);
    assert!((outcomes[&AgentId::new(0)].final_pay() - 11.0).abs() < 1e-9);
}

#[test]
fn public_goods_round_conserves_pay() {
    let cfg = quiet_config(4, 4).with_steps(20, 1).with_public_goods(true);
    let metrics = MetricsCollector::new();
    let mut sim = Simulation::builder(cfg)
        .graph(four_specialists())
        .log(Arc::new(metrics.clone()))
        .build()
        .unwrap();
    let report = sim.run_round().unwrap();
    assert_eq!(report.public_goods.len(), 4);
    assert_eq!(metrics.public_goods().len(), 4);

    let played: Vec<_> = report.public_goods.iter().filter(|r| r.contributed.is_some()).collect();
    assert_eq!(played.len(), 4);
    let pot: u32 = played.iter().filter_map(|r| r.contributed).sum();
    let kept: u32 = played.iter().filter_map(|r| r.kept).sum();
    let multiplier = played[0].multiplier.unwrap();
    let total: f64 = played.iter().map(|r| r.pay).sum();
    assert!((total - (f64::from(kept) + f64::from(pot) * multiplier)).abs() < 1e-6);
    for r in &played {
        assert_eq!(r.contributed.unwrap() + r.kept.unwrap(), 15);
    }
}

/// Joins anyone, accepts the first applicant, and agent 1 walks out of any
/// team it ends up in.
#[derive(Debug)]
struct Walkout;

impl Strategy for Walkout {
    fn name(&self) -> &str {
        "walkout"
    }

    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        Ok(view.population.neighbor_groups(me).into_iter().collect())
    }

    fn acceptvote(&mut self, _me: AgentId, _view: &DecisionView<'_>, applicants: &[Candidate]) -> Result<Option<Candidate>> {
        Ok(applicants.first().copied())
    }

    fn consider(&mut self, _me: AgentId, _view: &DecisionView<'_>, acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        Ok(acceptances.first().copied())
    }

    fn expelvote(&mut self, me: AgentId, _view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        Ok((me == AgentId::new(1)).then_some(me))
    }

    fn publicgoods(&mut self, _me: AgentId, _view: &DecisionView<'_>, _stake: u32, _m: PotMultiplier) -> Result<u32> {
        Ok(0)
    }

    fn reset(&mut self) {}
}

#[test]
fn self_vote_leaves_for_an_empty_group() {
    let mut registry = StrategyRegistry::new();
    registry.register("walkout", |_: &StrategyParams| Box::new(Walkout));
    let cfg = quiet_config(2, 2).with_strategy("walkout").with_steps(1, 1).with_expel(true);
    let graph = SocialGraph::complete(2, 2);
    let mut sim = Simulation::builder(cfg).graph(graph).registry(registry).build().unwrap();
    let report = sim.run_round().unwrap();

    let pop = sim.population();
    let (a, b) = (AgentId::new(0), AgentId::new(1));
    assert_ne!(pop.agent(a).group(), pop.agent(b).group());
    assert_eq!(pop.group_of(a).size(), 1);
    assert_eq!(pop.group_of(b).size(), 1);
    assert!(pop.agent(b).switches() >= 1);
    assert_eq!(report.team_count(), 2);
    assert!(pop.invariant_violations().is_empty());
}

#[test]
fn passive_population_converges_untouched() {
    let cfg = quiet_config(6, 3).with_strategy("passive").with_steps(50, 2);
    let mut sim = Simulation::new(cfg).unwrap();
    let before = sim.population().assignment();
    let report = sim.run_round().unwrap();

    assert_eq!(report.end_reason, EndReason::Converged);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.assignment, before);
    assert_eq!(report.team_count(), 6);
}

#[test]
fn out_of_steps_when_nothing_settles_in_time() {
    let cfg = quiet_config(6, 3).with_strategy("passive").with_steps(2, 5);
    let mut sim = Simulation::new(cfg).unwrap();
    let report = sim.run_round().unwrap();
    assert_eq!(report.end_reason, EndReason::OutOfSteps);
    assert_eq!(report.iterations, 2);
}

#[test]
fn reset_restores_the_fresh_state() {
    let cfg = quiet_config(10, 4).with_skills(4, 2).with_steps(10, 1).with_expel(true);
    let mut sim = Simulation::new(cfg).unwrap();
    let fresh = sim.snapshot();
    sim.run_round().unwrap();
    sim.reset();
    assert_eq!(sim.snapshot(), fresh);
}

#[test]
fn sessions_with_the_same_seed_agree() {
    let cfg = quiet_config(12, 4).with_skills(4, 2).with_rounds(2).with_expel(true);
    let a = Simulation::new(cfg.clone()).unwrap().run().unwrap();
    let b = Simulation::new(cfg).unwrap().run().unwrap();
    let assignments = |s: &SessionReport| s.rounds.iter().map(|r| r.assignment.clone()).collect::<Vec<_>>();
    assert_eq!(assignments(&a), assignments(&b));
}

/// Picks options that were never offered: an unknown group, an agent that
/// did not apply, a group it was not accepted by, a stranger to expel.
#[derive(Debug)]
struct Stray;

impl Strategy for Stray {
    fn name(&self) -> &str {
        "stray"
    }

    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        let mut picks: Vec<GroupId> = view.population.neighbor_groups(me).into_iter().collect();
        picks.push(GroupId::new(99));
        picks.push(view.population.agent(me).group());
        Ok(picks)
    }

    fn acceptvote(&mut self, _me: AgentId, _view: &DecisionView<'_>, _applicants: &[Candidate]) -> Result<Option<Candidate>> {
        Ok(Some(Candidate::Agent(AgentId::new(2))))
    }

    fn consider(&mut self, _me: AgentId, _view: &DecisionView<'_>, _acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        Ok(Some(GroupId::new(50)))
    }

    fn expelvote(&mut self, _me: AgentId, _view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        Ok(Some(AgentId::new(77)))
    }

    fn publicgoods(&mut self, _me: AgentId, _view: &DecisionView<'_>, _stake: u32, _m: PotMultiplier) -> Result<u32> {
        Ok(0)
    }

    fn reset(&mut self) {}
}

#[test]
fn picks_off_the_menu_are_ignored() {
    let mut registry = StrategyRegistry::new();
    registry.register("stray", |_: &StrategyParams| Box::new(Stray));
    let cfg = quiet_config(3, 3).with_strategy("stray").with_steps(3, 1).with_expel(true);
    // 0 and 1 know each other; 2 knows nobody and never applies anywhere.
    let mut graph = SocialGraph::new(3, 3);
    graph.connect(AgentId::new(0), AgentId::new(1));
    let mut sim = Simulation::builder(cfg).graph(graph).registry(registry).build().unwrap();
    let before = sim.population().assignment();
    let report = sim.run_round().unwrap();

    assert_eq!(report.assignment, before);
    assert_eq!(report.team_count(), 3);
    let pop = sim.population();
    assert_eq!(pop.agent(AgentId::new(2)).group(), GroupId::new(2));
    assert!(pop.agents().iter().all(|a| a.switches() == 0));
    assert!(pop.invariant_violations().is_empty());
}

/// Accepts the first applicant and joins the first group that takes it,
/// but always tries to expel someone outside the team.
#[derive(Debug)]
struct Outsider;

impl Strategy for Outsider {
    fn name(&self) -> &str {
        "outsider"
    }

    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        Ok(view.population.neighbor_groups(me).into_iter().collect())
    }

    fn acceptvote(&mut self, _me: AgentId, _view: &DecisionView<'_>, applicants: &[Candidate]) -> Result<Option<Candidate>> {
        Ok(applicants.first().copied())
    }

    fn consider(&mut self, _me: AgentId, _view: &DecisionView<'_>, acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        Ok(acceptances.first().copied())
    }

    fn expelvote(&mut self, _me: AgentId, _view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        Ok(Some(AgentId::new(77)))
    }

    fn publicgoods(&mut self, _me: AgentId, _view: &DecisionView<'_>, _stake: u32, _m: PotMultiplier) -> Result<u32> {
        Ok(0)
    }

    fn reset(&mut self) {}
}

#[test]
fn expel_votes_for_strangers_are_ignored() {
    let mut registry = StrategyRegistry::new();
    registry.register("outsider", |_: &StrategyParams| Box::new(Outsider));
    let cfg = quiet_config(2, 2).with_strategy("outsider").with_steps(3, 1).with_expel(true);
    let mut sim = Simulation::builder(cfg)
        .graph(SocialGraph::complete(2, 2))
        .registry(registry)
        .build()
        .unwrap();
    let report = sim.run_round().unwrap();

    let pop = sim.population();
    assert_eq!(pop.agent(AgentId::new(0)).group(), pop.agent(AgentId::new(1)).group());
    assert_eq!(report.team_count(), 1);
    assert!(pop.invariant_violations().is_empty());
}

#[test]
fn bias_with_merging_is_a_configuration_error() {
    let mut cfg = quiet_config(8, 3).with_steps(5, 1).with_merge(true);
    cfg.bias = true;
    let mut sim = Simulation::new(cfg).unwrap();
    let err = sim.run_round().unwrap_err();
    assert!(
        matches!(err, EngineError::Configuration { phase: Phase::GroupPropose, .. }),
        "unexpected error: {}",
        err
    );
}

#[test]
fn bias_round_without_merging_completes() {
    let mut cfg = quiet_config(8, 3).with_steps(10, 1).with_expel(true);
    cfg.bias = true;
    let mut sim = Simulation::new(cfg).unwrap();
    let report = sim.run_round().unwrap();
    assert!(report.iterations >= 1);
    assert_eq!(report.assignment.len(), 8);
    assert!(sim.population().invariant_violations().is_empty());
}
