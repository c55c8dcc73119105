//! One function per protocol phase.
//!
//! Every phase has two halves. Decisions are gathered through the
//! [`PhaseRunner`] against a read-only [`DecisionView`]; nothing is written
//! until the runner's barrier has returned. Then the results are applied on
//! the calling thread, which is the only writer of the population and graph.

use super::concurrency::{Job, PhaseRunner};
use super::config::SimConfig;
use super::public_goods::{self, Contribution, PublicGoodsOutcome};
use crate::error::{EngineError, Phase, Result};
use crate::graph::SocialGraph;
use crate::ids::{AgentId, Candidate, GroupId};
use crate::metrics::{DecisionLog, DecisionRecord, GroupStatus, PublicGoodsRecord, TeamStatus};
use crate::model::{Actor, Population};
use crate::payoff::PayoffModel;
use crate::strategies::{DecisionView, MemberEvent, Strategy};
use crate::utility::functions::UtilityInputs;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

pub(crate) struct PhaseContext<'a> {
    pub population: &'a mut Population,
    pub graph: &'a mut SocialGraph,
    pub payoff: &'a PayoffModel,
    pub config: &'a SimConfig,
    pub runner: PhaseRunner,
    pub log: &'a dyn DecisionLog,
    pub rng: &'a mut StdRng,
    pub last_ratings: &'a BTreeMap<AgentId, f64>,
    pub round: u32,
    pub iteration: u32,
}

impl PhaseContext<'_> {
    fn view(&self) -> DecisionView<'_> {
        DecisionView {
            population: self.population,
            graph: self.graph,
            payoff: self.payoff,
            config: self.config,
            round: self.round,
            iteration: self.iteration,
        }
    }

    pub fn team_status(&self, phase: Phase) {
        if !self.log.wants_team_status() {
            return;
        }
        let groups = self
            .population
            .occupied_groups()
            .map(|g| GroupStatus {
                group: g.id(),
                members: g.agents().to_vec(),
                pay: g.current_pay(),
            })
            .collect();
        self.log.record_team_status(TeamStatus {
            round: self.round,
            iteration: self.iteration,
            event: phase.event_name().to_string(),
            groups,
        });
    }

    fn record(&self, phase: Phase, actor: u32, option: Option<u32>, current_pay: f64, projected_pay: f64, chosen: bool) {
        self.log.record_decision(DecisionRecord {
            round: self.round,
            iteration: self.iteration,
            phase,
            actor,
            option,
            current_pay,
            projected_pay,
            chosen,
        });
    }

    fn jobs(&self, agents: impl IntoIterator<Item = AgentId>) -> Vec<Job> {
        agents
            .into_iter()
            .map(|a| Job::new(a, self.population.agent(a).is_slow()))
            .collect()
    }

    fn notify(&self, members: &[AgentId], f: impl Fn(AgentId, &mut dyn Strategy) -> Result<()>) -> Result<()> {
        for m in members {
            let mut strategy = self.population.agent(*m).strategy();
            f(*m, &mut **strategy)?;
        }
        Ok(())
    }
}

/// Runs one decision, downgrading protocol errors to "no selection".
fn decide<T>(
    view: &DecisionView<'_>,
    agent: AgentId,
    phase: Phase,
    f: impl FnOnce(&mut dyn Strategy) -> Result<T>,
) -> Result<Option<T>> {
    let mut strategy = view.population.agent(agent).strategy();
    match f(&mut **strategy) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!("{}: participant {}: {}", phase, agent, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Logs a pick that was not among the options offered.
fn off_menu(phase: Phase, agent: AgentId, pick: impl std::fmt::Display) {
    let e = EngineError::protocol(phase, format!("{} is not on offer", pick));
    warn!("participant {}: {}", agent, e);
}

/// Majority of votes; ties go to a random top vote-getter. `None` is a
/// vote like any other.
fn tally<T: Ord + Copy>(votes: &[Option<T>], rng: &mut StdRng) -> Option<Option<T>> {
    let mut counts: BTreeMap<Option<T>, usize> = BTreeMap::new();
    for v in votes {
        *counts.entry(*v).or_insert(0) += 1;
    }
    let top = counts.values().copied().max()?;
    let leaders: Vec<Option<T>> = counts.into_iter().filter(|(_, c)| *c == top).map(|(v, _)| v).collect();
    leaders.choose(rng).copied()
}

/// Every agent applies to zero or more neighbouring groups.
pub(crate) fn propose(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.team_status(Phase::Propose);
    let agents: Vec<AgentId> = ctx.population.agents().iter().map(|a| a.id()).collect();
    let jobs = ctx.jobs(agents.iter().copied());
    let picks = {
        let view = ctx.view();
        ctx.runner.run(Phase::Propose, &jobs, |a| {
            decide(&view, a, Phase::Propose, |s| s.propose(a, &view))
        })?
    };

    for (agent, groups) in agents.into_iter().zip(picks) {
        let offered = ctx.population.neighbor_groups(agent);
        for gid in groups.unwrap_or_default() {
            if !offered.contains(&gid) {
                off_menu(Phase::Propose, agent, gid);
                continue;
            }
            if ctx.population.group(gid).is_empty() {
                continue;
            }
            let me = ctx.population.agent(agent);
            let projected = ctx.payoff.projected_join_pay(me, ctx.population.group(gid));
            ctx.record(Phase::Propose, agent.raw(), Some(gid.raw()), me.current_pay(), projected, true);
            ctx.population.take_application(gid, Candidate::Agent(agent));
        }
    }
    Ok(())
}

/// Multi-member groups apply to merge with neighbouring groups that would
/// pay at least as well.
pub(crate) fn group_propose(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.payoff.require_unbiased(Phase::GroupPropose)?;
    ctx.team_status(Phase::GroupPropose);
    let groups: Vec<GroupId> = ctx
        .population
        .occupied_groups()
        .filter(|g| g.size() > 1)
        .map(|g| g.id())
        .collect();
    for gid in groups {
        for other in ctx.population.group_neighbor_groups(gid) {
            let me = ctx.population.group(gid);
            let projected = ctx.payoff.projected_merge_pay(ctx.population.group(other), me);
            if projected >= me.current_pay() {
                ctx.record(Phase::GroupPropose, gid.raw(), Some(other.raw()), me.current_pay(), projected, true);
                ctx.population.take_application(other, Candidate::Group(gid));
            }
        }
    }
    Ok(())
}

/// Members of every group with applications vote on one applicant to admit.
pub(crate) fn acceptvote(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.team_status(Phase::AcceptVote);
    let group_ids: Vec<GroupId> = ctx
        .population
        .groups()
        .iter()
        .filter(|g| !g.applications().is_empty())
        .map(|g| g.id())
        .collect();
    let mut ballots: BTreeMap<GroupId, Vec<Candidate>> = BTreeMap::new();
    for gid in group_ids {
        let applicants = ctx.population.take_applications(gid);
        if !ctx.population.group(gid).is_empty() {
            ballots.insert(gid, applicants);
        }
    }
    if ballots.is_empty() {
        return Ok(());
    }

    let voters: Vec<AgentId> = ballots
        .keys()
        .flat_map(|g| ctx.population.group(*g).agents().to_vec())
        .collect();
    let jobs = ctx.jobs(voters.iter().copied());
    let votes = {
        let view = ctx.view();
        let ballots = &ballots;
        ctx.runner.run(Phase::AcceptVote, &jobs, |a| {
            let applicants = &ballots[&view.population.agent(a).group()];
            let vote = decide(&view, a, Phase::AcceptVote, |s| s.acceptvote(a, &view, applicants))?.flatten();
            Ok(vote.filter(|c| {
                let valid = applicants.contains(c);
                if !valid {
                    off_menu(Phase::AcceptVote, a, c);
                }
                valid
            }))
        })?
    };
    let by_voter: HashMap<AgentId, Option<Candidate>> = voters.into_iter().zip(votes).collect();

    for (gid, applicants) in &ballots {
        let members = ctx.population.group(*gid).agents().to_vec();
        let cast: Vec<Option<Candidate>> = members.iter().map(|m| by_voter.get(m).copied().flatten()).collect();
        let Some(pick) = tally(&cast, ctx.rng) else {
            warn!("{}", EngineError::protocol(Phase::AcceptVote, format!("group {} received no votes", gid)));
            continue;
        };

        let group = ctx.population.group(*gid);
        for (member, vote) in members.iter().zip(&cast) {
            let now = ctx.population.agent(*member).current_pay();
            for c in applicants {
                let projected = ctx.payoff.projected_merge_pay(group, ctx.population.actor(*c));
                ctx.record(Phase::AcceptVote, member.raw(), Some(c.raw()), now, projected, *vote == Some(*c));
            }
        }

        if let Some(candidate) = pick {
            debug!("Group {} accepts {}", gid, candidate);
            ctx.population.notify_accept(candidate, *gid);
        }
        ctx.notify(&members, |m, s| s.notify_group_accept(m, pick))?;
    }
    Ok(())
}

/// Groups accepted by other groups merge into the best of them, if any pays
/// more than staying put.
pub(crate) fn group_merge(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.payoff.require_unbiased(Phase::GroupMerge)?;
    ctx.team_status(Phase::GroupMerge);
    let count = ctx.population.groups().len();
    for i in 0..count {
        let gid = GroupId::new(i as u32);
        let offers: Vec<GroupId> = ctx
            .population
            .take_group_acceptances(gid)
            .into_iter()
            .filter(|o| *o != gid && !ctx.population.group(*o).is_empty())
            .collect();
        if offers.is_empty() || ctx.population.group(gid).is_empty() {
            continue;
        }
        let inputs = UtilityInputs {
            population: ctx.population,
            graph: ctx.graph,
            payoff: ctx.payoff,
        };
        let tuples = ctx.config.utility.group_merge(&inputs, gid, &offers, ctx.rng);
        let Some(target) = ctx.config.tiebreak.select(&tuples, ctx.rng) else {
            continue;
        };
        let now = ctx.population.group(gid).current_pay();
        let projected = ctx.payoff.projected_merge_pay(ctx.population.group(target), ctx.population.group(gid));
        ctx.record(Phase::GroupMerge, gid.raw(), Some(target.raw()), now, projected, true);

        debug!("Group {} merges into group {}", gid, target);
        let moved = ctx.population.merge(gid, target, ctx.payoff);
        for agent in &moved {
            ctx.population.agent(*agent).strategy().switched_group(*agent, target);
            if ctx.config.fully_connect_groups {
                ctx.population.fully_connect(*agent, ctx.graph);
            }
        }
    }
    Ok(())
}

/// Agents holding acceptances pick at most one group to switch to. Agents
/// go one at a time in random order, each seeing the moves made before it.
pub(crate) fn join(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.team_status(Phase::Join);
    let mut agents: Vec<AgentId> = ctx
        .population
        .agents()
        .iter()
        .filter(|a| !a.acceptances().is_empty())
        .map(|a| a.id())
        .collect();
    agents.shuffle(ctx.rng);

    for agent in agents {
        let own = ctx.population.agent(agent).group();
        let offers: Vec<GroupId> = ctx
            .population
            .take_acceptances(agent)
            .into_iter()
            .filter(|g| *g != own && !ctx.population.group(*g).is_empty())
            .collect();
        if offers.is_empty() {
            continue;
        }
        let choice = {
            let view = ctx.view();
            decide(&view, agent, Phase::Join, |s| s.consider(agent, &view, &offers))?.flatten()
        };

        let me = ctx.population.agent(agent);
        for g in &offers {
            let projected = ctx.payoff.projected_join_pay(me, ctx.population.group(*g));
            ctx.record(Phase::Join, agent.raw(), Some(g.raw()), me.current_pay(), projected, choice == Some(*g));
        }
        let Some(target) = choice.filter(|g| offers.contains(g)) else {
            if let Some(g) = choice {
                off_menu(Phase::Join, agent, g);
            }
            continue;
        };

        debug!("Agent {} switches from group {} to group {}", agent, own, target);
        let left = ctx.population.switch_group(agent, target, ctx.payoff);
        ctx.population.agent(agent).strategy().switched_group(agent, target);
        if ctx.config.fully_connect_groups {
            ctx.population.fully_connect(agent, ctx.graph);
        }
        let old_members = ctx.population.group(left).agents().to_vec();
        ctx.notify(&old_members, |m, s| s.notify_member(m, MemberEvent::Left(agent)))?;
        let new_members: Vec<AgentId> = ctx
            .population
            .group(target)
            .agents()
            .iter()
            .copied()
            .filter(|m| *m != agent)
            .collect();
        ctx.notify(&new_members, |m, s| s.notify_member(m, MemberEvent::Joined(agent)))?;
    }
    Ok(())
}

/// Multi-member groups vote on a member to expel. Self-votes leave at once
/// and are not counted; expelled agents move to an empty group.
pub(crate) fn expel(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.team_status(Phase::Expel);
    let groups: Vec<GroupId> = ctx
        .population
        .occupied_groups()
        .filter(|g| g.size() > 1)
        .map(|g| g.id())
        .collect();
    if groups.is_empty() {
        return Ok(());
    }
    let mut landing = ctx.population.empty_groups();
    landing.reverse();

    let voters: Vec<AgentId> = groups
        .iter()
        .flat_map(|g| ctx.population.group(*g).agents().to_vec())
        .collect();
    let jobs = ctx.jobs(voters.iter().copied());
    let votes = {
        let view = ctx.view();
        ctx.runner.run(Phase::Expel, &jobs, |a| {
            decide(&view, a, Phase::Expel, |s| s.expelvote(a, &view)).map(Option::flatten)
        })?
    };
    let mut by_voter: HashMap<AgentId, Option<AgentId>> = HashMap::with_capacity(voters.len());
    for (voter, vote) in voters.into_iter().zip(votes) {
        let group = ctx.population.agent(voter).group();
        let vote = vote.filter(|v| {
            let valid = ctx.population.group(group).contains(*v);
            if !valid {
                off_menu(Phase::Expel, voter, v);
            }
            valid
        });
        by_voter.insert(voter, vote);
    }

    for gid in groups {
        let members = ctx.population.group(gid).agents().to_vec();
        let mut leaving = Vec::new();
        let mut counted = Vec::new();
        for m in &members {
            let vote = by_voter.get(m).copied().flatten();
            if vote == Some(*m) {
                leaving.push(*m);
            } else {
                counted.push(vote);
            }
        }
        for m in &members {
            let now = ctx.population.agent(*m).current_pay();
            let vote = by_voter.get(m).copied().flatten();
            let projected = vote
                .map(|v| ctx.payoff.pay_without(ctx.population.group(gid), ctx.population.agent(v)))
                .unwrap_or(now);
            ctx.record(Phase::Expel, m.raw(), vote.map(|v| v.raw()), now, projected, vote.is_some());
        }

        let pick = tally(&counted, ctx.rng).flatten();
        if counted.is_empty() && leaving.is_empty() {
            warn!("{}", EngineError::protocol(Phase::Expel, format!("group {} received no votes", gid)));
        }
        let mut expelled = leaving.clone();
        if let Some(p) = pick {
            if !expelled.contains(&p) {
                expelled.push(p);
            }
        }

        for agent in expelled {
            if ctx.population.group(gid).size() <= 1 {
                break;
            }
            let Some(target) = landing.pop() else {
                warn!("No empty group left to take agent {}", agent);
                break;
            };
            debug!("Agent {} leaves group {} for empty group {}", agent, gid, target);
            ctx.population.switch_group(agent, target, ctx.payoff);
            ctx.population.agent(agent).strategy().switched_group(agent, target);
            let event = if leaving.contains(&agent) {
                MemberEvent::Left(agent)
            } else {
                MemberEvent::Expelled(Some(agent))
            };
            let rest = ctx.population.group(gid).agents().to_vec();
            ctx.notify(&rest, |m, s| s.notify_member(m, event))?;
        }
        if pick.is_none() {
            let rest = ctx.population.group(gid).agents().to_vec();
            ctx.notify(&rest, |m, s| s.notify_member(m, MemberEvent::Expelled(None)))?;
        }
    }
    Ok(())
}

/// Per-iteration bookkeeping; membership does not change.
pub(crate) fn postprocess_iter(ctx: &mut PhaseContext<'_>) -> Result<()> {
    ctx.team_status(Phase::IterationPostprocess);
    let agents: Vec<AgentId> = ctx.population.agents().iter().map(|a| a.id()).collect();
    let jobs = ctx.jobs(agents);
    {
        let view = ctx.view();
        ctx.runner.run(Phase::IterationPostprocess, &jobs, |a| {
            decide(&view, a, Phase::IterationPostprocess, |s| s.postprocess_iter(a, &view))
        })?;
    }
    ctx.population.clear_mailboxes();
    Ok(())
}

/// Mean pay of agents sharing a skill profile.
pub(crate) fn global_pay(population: &Population) -> BTreeMap<Vec<i32>, f64> {
    let mut sums: BTreeMap<Vec<i32>, (f64, usize)> = BTreeMap::new();
    for a in population.agents() {
        let entry = sums.entry(a.skills().as_slice().to_vec()).or_insert((0.0, 0));
        entry.0 += a.current_pay();
        entry.1 += 1;
    }
    sums.into_iter().map(|(k, (sum, n))| (k, sum / n as f64)).collect()
}

/// End-of-round hook for every agent, given the mean pay of its skill
/// profile.
pub(crate) fn postprocess_round(ctx: &mut PhaseContext<'_>) -> Result<()> {
    let averages = global_pay(ctx.population);
    let agents: Vec<AgentId> = ctx.population.agents().iter().map(|a| a.id()).collect();
    let jobs = ctx.jobs(agents);
    let view = ctx.view();
    ctx.runner.run(Phase::RoundPostprocess, &jobs, |a| {
        let pay = averages.get(view.population.agent(a).skills().as_slice()).copied();
        decide(&view, a, Phase::RoundPostprocess, |s| s.postprocess(a, &view, pay))
    })?;
    Ok(())
}

/// The contribution game, played once per round by every multi-member
/// group. Agents on their own skip it and keep their pay.
pub(crate) fn public_goods(ctx: &mut PhaseContext<'_>) -> Result<Vec<PublicGoodsRecord>> {
    ctx.population.refresh_all(ctx.payoff);
    ctx.team_status(Phase::PublicGoods);
    let pg = &ctx.config.public_goods;

    let (solo, players): (Vec<AgentId>, Vec<AgentId>) = ctx
        .population
        .agents()
        .iter()
        .map(|a| a.id())
        .partition(|a| ctx.population.group_of(*a).size() <= 1);

    let ratings_of = |members: &[AgentId]| -> Vec<f64> {
        members.iter().filter_map(|m| ctx.last_ratings.get(m).copied()).collect()
    };
    let stake_of = |pop: &Population, a: AgentId| pop.agent(a).current_pay().max(0.0).floor() as u32;

    let solo_jobs = ctx.jobs(solo.iter().copied());
    let play_jobs = ctx.jobs(players.iter().copied());
    let amounts = {
        let view = ctx.view();
        ctx.runner.run(Phase::RoundPostprocess, &solo_jobs, |a| {
            decide(&view, a, Phase::RoundPostprocess, |s| s.postprocess(a, &view, None))
        })?;
        ctx.runner.run(Phase::PublicGoods, &play_jobs, |a| {
            let stake = stake_of(view.population, a);
            let members = view.population.group_of(a).agents();
            let offered = public_goods::offered_multiplier(pg, &ratings_of(members));
            decide(&view, a, Phase::PublicGoods, |s| s.publicgoods(a, &view, stake, offered))
        })?
    };

    let mut teams: BTreeMap<GroupId, BTreeMap<AgentId, Contribution>> = BTreeMap::new();
    for (agent, amount) in players.iter().zip(amounts) {
        let stake = stake_of(ctx.population, *agent);
        let contribution = Contribution::from_stake(stake, amount.unwrap_or(0));
        teams
            .entry(ctx.population.agent(*agent).group())
            .or_default()
            .insert(*agent, contribution);
    }

    let mut outcomes: BTreeMap<AgentId, PublicGoodsOutcome> = BTreeMap::new();
    for (gid, team) in &teams {
        let members: Vec<AgentId> = team.keys().copied().collect();
        let shares: Vec<f64> = team.values().map(|c| c.share()).collect();
        let multiplier = public_goods::actual_multiplier(pg, &shares, &ratings_of(&members));
        outcomes.extend(public_goods::settle(*gid, team, multiplier));
    }
    for (agent, outcome) in &outcomes {
        ctx.population.agent_mut(*agent).set_pay(outcome.final_pay());
    }

    let jobs = ctx.jobs(outcomes.keys().copied());
    {
        let view = ctx.view();
        let outcomes = &outcomes;
        ctx.runner.run(Phase::PublicGoods, &jobs, |a| {
            decide(&view, a, Phase::PublicGoods, |s| s.publicgoods_postprocess(a, &view, &outcomes[&a]))
        })?;
    }

    let records: Vec<PublicGoodsRecord> = ctx
        .population
        .agents()
        .iter()
        .map(|a| {
            let outcome = outcomes.get(&a.id());
            PublicGoodsRecord {
                round: ctx.round,
                agent: a.id(),
                group: a.group(),
                contributed: outcome.map(|o| o.contribution.contributed),
                kept: outcome.map(|o| o.contribution.kept),
                pay: a.current_pay(),
                multiplier: outcome.map(|o| o.multiplier),
                shared: outcome.map(|o| o.shared),
            }
        })
        .collect();
    for record in &records {
        ctx.log.record_public_goods(record.clone());
    }
    Ok(records)
}

/// Collects peer ratings, averages them per rated agent and, if configured,
/// shows the averages back to everyone.
pub(crate) fn ratings(ctx: &mut PhaseContext<'_>) -> Result<BTreeMap<AgentId, f64>> {
    let agents: Vec<AgentId> = ctx.population.agents().iter().map(|a| a.id()).collect();
    let jobs = ctx.jobs(agents.iter().copied());
    let view = ctx.view();
    let posted = ctx.runner.run(Phase::Ratings, &jobs, |a| {
        decide(&view, a, Phase::Ratings, |s| s.ratings(a))
    })?;

    let mut sums: BTreeMap<AgentId, (f64, usize)> = BTreeMap::new();
    for (rater, ratings) in agents.iter().zip(posted) {
        for (rated, r) in ratings.unwrap_or_default() {
            if rated == *rater || rated.index() >= view.population.len() {
                continue;
            }
            let entry = sums.entry(rated).or_insert((0.0, 0));
            entry.0 += f64::from(r);
            entry.1 += 1;
        }
    }
    let global: BTreeMap<AgentId, f64> = sums.into_iter().map(|(a, (sum, n))| (a, sum / n as f64)).collect();

    if ctx.config.ratings.show_global {
        let global = &global;
        ctx.runner.run(Phase::Ratings, &jobs, |a| {
            decide(&view, a, Phase::Ratings, |s| s.update_ratings(a, global))
        })?;
    }
    Ok(global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn tally_picks_the_majority() {
        let mut rng = StdRng::seed_from_u64(1);
        let votes = [Some(3u32), None, Some(3), Some(5)];
        assert_eq!(tally(&votes, &mut rng), Some(Some(3)));
        assert_eq!(tally::<u32>(&[None, None, Some(1)], &mut rng), Some(None));
        assert_eq!(tally::<u32>(&[], &mut rng), None);
    }

    #[test]
    fn tally_ties_are_random_among_leaders() {
        let mut rng = StdRng::seed_from_u64(2);
        let votes = [Some(1u32), Some(2), None];
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..100 {
            seen.insert(tally(&votes, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
}
