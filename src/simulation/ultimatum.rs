use super::concurrency::PairScheduler;
use super::config::UltimatumConfig;
use crate::error::{EngineError, Phase, Result};
use crate::graph::SocialGraph;
use crate::ids::AgentId;
use crate::metrics::{DecisionLog, UltimatumRecord};
use crate::model::Population;
use crate::strategies::Disposition;
use rand::Rng;
use rand::seq::SliceRandom;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;
use tracing::{debug, info};

/// Hands out dispositions to simulated agents.
///
/// With a conditional share, that many agents (after a shuffle) become
/// conditional and the rest alternate nice and mean. Otherwise agents cycle
/// through nice, mean, fair and random from a random starting point.
pub fn assign_dispositions<R: Rng + ?Sized>(
    population: &mut Population,
    percent_conditional: f64,
    rng: &mut R,
) -> Vec<(AgentId, Disposition)> {
    let mut sims: Vec<AgentId> = population.agents().iter().filter(|a| !a.is_human()).map(|a| a.id()).collect();
    let mut out = Vec::with_capacity(sims.len());
    if percent_conditional > 0.0 {
        sims.shuffle(rng);
        let conditional = (percent_conditional * sims.len() as f64) as usize;
        for (i, id) in sims.iter().enumerate() {
            let d = if i < conditional {
                Disposition::Conditional
            } else {
                [Disposition::Nice, Disposition::Mean][(i - conditional) % 2]
            };
            out.push((*id, d));
        }
    } else {
        let start = rng.gen_range(0..Disposition::CYCLE.len());
        for (i, id) in sims.iter().enumerate() {
            out.push((*id, Disposition::CYCLE[(i + start) % Disposition::CYCLE.len()]));
        }
    }
    for (id, d) in &out {
        let agent = population.agent_mut(*id);
        agent.set_disposition(*d);
        agent.strategy_mut().set_disposition(*d);
    }
    out
}

/// Ordered pairs to play: every edge touching a human (or every edge), in
/// both directions, shuffled.
pub fn pairings<R: Rng + ?Sized>(
    population: &Population,
    graph: &SocialGraph,
    all_participants: bool,
    rng: &mut R,
) -> Vec<(AgentId, AgentId)> {
    let mut jobs = Vec::new();
    for (u, v, _) in graph.edges() {
        let involved = all_participants || population.agent(u).is_human() || population.agent(v).is_human();
        if involved {
            jobs.push((u, v));
            jobs.push((v, u));
        }
    }
    jobs.shuffle(rng);
    jobs
}

fn play(population: &Population, giver: AgentId, receiver: AgentId) -> Result<UltimatumRecord> {
    let started = Instant::now();
    let amount = population.agent(giver).strategy().ask_for_offer(giver, receiver)?;
    let accepted = population
        .agent(receiver)
        .strategy()
        .decide_offer(receiver, giver, amount)?;
    population
        .agent(giver)
        .strategy()
        .ultimatum_conclusion(giver, receiver, amount, accepted)?;
    population
        .agent(receiver)
        .strategy()
        .ultimatum_conclusion(receiver, giver, amount, accepted)?;
    Ok(UltimatumRecord {
        giver,
        receiver,
        amount,
        accepted,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

/// Plays the pairwise ultimatum pregame.
///
/// A pair starts only when neither side is in another session; the
/// scheduler otherwise waits for a session to end (or the retry interval)
/// and tries again. Every session runs `iterations` games on its own thread.
pub fn run<R: Rng + ?Sized>(
    population: &Population,
    graph: &SocialGraph,
    cfg: &UltimatumConfig,
    log: &dyn DecisionLog,
    rng: &mut R,
) -> Result<Vec<UltimatumRecord>> {
    let mut pending = pairings(population, graph, cfg.all_participants, rng);
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    info!("Ultimatum pregame: {} sessions", pending.len());
    let scheduler = PairScheduler::new(population.len(), cfg.retry);
    let iterations = cfg.iterations;

    let outcome = crossbeam::scope(|s| {
        let scheduler = &scheduler;
        let mut handles = Vec::new();
        while !pending.is_empty() {
            let mut waiting = Vec::new();
            for (giver, receiver) in std::mem::take(&mut pending) {
                if scheduler.try_claim(giver, receiver) {
                    debug!("Starting ultimatum between {} and {}", giver, receiver);
                    handles.push((
                        giver,
                        s.spawn(move |_| {
                            let games = catch_unwind(AssertUnwindSafe(|| {
                                (0..iterations)
                                    .map(|_| play(population, giver, receiver))
                                    .collect::<Result<Vec<_>>>()
                            }))
                            .unwrap_or(Err(EngineError::WorkerPanicked {
                                agent: giver,
                                phase: Phase::Ultimatum,
                            }));
                            scheduler.release(giver, receiver);
                            games
                        }),
                    ));
                } else {
                    waiting.push((giver, receiver));
                }
            }
            pending = waiting;
            if !pending.is_empty() {
                scheduler.wait();
            }
        }

        let mut records = Vec::new();
        let mut first_error = None;
        for (giver, handle) in handles {
            let result = handle.join().unwrap_or(Err(EngineError::WorkerPanicked {
                agent: giver,
                phase: Phase::Ultimatum,
            }));
            match result {
                Ok(games) => records.extend(games),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(records),
        }
    });

    let records = outcome.map_err(|_| EngineError::WorkerPanicked {
        agent: AgentId::new(0),
        phase: Phase::Ultimatum,
    })??;
    for record in &records {
        log.record_ultimatum(record.clone());
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::model::{Agent, Skills};
    use crate::payoff::{PayoffModel, TaskConfig};
    use crate::strategies::passive::Passive;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn population(kinds: &[NodeKind]) -> (Population, SocialGraph) {
        let n = kinds.len();
        let graph = SocialGraph::complete(n, 1);
        let payoff = PayoffModel::new(&TaskConfig::default(), 1, false);
        let agents = kinds
            .iter()
            .enumerate()
            .map(|(i, k)| Agent::new(AgentId::new(i as u32), Skills::unit(1, 0), *k, Box::new(Passive::new())))
            .collect();
        (Population::new(1, agents, &graph, &payoff).unwrap(), graph)
    }

    #[test]
    fn conditional_share_then_nice_and_mean() {
        let (mut pop, _) = population(&[NodeKind::Greedy; 10]);
        let out = assign_dispositions(&mut pop, 0.3, &mut StdRng::seed_from_u64(1));
        let conditional = out.iter().filter(|(_, d)| *d == Disposition::Conditional).count();
        assert_eq!(conditional, 3);
        assert!(out
            .iter()
            .all(|(_, d)| matches!(d, Disposition::Conditional | Disposition::Nice | Disposition::Mean)));
        assert!(pop.agents().iter().all(|a| a.disposition().is_some()));
    }

    #[test]
    fn humans_get_no_disposition() {
        let (mut pop, _) = population(&[NodeKind::Human, NodeKind::Greedy, NodeKind::Greedy]);
        let out = assign_dispositions(&mut pop, 0.0, &mut StdRng::seed_from_u64(2));
        assert_eq!(out.len(), 2);
        assert!(pop.agent(AgentId::new(0)).disposition().is_none());
        assert_ne!(out[0].1, out[1].1);
    }

    #[test]
    fn pairings_touch_a_human() {
        let (pop, graph) = population(&[NodeKind::Human, NodeKind::Greedy, NodeKind::Greedy]);
        let pairs = pairings(&pop, &graph, false, &mut StdRng::seed_from_u64(3));
        assert_eq!(pairs.len(), 4);
        assert!(pairs.iter().all(|(u, v)| u.raw() == 0 || v.raw() == 0));
        assert_eq!(pairings(&pop, &graph, true, &mut StdRng::seed_from_u64(3)).len(), 6);
    }
}
