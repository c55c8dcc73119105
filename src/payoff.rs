use crate::error::{EngineError, Phase, Result};
use crate::ids::AgentId;
use crate::model::{Actor, Agent, Group, Skills};
use dashmap::DashMap;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    BreadthDepth,
    BreadthDepth2,
    MemberCount,
    Equality,
}

/// A skill profile that unlocks `pay` when every level is met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub skills: Vec<i32>,
    pub pay: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub kind: TaskKind,
    pub synergy: f64,
    /// Only read by `TaskKind::Equality`. Empty means one all-ones
    /// requirement and one all-twos requirement.
    pub requirements: Vec<TaskRequirement>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            kind: TaskKind::BreadthDepth,
            synergy: 5.0,
            requirements: Vec::new(),
        }
    }
}

/// Maps a team's pooled skills to a payoff and splits it among members.
///
/// Task values are memoized per skill vector. The memo is shared by every
/// decider in a phase, so it sits in a `DashMap`.
#[derive(Debug)]
pub struct PayoffModel {
    kind: TaskKind,
    nskills: usize,
    bias: bool,
    pays: Vec<f64>,
    values: Vec<f64>,
    requirements: Vec<TaskRequirement>,
    memo: DashMap<Vec<i32>, f64>,
}

impl PayoffModel {
    pub fn new(cfg: &TaskConfig, nskills: usize, bias: bool) -> Self {
        // pays[i] = (i + 1) * (i * synergy): 0, 10, 30, 60, ... for synergy 5
        let pays = (0..nskills)
            .map(|i| (i + 1) as f64 * (i as f64 * cfg.synergy))
            .collect();
        let requirements = if cfg.requirements.is_empty() {
            let base = pays_top(nskills, cfg.synergy);
            vec![
                TaskRequirement { skills: vec![1; nskills], pay: base },
                TaskRequirement { skills: vec![2; nskills], pay: base * 2.5 },
            ]
        } else {
            cfg.requirements.clone()
        };
        Self {
            kind: cfg.kind,
            nskills,
            bias,
            pays,
            values: (1..=nskills).map(|v| v as f64).collect(),
            requirements,
            memo: DashMap::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_biased(&self) -> bool {
        self.bias
    }

    /// Per-skill values for `BreadthDepth2`. The high-paying skill changes
    /// each round, so cached task values are dropped.
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.kind != TaskKind::BreadthDepth2 {
            return;
        }
        self.values.shuffle(rng);
        self.memo.clear();
        debug!("Skill values for this round: {:?}", self.values);
    }

    pub fn task(&self, skills: &Skills) -> f64 {
        if skills.is_empty() {
            return 0.0;
        }
        if let Some(pay) = self.memo.get(skills.as_slice()) {
            return *pay;
        }
        let pay = self.evaluate(skills.as_slice());
        self.memo.insert(skills.as_slice().to_vec(), pay);
        pay
    }

    fn evaluate(&self, skills: &[i32]) -> f64 {
        let n = self.nskills;
        let top = skills.iter().copied().max().unwrap_or(0).max(0) as usize;
        let depth = top.min(n).saturating_sub(1);
        let breadth = skills.iter().filter(|s| **s != 0).count().min(n).saturating_sub(1);
        match self.kind {
            TaskKind::BreadthDepth => self.pays[depth] + self.pays[breadth],
            TaskKind::BreadthDepth2 => {
                let best = skills.iter().position(|s| *s as usize == top).unwrap_or(0);
                let present: f64 = skills
                    .iter()
                    .zip(&self.values)
                    .filter(|(s, _)| **s > 0)
                    .map(|(_, v)| v)
                    .sum();
                self.pays[depth] * self.values[best] * (depth + 1) as f64 + self.pays[breadth] * present
            }
            TaskKind::MemberCount => {
                let members = skills.iter().sum::<i32>().max(0) as usize;
                let m = members.min(n) as f64;
                m * 5.0 * (m - 1.0).max(0.0)
            }
            TaskKind::Equality => self
                .requirements
                .iter()
                .filter(|req| skills.iter().zip(&req.skills).all(|(have, need)| have >= need))
                .map(|req| req.pay)
                .fold(0.0, f64::max),
        }
    }

    /// Even split of `task(skills)` across `size` members.
    pub fn share(&self, skills: &Skills, size: usize) -> f64 {
        if size == 0 {
            return 0.0;
        }
        self.task(skills) / size as f64
    }

    /// `earns / n * agent's mean opinion of members`.
    pub fn biased_share(&self, agent: &Agent, earns: f64, members: &[AgentId]) -> f64 {
        if members.is_empty() {
            return 0.0;
        }
        earns / members.len() as f64 * agent.bias_avg(members)
    }

    /// What `agent` earns as a member of `group` right now.
    pub fn member_pay(&self, agent: &Agent, group: &Group) -> f64 {
        if self.bias {
            self.biased_share(agent, self.task(group.skills()), group.agents())
        } else {
            self.share(group.skills(), group.size())
        }
    }

    pub fn group_pay<'a>(&self, group: &Group, members: impl Iterator<Item = &'a Agent>) -> f64 {
        if group.is_empty() {
            return 0.0;
        }
        if self.bias {
            let earns = self.task(group.skills());
            let total: f64 = members
                .map(|a| self.biased_share(a, earns, group.agents()))
                .sum();
            total / group.size() as f64
        } else {
            self.share(group.skills(), group.size())
        }
    }

    /// What `agent` would earn after joining `group`.
    pub fn projected_join_pay(&self, agent: &Agent, group: &Group) -> f64 {
        let skills = group.with_skills(agent.skills());
        if self.bias {
            let mut members = group.agents().to_vec();
            members.push(agent.id());
            self.biased_share(agent, self.task(&skills), &members)
        } else {
            self.share(&skills, group.size() + 1)
        }
    }

    /// Per-member pay if `actor` merged into `group`.
    pub fn projected_merge_pay(&self, group: &Group, actor: &dyn Actor) -> f64 {
        self.share(&group.with_skills(actor.skills()), group.size() + actor.size())
    }

    /// Per-member pay of `group` with `agent` removed.
    pub fn pay_without(&self, group: &Group, agent: &Agent) -> f64 {
        self.share(&group.without_skills(agent.skills()), group.size().saturating_sub(1))
    }

    /// Phases that reason about summed payoff deltas have no bias variant.
    pub fn require_unbiased(&self, phase: Phase) -> Result<()> {
        if self.bias {
            return Err(EngineError::config(
                phase,
                "bias-weighted payoff is not supported for this phase",
            ));
        }
        Ok(())
    }

    pub fn cached_profiles(&self) -> usize {
        self.memo.len()
    }
}

fn pays_top(nskills: usize, synergy: f64) -> f64 {
    let n = nskills.max(1);
    n as f64 * ((n - 1) as f64 * synergy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model(kind: TaskKind, nskills: usize) -> PayoffModel {
        let cfg = TaskConfig { kind, ..TaskConfig::default() };
        PayoffModel::new(&cfg, nskills, false)
    }

    fn s(v: &[i32]) -> Skills {
        Skills::from_vec(v.to_vec())
    }

    #[test]
    fn breadth_depth_table() {
        let m = model(TaskKind::BreadthDepth, 4);
        assert_eq!(m.task(&s(&[1, 0, 0, 0])), 0.0);
        assert_eq!(m.task(&s(&[1, 1, 0, 0])), 10.0);
        assert_eq!(m.task(&s(&[1, 1, 1, 0])), 30.0);
        assert_eq!(m.task(&s(&[1, 1, 1, 1])), 60.0);
        assert_eq!(m.task(&s(&[2, 1, 1, 1])), 70.0);
        assert_eq!(m.task(&s(&[9, 0, 0, 0])), 60.0);
        assert_eq!(m.task(&s(&[0, 0, 0, 0])), 0.0);
        assert!(m.cached_profiles() >= 5);
    }

    #[test]
    fn four_skill_team_beats_singletons() {
        let m = model(TaskKind::BreadthDepth, 4);
        let team = m.share(&s(&[1, 1, 1, 1]), 4);
        let solo = m.share(&s(&[1, 0, 0, 0]), 1);
        assert!(team * 4.0 > solo * 4.0);
        assert_eq!(team, 15.0);
    }

    #[test]
    fn member_count_caps_at_nskills() {
        let m = model(TaskKind::MemberCount, 4);
        assert_eq!(m.task(&s(&[1, 0, 0, 0])), 0.0);
        assert_eq!(m.task(&s(&[1, 1, 0, 0])), 10.0);
        assert_eq!(m.task(&s(&[2, 2, 2, 0])), 60.0);
    }

    #[test]
    fn breadth_depth2_uses_skill_values() {
        let mut m = model(TaskKind::BreadthDepth2, 3);
        // values 1,2,3; pays 0,10,30
        assert_eq!(m.task(&s(&[0, 0, 2])), 10.0 * 3.0 * 2.0);
        m.reshuffle(&mut StdRng::seed_from_u64(1));
        assert_eq!(m.cached_profiles(), 0);
        let mut sorted = m.values.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn equality_needs_every_required_level() {
        let cfg = TaskConfig {
            kind: TaskKind::Equality,
            synergy: 5.0,
            requirements: vec![
                TaskRequirement { skills: vec![1, 1], pay: 20.0 },
                TaskRequirement { skills: vec![2, 1], pay: 45.0 },
            ],
        };
        let m = PayoffModel::new(&cfg, 2, false);
        assert_eq!(m.task(&s(&[1, 0])), 0.0);
        assert_eq!(m.task(&s(&[1, 3])), 20.0);
        assert_eq!(m.task(&s(&[2, 1])), 45.0);
    }

    #[test]
    fn bias_mode_rejects_delta_phases() {
        let m = PayoffModel::new(&TaskConfig::default(), 2, true);
        assert!(m.require_unbiased(Phase::GroupMerge).is_err());
        assert!(model(TaskKind::BreadthDepth, 2).require_unbiased(Phase::GroupMerge).is_ok());
    }
}
