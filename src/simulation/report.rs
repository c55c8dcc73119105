use crate::ids::{AgentId, GroupId};
use crate::metrics::{PublicGoodsRecord, UltimatumRecord};
use crate::model::GroupSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a round's iteration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Assignment unchanged for more than the configured dead iterations.
    Converged,
    OutOfSteps,
    OutOfTime,
    Cancelled,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::Converged => "converged",
            EndReason::OutOfSteps => "out of steps",
            EndReason::OutOfTime => "out of time",
            EndReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    pub iterations: u32,
    pub end_reason: EndReason,
    pub elapsed_secs: f64,
    /// Group id per agent, in agent order.
    pub assignment: Vec<GroupId>,
    /// Occupied groups only.
    pub groups: Vec<GroupSnapshot>,
    /// Final pay per agent, after the public goods game if it was played.
    pub pay: Vec<f64>,
    pub public_goods: Vec<PublicGoodsRecord>,
    pub ratings: BTreeMap<AgentId, f64>,
}

impl RoundReport {
    pub fn team_count(&self) -> usize {
        self.groups.len()
    }

    pub fn largest_team(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).max().unwrap_or(0)
    }

    pub fn singletons(&self) -> usize {
        self.groups.iter().filter(|g| g.members.len() == 1).count()
    }

    pub fn total_pay(&self) -> f64 {
        self.pay.iter().sum()
    }

    pub fn mean_pay(&self) -> f64 {
        if self.pay.is_empty() {
            0.0
        } else {
            self.total_pay() / self.pay.len() as f64
        }
    }

    /// Share of each stake that went into the pot, over every agent that played.
    pub fn contribution_rate(&self) -> Option<f64> {
        let (given, staked) = self
            .public_goods
            .iter()
            .filter_map(|r| Some((r.contributed?, r.contributed? + r.kept?)))
            .fold((0u64, 0u64), |(g, s), (c, t)| (g + u64::from(c), s + u64::from(t)));
        (staked > 0).then(|| given as f64 / staked as f64)
    }
}

/// Everything one session produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub name: String,
    pub seed: Option<u64>,
    pub agents: usize,
    pub strategy: String,
    pub ultimatum: Vec<UltimatumRecord>,
    pub rounds: Vec<RoundReport>,
    pub elapsed_secs: f64,
}

impl SessionReport {
    pub fn converged_rounds(&self) -> usize {
        self.rounds
            .iter()
            .filter(|r| r.end_reason == EndReason::Converged)
            .count()
    }

    pub fn mean_pay(&self) -> f64 {
        if self.rounds.is_empty() {
            return 0.0;
        }
        self.rounds.iter().map(|r| r.mean_pay()).sum::<f64>() / self.rounds.len() as f64
    }

    pub fn mean_iterations(&self) -> f64 {
        if self.rounds.is_empty() {
            return 0.0;
        }
        self.rounds.iter().map(|r| f64::from(r.iterations)).sum::<f64>() / self.rounds.len() as f64
    }

    pub fn mean_team_count(&self) -> f64 {
        if self.rounds.is_empty() {
            return 0.0;
        }
        self.rounds.iter().map(|r| r.team_count() as f64).sum::<f64>() / self.rounds.len() as f64
    }

    pub fn ultimatum_acceptance(&self) -> Option<f64> {
        if self.ultimatum.is_empty() {
            return None;
        }
        let accepted = self.ultimatum.iter().filter(|u| u.accepted).count();
        Some(accepted as f64 / self.ultimatum.len() as f64)
    }

    pub fn was_cancelled(&self) -> bool {
        self.rounds.iter().any(|r| r.end_reason == EndReason::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: u32, members: &[u32], pay: f64) -> GroupSnapshot {
        GroupSnapshot {
            id: GroupId::new(id),
            members: members.iter().map(|m| AgentId::new(*m)).collect(),
            skills: vec![],
            pay,
        }
    }

    fn record(agent: u32, contributed: Option<u32>, kept: Option<u32>) -> PublicGoodsRecord {
        PublicGoodsRecord {
            round: 0,
            agent: AgentId::new(agent),
            group: GroupId::new(0),
            contributed,
            kept,
            pay: 0.0,
            multiplier: None,
            shared: None,
        }
    }

    #[test]
    fn round_summaries() {
        let report = RoundReport {
            round: 0,
            iterations: 3,
            end_reason: EndReason::Converged,
            elapsed_secs: 0.1,
            assignment: vec![GroupId::new(0), GroupId::new(0), GroupId::new(2)],
            groups: vec![group(0, &[0, 1], 5.0), group(2, &[2], 0.0)],
            pay: vec![5.0, 5.0, 2.0],
            public_goods: vec![record(0, Some(3), Some(1)), record(1, Some(1), Some(3)), record(2, None, None)],
            ratings: BTreeMap::new(),
        };
        assert_eq!(report.team_count(), 2);
        assert_eq!(report.largest_team(), 2);
        assert_eq!(report.singletons(), 1);
        assert_eq!(report.mean_pay(), 4.0);
        assert_eq!(report.contribution_rate(), Some(0.5));
    }

    #[test]
    fn end_reason_labels() {
        assert_eq!(EndReason::OutOfTime.to_string(), "out of time");
        assert_eq!(serde_json::to_string(&EndReason::OutOfSteps).unwrap(), "\"out_of_steps\"");
    }
}
