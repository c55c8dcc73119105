use super::config::{AltPublicGoods, PublicGoodsConfig};
use crate::ids::{AgentId, GroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pot multiplier as shown to a participant before contributing: a known
/// flat factor, or the range the logistic multiplier can end up in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PotMultiplier {
    Flat(f64),
    Range { low: f64, high: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contribution {
    pub contributed: u32,
    pub kept: u32,
}

impl Contribution {
    pub fn new(contributed: u32, kept: u32) -> Self {
        Self { contributed, kept }
    }

    /// Splits a whole-number stake; the contribution is capped at the stake.
    pub fn from_stake(stake: u32, contributed: u32) -> Self {
        let contributed = contributed.min(stake);
        Self::new(contributed, stake - contributed)
    }

    pub fn stake(&self) -> u32 {
        self.contributed + self.kept
    }

    /// Fraction of the stake contributed; 0 for an empty stake.
    pub fn share(&self) -> f64 {
        match self.stake() {
            0 => 0.0,
            stake => f64::from(self.contributed) / f64::from(stake),
        }
    }
}

/// What one member gets back from its group's pot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicGoodsOutcome {
    pub group: GroupId,
    pub contribution: Contribution,
    pub multiplier: f64,
    /// This member's slice of the multiplied pot.
    pub shared: f64,
    /// Every member's contribution, this one included.
    pub team: BTreeMap<AgentId, Contribution>,
}

impl PublicGoodsOutcome {
    pub fn final_pay(&self) -> f64 {
        f64::from(self.contribution.kept) + self.shared
    }
}

impl AltPublicGoods {
    /// `min + (max - min) / (1 + exp(-b3 * c))` with `c` the mean share
    /// contributed scaled to -1.5..1.5 and `b3` growing with the mean peer
    /// rating (3 when nobody has been rated).
    pub fn multiplier(&self, shares: &[f64], ratings: &[f64]) -> f64 {
        let mean_share = if shares.is_empty() {
            0.0
        } else {
            shares.iter().sum::<f64>() / shares.len() as f64
        };
        let scaled = (mean_share - 0.5) * 3.0;
        let mean_rating = if ratings.is_empty() {
            3.0
        } else {
            ratings.iter().sum::<f64>() / ratings.len() as f64
        };
        let b3 = self.rating_intercept + self.rating_slope * (mean_rating - 1.0);
        self.min_multiplier + (self.max_multiplier - self.min_multiplier) / (1.0 + (-b3 * scaled).exp())
    }
}

/// Multiplier a group's members are told about before they contribute.
pub fn offered_multiplier(cfg: &PublicGoodsConfig, ratings: &[f64]) -> PotMultiplier {
    match &cfg.alt {
        Some(alt) => PotMultiplier::Range {
            low: alt.multiplier(&[0.0], ratings),
            high: alt.multiplier(&[1.0], ratings),
        },
        None => PotMultiplier::Flat(cfg.flat_multiplier()),
    }
}

/// Multiplier actually applied once contributions are in.
pub fn actual_multiplier(cfg: &PublicGoodsConfig, shares: &[f64], ratings: &[f64]) -> f64 {
    match &cfg.alt {
        Some(alt) => alt.multiplier(shares, ratings),
        None => cfg.flat_multiplier(),
    }
}

/// Pools a group's contributions, multiplies the pot and splits it evenly.
pub fn settle(
    group: GroupId,
    team: &BTreeMap<AgentId, Contribution>,
    multiplier: f64,
) -> BTreeMap<AgentId, PublicGoodsOutcome> {
    if team.is_empty() {
        return BTreeMap::new();
    }
    let pot: u32 = team.values().map(|c| c.contributed).sum();
    let shared = f64::from(pot) * multiplier / team.len() as f64;
    team.iter()
        .map(|(aid, c)| {
            let outcome = PublicGoodsOutcome {
                group,
                contribution: *c,
                multiplier,
                shared,
                team: team.clone(),
            };
            (*aid, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn team(entries: &[(u32, u32, u32)]) -> BTreeMap<AgentId, Contribution> {
        entries
            .iter()
            .map(|(id, c, k)| (AgentId::new(*id), Contribution::new(*c, *k)))
            .collect()
    }

    #[test]
    fn three_member_pot() {
        let t = team(&[(0, 5, 5), (1, 0, 10), (2, 10, 0)]);
        let out = settle(GroupId::new(0), &t, 1.2);
        assert!((out[&AgentId::new(0)].shared - 6.0).abs() < 1e-9);
        assert!((out[&AgentId::new(1)].final_pay() - 16.0).abs() < 1e-9);
        assert!((out[&AgentId::new(2)].final_pay() - 6.0).abs() < 1e-9);
        assert!((out[&AgentId::new(0)].final_pay() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn flat_and_alternate_multipliers() {
        let mut cfg = PublicGoodsConfig::default();
        assert_eq!(offered_multiplier(&cfg, &[]), PotMultiplier::Flat(1.25));
        cfg.alt = Some(AltPublicGoods::default());
        let PotMultiplier::Range { low, high } = offered_multiplier(&cfg, &[]) else {
            panic!("alternate mode offers a range");
        };
        assert!(low < high);
        assert!(low > 1.10 && high < 2.00);
        // half contribution sits at the logistic midpoint
        let mid = actual_multiplier(&cfg, &[0.5], &[5.0]);
        assert!((mid - 1.55).abs() < 1e-9);
        // better ratings make the curve steeper
        let rated = actual_multiplier(&cfg, &[1.0], &[5.0]);
        let unrated = actual_multiplier(&cfg, &[1.0], &[]);
        assert!(rated > unrated);
    }

    #[test]
    fn empty_stake_has_zero_share() {
        assert_eq!(Contribution::new(0, 0).share(), 0.0);
        assert_eq!(Contribution::from_stake(4, 9), Contribution::new(4, 0));
    }

    proptest! {
        #[test]
        fn pay_is_conserved(
            stakes in prop::collection::vec((0u32..100, 0u32..100), 2..8),
            multiplier in 1.0f64..3.0,
        ) {
            let t: BTreeMap<AgentId, Contribution> = stakes
                .iter()
                .enumerate()
                .map(|(i, (c, k))| (AgentId::new(i as u32), Contribution::new(*c, *k)))
                .collect();
            let out = settle(GroupId::new(0), &t, multiplier);
            let paid: f64 = out.values().map(|o| o.final_pay()).sum();
            let kept: f64 = t.values().map(|c| f64::from(c.kept)).sum();
            let pot: f64 = t.values().map(|c| f64::from(c.contributed)).sum();
            prop_assert!((paid - (kept + pot * multiplier)).abs() < 1e-6);
        }
    }
}
