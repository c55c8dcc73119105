use super::{DecisionView, Disposition, OfferProfile, Strategy, StrategyParams};
use crate::error::Result;
use crate::ids::{AgentId, Candidate, GroupId};
use crate::simulation::public_goods::PotMultiplier;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};

/// Picks uniformly among its options, "none" included.
#[derive(Debug)]
pub struct RandomStrategy {
    rng: StdRng,
    offers: OfferProfile,
}

impl RandomStrategy {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            rng: StdRng::seed_from_u64(params.agent_seed()),
            offers: OfferProfile::default(),
        }
    }

    fn pick_or_none<T: Copy>(&mut self, options: &[T]) -> Option<T> {
        // options.len() + 1 slots, the last one meaning "none"
        let slot = self.rng.gen_range(0..=options.len());
        options.get(slot).copied()
    }
}

impl Strategy for RandomStrategy {
    fn name(&self) -> &str {
        "random"
    }

    /// Applies to a random subset of neighbouring groups, never all of them.
    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        let groups = view.population.neighbor_groups(me);
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let count = self.rng.gen_range(0..groups.len());
        Ok(groups.into_iter().choose_multiple(&mut self.rng, count))
    }

    fn acceptvote(
        &mut self,
        _me: AgentId,
        _view: &DecisionView<'_>,
        applicants: &[Candidate],
    ) -> Result<Option<Candidate>> {
        Ok(self.pick_or_none(applicants))
    }

    fn consider(&mut self, _me: AgentId, _view: &DecisionView<'_>, acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        Ok(self.pick_or_none(acceptances))
    }

    fn expelvote(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        let members = view.population.group_of(me).agents().to_vec();
        Ok(self.pick_or_none(&members))
    }

    fn publicgoods(
        &mut self,
        _me: AgentId,
        _view: &DecisionView<'_>,
        stake: u32,
        _multiplier: PotMultiplier,
    ) -> Result<u32> {
        Ok(self.rng.gen_range(0..=stake))
    }

    fn set_disposition(&mut self, disposition: Disposition) {
        self.offers = disposition.offer_profile();
    }

    fn ask_for_offer(&mut self, _me: AgentId, _other: AgentId) -> Result<u8> {
        Ok(self.offers.offer(&mut self.rng))
    }

    fn decide_offer(&mut self, _me: AgentId, _other: AgentId, amount: u8) -> Result<bool> {
        Ok(self.offers.accepts(amount, &mut self.rng))
    }

    fn reset(&mut self) {}
}
