use super::{DecisionView, Strategy};
use crate::error::Result;
use crate::ids::{AgentId, Candidate, GroupId};
use crate::simulation::public_goods::PotMultiplier;

/// Never applies, never votes, never moves and never contributes.
#[derive(Debug, Default)]
pub struct Passive;

impl Passive {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Passive {
    fn name(&self) -> &str {
        "passive"
    }

    fn propose(&mut self, _me: AgentId, _view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        Ok(Vec::new())
    }

    fn acceptvote(
        &mut self,
        _me: AgentId,
        _view: &DecisionView<'_>,
        _applicants: &[Candidate],
    ) -> Result<Option<Candidate>> {
        Ok(None)
    }

    fn consider(&mut self, _me: AgentId, _view: &DecisionView<'_>, _acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        Ok(None)
    }

    fn expelvote(&mut self, _me: AgentId, _view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        Ok(None)
    }

    fn publicgoods(
        &mut self,
        _me: AgentId,
        _view: &DecisionView<'_>,
        _stake: u32,
        _multiplier: PotMultiplier,
    ) -> Result<u32> {
        Ok(0)
    }

    fn reset(&mut self) {}
}
