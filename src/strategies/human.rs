use super::{DecisionView, MemberEvent, Strategy};
use crate::error::{EngineError, Phase, Result};
use crate::ids::{AgentId, Candidate, GroupId};
use crate::model::Actor;
use crate::simulation::public_goods::{PotMultiplier, PublicGoodsOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use tracing::warn;

/// One option shown to a participant: who, with whom, and what it pays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub candidate: Candidate,
    pub members: Vec<AgentId>,
    pub current_pay: f64,
    pub projected_pay: f64,
}

/// Bridge to a real person. Every call may block for as long as the person
/// takes; an `Err` means the participant is gone and fails the round.
pub trait HumanInterface: Send + Sync {
    fn propose(&mut self, me: AgentId, options: &[Offer]) -> io::Result<Vec<GroupId>>;

    fn accept_vote(&mut self, me: AgentId, applicants: &[Offer]) -> io::Result<Option<Candidate>>;

    fn join(&mut self, me: AgentId, acceptances: &[Offer]) -> io::Result<Option<GroupId>>;

    fn expel_vote(&mut self, me: AgentId, members: &[Offer]) -> io::Result<Option<AgentId>>;

    fn public_goods(&mut self, me: AgentId, stake: u32, multiplier: PotMultiplier) -> io::Result<u32>;

    fn show_public_goods(&mut self, _me: AgentId, _outcome: &PublicGoodsOutcome) -> io::Result<()> {
        Ok(())
    }

    fn group_accepted(&mut self, _me: AgentId, _accepted: Option<Candidate>) -> io::Result<()> {
        Ok(())
    }

    fn member_changed(&mut self, _me: AgentId, _event: MemberEvent) -> io::Result<()> {
        Ok(())
    }

    fn ratings(&mut self, _me: AgentId) -> io::Result<BTreeMap<AgentId, u8>> {
        Ok(BTreeMap::new())
    }

    fn show_ratings(&mut self, _me: AgentId, _global: &BTreeMap<AgentId, f64>) -> io::Result<()> {
        Ok(())
    }

    fn offer(&mut self, me: AgentId, other: AgentId) -> io::Result<u8>;

    fn decide(&mut self, me: AgentId, other: AgentId, amount: u8) -> io::Result<bool>;

    fn ultimatum_result(&mut self, _me: AgentId, _other: AgentId, _amount: u8, _accepted: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Strategy that forwards every decision to a [`HumanInterface`].
///
/// Always slow. I/O failures become [`EngineError::Collaborator`]; answers
/// that name something not on offer become [`EngineError::Protocol`].
pub struct HumanAdapter {
    interface: Box<dyn HumanInterface>,
}

impl HumanAdapter {
    pub fn new(interface: Box<dyn HumanInterface>) -> Self {
        Self { interface }
    }
}

impl fmt::Debug for HumanAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HumanAdapter").finish_non_exhaustive()
    }
}

fn io_failed(agent: AgentId, phase: Phase) -> impl FnOnce(io::Error) -> EngineError {
    move |source| EngineError::Collaborator { agent, phase, source }
}

fn offer_for(view: &DecisionView<'_>, me: AgentId, candidate: Candidate, projected_pay: f64) -> Offer {
    let members = match candidate {
        Candidate::Agent(id) => vec![id],
        Candidate::Group(id) => view.population.group(id).agents().to_vec(),
    };
    Offer {
        candidate,
        members,
        current_pay: view.population.agent(me).current_pay(),
        projected_pay,
    }
}

fn check<T: PartialEq + Copy + fmt::Debug>(phase: Phase, pick: Option<T>, allowed: &[T]) -> Result<Option<T>> {
    match pick {
        Some(p) if !allowed.contains(&p) => Err(EngineError::protocol(
            phase,
            format!("participant picked {:?}, which was not offered", p),
        )),
        other => Ok(other),
    }
}

impl Strategy for HumanAdapter {
    fn name(&self) -> &str {
        "human"
    }

    fn is_slow(&self) -> bool {
        true
    }

    fn propose(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Vec<GroupId>> {
        let agent = view.population.agent(me);
        let groups: Vec<GroupId> = view.population.neighbor_groups(me).into_iter().collect();
        let options: Vec<Offer> = groups
            .iter()
            .map(|g| {
                let pay = view.payoff.projected_join_pay(agent, view.population.group(*g));
                offer_for(view, me, Candidate::Group(*g), pay)
            })
            .collect();
        let picks = self
            .interface
            .propose(me, &options)
            .map_err(io_failed(me, Phase::Propose))?;
        let (valid, invalid): (Vec<GroupId>, Vec<GroupId>) = picks.into_iter().partition(|g| groups.contains(g));
        if !invalid.is_empty() {
            warn!("Participant {} applied to groups not on offer: {:?}", me, invalid);
        }
        Ok(valid)
    }

    fn acceptvote(
        &mut self,
        me: AgentId,
        view: &DecisionView<'_>,
        applicants: &[Candidate],
    ) -> Result<Option<Candidate>> {
        let group = view.population.group_of(me);
        let options: Vec<Offer> = applicants
            .iter()
            .map(|c| {
                let pay = view.payoff.projected_merge_pay(group, view.population.actor(*c));
                offer_for(view, me, *c, pay)
            })
            .collect();
        let pick = self
            .interface
            .accept_vote(me, &options)
            .map_err(io_failed(me, Phase::AcceptVote))?;
        check(Phase::AcceptVote, pick, applicants)
    }

    fn consider(&mut self, me: AgentId, view: &DecisionView<'_>, acceptances: &[GroupId]) -> Result<Option<GroupId>> {
        if acceptances.is_empty() {
            return Ok(None);
        }
        let agent = view.population.agent(me);
        let options: Vec<Offer> = acceptances
            .iter()
            .map(|g| {
                let pay = view.payoff.projected_join_pay(agent, view.population.group(*g));
                offer_for(view, me, Candidate::Group(*g), pay)
            })
            .collect();
        let pick = self
            .interface
            .join(me, &options)
            .map_err(io_failed(me, Phase::Join))?;
        check(Phase::Join, pick, acceptances)
    }

    fn expelvote(&mut self, me: AgentId, view: &DecisionView<'_>) -> Result<Option<AgentId>> {
        let group = view.population.group_of(me);
        let members = group.agents().to_vec();
        let options: Vec<Offer> = members
            .iter()
            .map(|m| {
                let pay = view.payoff.pay_without(group, view.population.agent(*m));
                offer_for(view, me, Candidate::Agent(*m), pay)
            })
            .collect();
        let pick = self
            .interface
            .expel_vote(me, &options)
            .map_err(io_failed(me, Phase::Expel))?;
        check(Phase::Expel, pick, &members)
    }

    fn publicgoods(
        &mut self,
        me: AgentId,
        _view: &DecisionView<'_>,
        stake: u32,
        multiplier: PotMultiplier,
    ) -> Result<u32> {
        let amount = self
            .interface
            .public_goods(me, stake, multiplier)
            .map_err(io_failed(me, Phase::PublicGoods))?;
        if amount > stake {
            warn!("Participant {} offered {} out of {}; capping", me, amount, stake);
        }
        Ok(amount.min(stake))
    }

    fn publicgoods_postprocess(
        &mut self,
        me: AgentId,
        _view: &DecisionView<'_>,
        outcome: &PublicGoodsOutcome,
    ) -> Result<()> {
        self.interface
            .show_public_goods(me, outcome)
            .map_err(io_failed(me, Phase::PublicGoods))
    }

    fn notify_group_accept(&mut self, me: AgentId, accepted: Option<Candidate>) -> Result<()> {
        self.interface
            .group_accepted(me, accepted)
            .map_err(io_failed(me, Phase::AcceptVote))
    }

    fn notify_member(&mut self, me: AgentId, event: MemberEvent) -> Result<()> {
        let phase = match event {
            MemberEvent::Expelled(_) => Phase::Expel,
            _ => Phase::Join,
        };
        self.interface.member_changed(me, event).map_err(io_failed(me, phase))
    }

    fn ratings(&mut self, me: AgentId) -> Result<BTreeMap<AgentId, u8>> {
        let mut ratings = self.interface.ratings(me).map_err(io_failed(me, Phase::Ratings))?;
        ratings.retain(|aid, r| *aid != me && (1..=5).contains(r));
        Ok(ratings)
    }

    fn update_ratings(&mut self, me: AgentId, global: &BTreeMap<AgentId, f64>) -> Result<()> {
        self.interface
            .show_ratings(me, global)
            .map_err(io_failed(me, Phase::Ratings))
    }

    fn ask_for_offer(&mut self, me: AgentId, other: AgentId) -> Result<u8> {
        let amount = self.interface.offer(me, other).map_err(io_failed(me, Phase::Ultimatum))?;
        Ok(amount.min(10))
    }

    fn decide_offer(&mut self, me: AgentId, other: AgentId, amount: u8) -> Result<bool> {
        self.interface
            .decide(me, other, amount)
            .map_err(io_failed(me, Phase::Ultimatum))
    }

    fn ultimatum_conclusion(&mut self, me: AgentId, other: AgentId, amount: u8, accepted: bool) -> Result<()> {
        self.interface
            .ultimatum_result(me, other, amount, accepted)
            .map_err(io_failed(me, Phase::Ultimatum))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_menu_picks_are_protocol_errors() {
        let allowed = [GroupId::new(1), GroupId::new(2)];
        assert_eq!(check(Phase::Join, Some(GroupId::new(2)), &allowed).unwrap(), Some(GroupId::new(2)));
        assert_eq!(check::<GroupId>(Phase::Join, None, &allowed).unwrap(), None);
        let err = check(Phase::Join, Some(GroupId::new(7)), &allowed).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn io_failures_name_the_participant() {
        let err = io_failed(AgentId::new(3), Phase::Expel)(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("participant 3"));
    }
}
