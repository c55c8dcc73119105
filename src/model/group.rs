use super::{Actor, Skills};
use crate::ids::{AgentId, Candidate, GroupId};

#[derive(Debug, Clone)]
pub struct Group {
    id: GroupId,
    agents: Vec<AgentId>,
    skills: Skills,
    current_pay: f64,
    applications: Vec<Candidate>,
    acceptances: Vec<GroupId>,
}

impl Group {
    pub fn new(id: GroupId, nskills: usize) -> Self {
        Self {
            id,
            agents: Vec::new(),
            skills: Skills::zeros(nskills),
            current_pay: 0.0,
            applications: Vec::new(),
            acceptances: Vec::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn agents(&self) -> &[AgentId] {
        &self.agents
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.agents.contains(&agent)
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn applications(&self) -> &[Candidate] {
        &self.applications
    }

    pub fn acceptances(&self) -> &[GroupId] {
        &self.acceptances
    }

    /// Skills this group would have with `other` added.
    pub fn with_skills(&self, other: &Skills) -> Skills {
        self.skills.plus(other)
    }

    pub fn without_skills(&self, other: &Skills) -> Skills {
        self.skills.minus(other)
    }

    // `add` and `remove` only touch the group side; the population updates
    // the agent's group field in the same call.
    pub(crate) fn add(&mut self, agent: AgentId, skills: &Skills) {
        self.agents.push(agent);
        self.skills += skills;
    }

    pub(crate) fn remove(&mut self, agent: AgentId, skills: &Skills) -> bool {
        match self.agents.iter().position(|a| *a == agent) {
            Some(pos) => {
                self.agents.remove(pos);
                self.skills -= skills;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_pay(&mut self, pay: f64) {
        self.current_pay = pay;
    }

    pub(crate) fn take_application(&mut self, candidate: Candidate) {
        self.applications.push(candidate);
    }

    pub(crate) fn take_applications(&mut self) -> Vec<Candidate> {
        std::mem::take(&mut self.applications)
    }

    pub(crate) fn push_acceptance(&mut self, group: GroupId) {
        self.acceptances.push(group);
    }

    pub(crate) fn take_acceptances(&mut self) -> Vec<GroupId> {
        std::mem::take(&mut self.acceptances)
    }

    pub(crate) fn clear(&mut self) {
        let nskills = self.skills.len();
        self.agents.clear();
        self.skills = Skills::zeros(nskills);
        self.current_pay = 0.0;
        self.applications.clear();
        self.acceptances.clear();
    }
}

impl Actor for Group {
    fn candidate(&self) -> Candidate {
        Candidate::Group(self.id)
    }

    fn skills(&self) -> &Skills {
        &self.skills
    }

    fn size(&self) -> usize {
        self.agents.len()
    }

    fn current_pay(&self) -> f64 {
        self.current_pay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_keep_skill_sum() {
        let mut g = Group::new(GroupId::new(0), 3);
        let a = Skills::from_vec(vec![1, 0, 0]);
        let b = Skills::from_vec(vec![0, 2, 0]);
        g.add(AgentId::new(0), &a);
        g.add(AgentId::new(1), &b);
        assert_eq!(g.skills().as_slice(), &[1, 2, 0]);
        assert_eq!(g.size(), 2);

        assert!(g.remove(AgentId::new(0), &a));
        assert!(!g.remove(AgentId::new(0), &a));
        assert_eq!(g.skills(), &b);
        assert_eq!(g.with_skills(&a).as_slice(), &[1, 2, 0]);
    }
}
