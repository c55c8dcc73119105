use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(u32);

impl AgentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Groups are founded by an agent and keep its id for the whole round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn founded_by(agent: AgentId) -> Self {
        Self(agent.raw())
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that can apply to a group: a single agent, or a whole group
/// asking to merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Candidate {
    Agent(AgentId),
    Group(GroupId),
}

impl Candidate {
    pub fn as_agent(self) -> Option<AgentId> {
        match self {
            Candidate::Agent(id) => Some(id),
            Candidate::Group(_) => None,
        }
    }

    /// Numeric id used in logs; groups and agents share one id space.
    pub fn raw(self) -> u32 {
        match self {
            Candidate::Agent(id) => id.raw(),
            Candidate::Group(id) => id.raw(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Agent(id) => write!(f, "agent {}", id),
            Candidate::Group(id) => write!(f, "group {}", id),
        }
    }
}

// Owned by whoever builds a population, so two sessions never share a counter.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_agent: u32,
    next_round: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_agent(&mut self) -> AgentId {
        let id = AgentId::new(self.next_agent);
        self.next_agent += 1;
        id
    }

    pub fn next_round(&mut self) -> u32 {
        let round = self.next_round;
        self.next_round += 1;
        round
    }

    pub fn agents_allocated(&self) -> u32 {
        self.next_agent
    }
}
