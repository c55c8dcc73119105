pub mod agent;
pub mod group;
pub mod population;
pub mod skills;

pub use agent::Agent;
pub use group::Group;
pub use population::{AgentSnapshot, GroupSnapshot, Population, PopulationSnapshot};
pub use skills::Skills;

use crate::ids::Candidate;

/// What agents and groups have in common when one of them applies to a
/// group: pooled skills, a head count and a current per-member payoff.
pub trait Actor {
    fn candidate(&self) -> Candidate;
    fn skills(&self) -> &Skills;
    fn size(&self) -> usize;
    fn current_pay(&self) -> f64;
}
