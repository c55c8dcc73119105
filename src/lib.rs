pub mod error;
pub mod graph;
pub mod ids;
pub mod metrics;
pub mod model;
pub mod payoff;
pub mod simulation;
pub mod strategies;
pub mod utility;

pub use error::{EngineError, Phase, Result};
pub use metrics::MetricsCollector;
pub use simulation::{SimConfig, Simulation};
pub use strategies::Strategy;

pub mod prelude {
    pub use crate::error::{EngineError, Phase};
    pub use crate::graph::SocialGraph;
    pub use crate::ids::{AgentId, Candidate, GroupId};
    pub use crate::metrics::{DecisionLog, DecisionLogger, MetricsCollector, NullLog};
    pub use crate::model::{Agent, Group, Population, Skills};
    pub use crate::payoff::{PayoffModel, TaskConfig};
    pub use crate::simulation::{EndReason, RoundReport, SessionReport, SimConfig, Simulation};
    pub use crate::strategies::{Strategy, StrategyRegistry};
    pub use crate::utility::{TieBreak, UtilityKind};
}
