use crate::ids::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Setup,
    Ultimatum,
    Propose,
    GroupPropose,
    AcceptVote,
    GroupMerge,
    Join,
    Expel,
    IterationPostprocess,
    PublicGoods,
    Ratings,
    RoundPostprocess,
}

impl Phase {
    /// Label used for team-status events in the experiment log.
    pub fn event_name(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Ultimatum => "ultimatum",
            Phase::Propose => "apply",
            Phase::GroupPropose => "groupapply",
            Phase::AcceptVote => "acceptvote",
            Phase::GroupMerge => "groupmerge",
            Phase::Join => "join",
            Phase::Expel => "expel",
            Phase::IterationPostprocess => "enditer",
            Phase::PublicGoods => "pubgood",
            Phase::Ratings => "ratings",
            Phase::RoundPostprocess => "simend",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Errors raised by the team formation engine.
///
/// `Protocol` is recoverable: phases log it and carry on with "no selection".
/// Everything else aborts the round and reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("protocol error during {phase}: {reason}")]
    Protocol { phase: Phase, reason: String },

    #[error("configuration error during {phase}: {reason}")]
    Configuration { phase: Phase, reason: String },

    #[error("participant {agent} failed during {phase}: {source}")]
    Collaborator {
        agent: AgentId,
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for participant {agent} panicked during {phase}")]
    WorkerPanicked { agent: AgentId, phase: Phase },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Configuration {
            phase,
            reason: reason.into(),
        }
    }

    pub fn protocol(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Protocol {
            phase,
            reason: reason.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_name_phase_and_participant() {
        let err = EngineError::Collaborator {
            agent: AgentId::new(4),
            phase: Phase::AcceptVote,
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "no answer"),
        };
        let text = err.to_string();
        assert!(text.contains("participant 4"));
        assert!(text.contains("acceptvote"));
        assert!(!err.is_recoverable());
        assert!(EngineError::protocol(Phase::Expel, "no votes").is_recoverable());
    }
}
