pub mod logger;

pub use logger::DecisionLogger;

use crate::error::Phase;
use crate::ids::{AgentId, GroupId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One option weighed by one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub round: u32,
    pub iteration: u32,
    pub phase: Phase,
    pub actor: u32,
    /// `None` when the participant chose to do nothing.
    pub option: Option<u32>,
    pub current_pay: f64,
    pub projected_pay: f64,
    pub chosen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub group: GroupId,
    pub members: Vec<AgentId>,
    pub pay: f64,
}

/// Every occupied group at the start of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatus {
    pub round: u32,
    pub iteration: u32,
    pub event: String,
    pub groups: Vec<GroupStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicGoodsRecord {
    pub round: u32,
    pub agent: AgentId,
    pub group: GroupId,
    /// `None` for agents that played alone.
    pub contributed: Option<u32>,
    pub kept: Option<u32>,
    pub pay: f64,
    pub multiplier: Option<f64>,
    pub shared: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UltimatumRecord {
    pub giver: AgentId,
    pub receiver: AgentId,
    pub amount: u8,
    pub accepted: bool,
    pub elapsed_ms: f64,
}

/// Sink for experiment events. Calls never block on I/O and every method
/// may be a no-op.
pub trait DecisionLog: Send + Sync {
    fn record_decision(&self, _record: DecisionRecord) {}

    fn record_team_status(&self, _status: TeamStatus) {}

    fn record_public_goods(&self, _record: PublicGoodsRecord) {}

    fn record_ultimatum(&self, _record: UltimatumRecord) {}

    /// Team snapshots cost a pass over every group, so they are only built
    /// for logs that keep them.
    fn wants_team_status(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl DecisionLog for NullLog {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub elapsed_secs: f64,
    pub decisions: usize,
    pub chosen: usize,
    pub team_events: usize,
    pub public_goods: usize,
    pub ultimatums: usize,
    pub accepted_offers: usize,
}

/// In-memory log, cheap to clone and share between threads.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsInner {
    decisions: Vec<DecisionRecord>,
    teams: Vec<TeamStatus>,
    public_goods: Vec<PublicGoodsRecord>,
    ultimatums: Vec<UltimatumRecord>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            start_time: Instant::now(),
        }
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.inner.read().decisions.clone()
    }

    pub fn team_statuses(&self) -> Vec<TeamStatus> {
        self.inner.read().teams.clone()
    }

    pub fn public_goods(&self) -> Vec<PublicGoodsRecord> {
        self.inner.read().public_goods.clone()
    }

    pub fn ultimatums(&self) -> Vec<UltimatumRecord> {
        self.inner.read().ultimatums.clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.read();
        MetricsSummary {
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
            decisions: inner.decisions.len(),
            chosen: inner.decisions.iter().filter(|d| d.chosen).count(),
            team_events: inner.teams.len(),
            public_goods: inner.public_goods.len(),
            ultimatums: inner.ultimatums.len(),
            accepted_offers: inner.ultimatums.iter().filter(|u| u.accepted).count(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.decisions.clear();
        inner.teams.clear();
        inner.public_goods.clear();
        inner.ultimatums.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionLog for MetricsCollector {
    fn record_decision(&self, record: DecisionRecord) {
        self.inner.write().decisions.push(record);
    }

    fn record_team_status(&self, status: TeamStatus) {
        self.inner.write().teams.push(status);
    }

    fn record_public_goods(&self, record: PublicGoodsRecord) {
        self.inner.write().public_goods.push(record);
    }

    fn record_ultimatum(&self, record: UltimatumRecord) {
        self.inner.write().ultimatums.push(record);
    }

    fn wants_team_status(&self) -> bool {
        true
    }
}
