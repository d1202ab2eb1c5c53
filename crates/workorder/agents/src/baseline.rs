//! Historical baselines for the critic node
//!
//! The critic compares each agent-reported confidence against the agent's
//! historical baseline. Baselines are a read-only lookup; an agent with no
//! recorded history simply has no baseline and the critic skips the variance
//! comparison for it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use workorder_types::AgentName;

/// Historical confidence profile for one agent
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Baseline {
    /// Mean confidence over the agent's recorded history
    pub mean_confidence: f64,
    /// Standard deviation of that history
    pub stddev: f64,
}

impl Baseline {
    pub fn new(mean_confidence: f64, stddev: f64) -> Self {
        Self {
            mean_confidence,
            stddev,
        }
    }

    /// Absolute deviation of one observation from the mean
    pub fn variance_of(&self, confidence: f64) -> f64 {
        (confidence - self.mean_confidence).abs()
    }
}

/// Read-only baseline lookup
#[async_trait]
pub trait BaselineSource: Send + Sync {
    /// Baseline for one agent. `None` when the agent has no recorded history.
    async fn baseline_for(&self, agent_name: &AgentName) -> Option<Baseline>;
}

/// Fixed in-memory baselines for tests and single-node deployments.
/// Immutable once built; loaded-once semantics come for free.
pub struct StaticBaselines {
    baselines: HashMap<AgentName, Baseline>,
}

impl StaticBaselines {
    pub fn new() -> Self {
        Self {
            baselines: HashMap::new(),
        }
    }

    pub fn with_baseline(mut self, name: impl Into<String>, mean: f64, stddev: f64) -> Self {
        self.baselines
            .insert(AgentName::new(name), Baseline::new(mean, stddev));
        self
    }
}

impl Default for StaticBaselines {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaselineSource for StaticBaselines {
    async fn baseline_for(&self, agent_name: &AgentName) -> Option<Baseline> {
        self.baselines.get(agent_name).copied()
    }
}
