//! Agent inputs and outputs
//!
//! The engine treats each analysis agent as an opaque capability behind a
//! fixed contract: it receives dataset references and an objective, and
//! returns a structured result with confidence, cost, and an execution trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DatasetId;

/// Reference to one immutable input dataset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    /// The dataset identifier
    pub dataset_id: DatasetId,
    /// What kind of financial data this is
    pub kind: DatasetKind,
    /// Dataset version pinned at submission time
    pub version: u32,
}

impl DatasetRef {
    pub fn new(dataset_id: DatasetId, kind: DatasetKind, version: u32) -> Self {
        Self {
            dataset_id,
            kind,
            version,
        }
    }
}

/// The kinds of financial datasets the routing node understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// General ledger extract
    GeneralLedger,
    /// Transaction-level records
    Transactions,
    /// Portfolio holdings / positions
    Portfolio,
    /// Market price series
    MarketData,
    /// Static reference data
    Reference,
}

/// The structured result of one agent invocation attempt.
///
/// Append-only per agent: a retry cycle adds a new attempt entry rather than
/// overwriting an earlier one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentOutput {
    /// The agent's analysis result, opaque to the engine
    pub result: serde_json::Value,
    /// Agent-reported confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Artifact kinds the agent asked the terminal node to produce
    pub artifacts_requested: Vec<String>,
    /// Billed cost of the invocation, in cents
    pub cost_cents: u64,
    /// Wall-clock duration of the invocation
    pub duration_ms: u64,
    /// Timestamped trace of what the agent did
    pub trace: Vec<TraceEvent>,
}

impl AgentOutput {
    pub fn new(result: serde_json::Value, confidence: f64) -> Self {
        Self {
            result,
            confidence,
            artifacts_requested: Vec::new(),
            cost_cents: 0,
            duration_ms: 0,
            trace: Vec::new(),
        }
    }

    pub fn with_artifacts_requested(mut self, kinds: Vec<String>) -> Self {
        self.artifacts_requested = kinds;
        self
    }

    pub fn with_cost_cents(mut self, cost: u64) -> Self {
        self.cost_cents = cost;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_trace_event(mut self, message: impl Into<String>) -> Self {
        self.trace.push(TraceEvent::now(message));
        self
    }
}

/// One timestamped entry in an agent's execution trace
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TraceEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_builder() {
        let out = AgentOutput::new(serde_json::json!({"anomalies": 3}), 0.92)
            .with_cost_cents(120)
            .with_duration_ms(4500)
            .with_artifacts_requested(vec!["xlsx".into()])
            .with_trace_event("scanned 12000 rows");

        assert_eq!(out.confidence, 0.92);
        assert_eq!(out.cost_cents, 120);
        assert_eq!(out.artifacts_requested, vec!["xlsx".to_string()]);
        assert_eq!(out.trace.len(), 1);
    }

    #[test]
    fn test_dataset_kind_serde() {
        let json = serde_json::to_string(&DatasetKind::GeneralLedger).unwrap();
        assert_eq!(json, "\"general_ledger\"");
    }
}
