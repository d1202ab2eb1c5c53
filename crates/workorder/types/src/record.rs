//! Append-only records kept on the work order aggregate
//!
//! Guardrail checks, critic validations, approval decisions, artifacts, the
//! execution log, and the error list. The execution log and the approval
//! decision log are immutable once written — they are the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentName, Stage};

/// Severity of a policy rule or validation finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Pass/fail status of one check record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
}

/// One guardrail rule evaluation, appended per rule per evaluation pass
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardrailCheck {
    /// The policy rule that was evaluated
    pub rule_id: String,
    /// Human-readable description of the rule
    pub description: String,
    /// The agent whose output was checked
    pub agent_name: AgentName,
    pub severity: Severity,
    pub status: CheckStatus,
    /// Why the rule failed, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl GuardrailCheck {
    pub fn passed(
        rule_id: impl Into<String>,
        description: impl Into<String>,
        agent_name: AgentName,
        severity: Severity,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            description: description.into(),
            agent_name,
            severity,
            status: CheckStatus::Passed,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        rule_id: impl Into<String>,
        description: impl Into<String>,
        agent_name: AgentName,
        severity: Severity,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            description: description.into(),
            agent_name,
            severity,
            status: CheckStatus::Failed,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == CheckStatus::Failed
    }
}

/// One critic comparison of an agent output against its historical baseline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CriticValidation {
    /// The agent whose output was validated
    pub agent_name: AgentName,
    /// The agent-reported confidence under review
    pub confidence: f64,
    /// Absolute deviation from the historical baseline confidence
    pub variance: f64,
    /// Whether this validation flagged the output for supervisor review
    pub flagged: bool,
    pub timestamp: DateTime<Utc>,
}

impl CriticValidation {
    pub fn new(agent_name: AgentName, confidence: f64, variance: f64, flagged: bool) -> Self {
        Self {
            agent_name,
            confidence,
            variance,
            flagged,
            timestamp: Utc::now(),
        }
    }
}

/// A human decision on a named approval gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Gate opened when a critical guardrail check fails
pub const GATE_OVERRIDE_GUARDRAIL: &str = "override_guardrail";

/// Gate opened when the critic flags a low-confidence or high-variance output
pub const GATE_SUPERVISOR_REVIEW: &str = "supervisor_review_low_confidence";

/// One entry in the append-only approval decision log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// The named gate this decision resolves
    pub gate: String,
    pub decision: Decision,
    /// Who decided
    pub actor: String,
    /// Free-text rationale supplied by the actor
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn new(
        gate: impl Into<String>,
        decision: Decision,
        actor: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            gate: gate.into(),
            decision,
            actor: actor.into(),
            rationale: rationale.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Descriptor of one generated output artifact
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Artifact kind, e.g. "xlsx", "pdf"
    pub kind: String,
    /// Where the rendered artifact was stored
    pub location: String,
    /// Content checksum reported by the generator
    pub checksum: String,
    pub size_bytes: u64,
}

/// One entry in the append-only, totally ordered execution log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Monotone sequence number within one work order
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// The node this event belongs to
    pub stage: Stage,
    /// Short event name, e.g. "node_completed", "retry_cycle"
    pub event: String,
    pub detail: String,
}

/// Classification of a recorded error, mirroring the failure taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input malformed — fatal
    Validation,
    /// Adapter timeout or unavailable capability — retried with backoff
    TransientAdapter,
    /// Agent returned an unparseable or invalid result — never retried
    ContractViolation,
    /// Guardrail policy failure — handled by the retry/override cycle
    PolicyViolation,
    /// Cooperative cancellation honored at a node boundary
    Cancellation,
}

/// One entry in the work order's error list.
///
/// An error entry does not by itself imply termination; the stage decides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub detail: String,
    /// The node where the error occurred
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            stage,
            timestamp: Utc::now(),
        }
    }
}
