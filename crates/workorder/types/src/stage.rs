//! The fixed workflow graph, expressed as a stage enumeration
//!
//! The node set and routing rules are fixed at compile time. `stage` names
//! the node the work order last completed (or the suspension point it sits
//! at); the engine moves the cursor along the edges encoded in
//! [`Stage::can_transition_to`].

use serde::{Deserialize, Serialize};

/// Position of a work order in the fixed workflow graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Dataset intake has been validated; the workflow has not started yet
    IntakeValidated,
    /// Data-quality validation of the input datasets
    DqValidation,
    /// Agent selection from the objective and dataset kinds
    Routing,
    /// Fan-out invocation of the selected analysis agents
    AgentInvocation,
    /// Policy enforcement over the collected agent outputs
    Guardrail,
    /// Statistical validation against historical baselines
    Critic,
    /// Approval gate check: pass through or suspend
    ApprovalGate,
    /// Suspended until every pending approval has a decision
    AwaitingApproval,
    /// Output artifact generation
    ArtifactGeneration,
    /// Terminal: all artifacts produced
    Completed,
    /// Terminal: unrecoverable failure, see the error list
    Failed,
    /// Terminal: cancelled by an external call
    Cancelled,
}

impl Stage {
    /// Stable snake_case name, used in logs and idempotency keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IntakeValidated => "intake_validated",
            Stage::DqValidation => "dq_validation",
            Stage::Routing => "routing",
            Stage::AgentInvocation => "agent_invocation",
            Stage::Guardrail => "guardrail",
            Stage::Critic => "critic",
            Stage::ApprovalGate => "approval_gate",
            Stage::AwaitingApproval => "awaiting_approval",
            Stage::ArtifactGeneration => "artifact_generation",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Whether this stage accepts no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }

    /// Whether an edge from `self` to `to` exists in the fixed graph.
    ///
    /// Every non-terminal stage may fail or be cancelled. The one backward
    /// edge is guardrail/critic → agent_invocation (the bounded retry cycle);
    /// its `retry_count < max_retries` bound is enforced by the aggregate,
    /// not here.
    pub fn can_transition_to(&self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == Stage::Failed || to == Stage::Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (Stage::IntakeValidated, Stage::DqValidation)
                | (Stage::DqValidation, Stage::Routing)
                | (Stage::Routing, Stage::AgentInvocation)
                | (Stage::AgentInvocation, Stage::Guardrail)
                | (Stage::Guardrail, Stage::Critic)
                | (Stage::Guardrail, Stage::AgentInvocation)
                | (Stage::Guardrail, Stage::ApprovalGate)
                | (Stage::Critic, Stage::AgentInvocation)
                | (Stage::Critic, Stage::ApprovalGate)
                | (Stage::ApprovalGate, Stage::AwaitingApproval)
                | (Stage::ApprovalGate, Stage::ArtifactGeneration)
                | (Stage::AwaitingApproval, Stage::ArtifactGeneration)
                | (Stage::ArtifactGeneration, Stage::Completed)
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
