//! The WorkOrder root aggregate
//!
//! One store row per instance. Mutated exclusively by the execution engine
//! and by approval-decision submission; all invariant-sensitive mutations go
//! through methods here so that callers cannot produce an illegal state.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AgentName, AgentOutput, ApprovalDecision, ArtifactDescriptor, CriticValidation, DatasetRef,
    Decision, ErrorKind, ErrorRecord, ExecutionLogEntry, GuardrailCheck, PolicyPackId, Stage,
    TenantId, WorkOrderError, WorkOrderId, WorkOrderResult,
};

/// Scheduling hint — does not affect correctness
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// One unit of orchestrated processing for a dataset submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkOrder {
    /// Unique identifier
    pub id: WorkOrderId,

    /// Isolation boundary; every read/write is scoped to it
    pub tenant_id: TenantId,

    /// Free-text description used by the routing node to select agents
    pub objective: String,

    /// Scheduling hint
    pub priority: Priority,

    /// Scheduling hint; no escalation is derived from it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_deadline: Option<DateTime<Utc>>,

    /// Ordered input datasets — immutable once the work order starts
    pub input_dataset_refs: Vec<DatasetRef>,

    /// Policy packs to enforce at the guardrail stage — immutable
    pub policy_refs: Vec<PolicyPackId>,

    /// Current node in the fixed workflow graph
    pub stage: Stage,

    /// Agents chosen by the routing node
    pub selected_agents: Vec<AgentName>,

    /// Agents to re-invoke in the current retry cycle; empty outside one
    pub retry_agents: Vec<AgentName>,

    /// Attempt history per agent — append-only, a retry adds a new entry
    pub agent_outputs: HashMap<AgentName, Vec<AgentOutput>>,

    /// Guardrail rule evaluations, one record per rule per pass
    pub guardrail_checks: Vec<GuardrailCheck>,

    /// Critic baseline comparisons
    pub critic_validations: Vec<CriticValidation>,

    /// Named approval gates currently open
    pub pending_approvals: BTreeSet<String>,

    /// Append-only log of human decisions
    pub approval_decisions: Vec<ApprovalDecision>,

    /// Generated-output descriptors, populated by the terminal node
    pub artifacts: Vec<ArtifactDescriptor>,

    /// Append-only, totally ordered audit trail
    pub execution_log: Vec<ExecutionLogEntry>,

    /// Recorded errors; an entry does not by itself imply termination
    pub errors: Vec<ErrorRecord>,

    /// Guardrail/critic feedback-loop counter
    pub retry_count: u32,

    /// Bound on the feedback loop
    pub max_retries: u32,

    /// Optimistic-concurrency version, bumped by the store on every write
    pub version: u64,

    /// Cooperative cancellation flag, checked at node boundaries
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    /// Create a work order for a validated dataset submission.
    ///
    /// The work order starts at `IntakeValidated`; the engine moves it onto
    /// the graph on the first advance.
    pub fn new(
        tenant_id: TenantId,
        objective: impl Into<String>,
        input_dataset_refs: Vec<DatasetRef>,
        policy_refs: Vec<PolicyPackId>,
    ) -> Self {
        let now = Utc::now();
        let mut wo = Self {
            id: WorkOrderId::generate(),
            tenant_id,
            objective: objective.into(),
            priority: Priority::default(),
            sla_deadline: None,
            input_dataset_refs,
            policy_refs,
            stage: Stage::IntakeValidated,
            selected_agents: Vec::new(),
            retry_agents: Vec::new(),
            agent_outputs: HashMap::new(),
            guardrail_checks: Vec::new(),
            critic_validations: Vec::new(),
            pending_approvals: BTreeSet::new(),
            approval_decisions: Vec::new(),
            artifacts: Vec::new(),
            execution_log: Vec::new(),
            errors: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            version: 0,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        wo.record_event("created", "work order created from validated intake");
        wo
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sla_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.sla_deadline = Some(deadline);
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    // ── Audit trail ──────────────────────────────────────────────────

    /// Append an entry to the execution log.
    ///
    /// Sequence numbers are monotone within one work order; the single-writer
    /// invariant (optimistic version check on the store) makes the log
    /// totally ordered.
    pub fn record_event(&mut self, event: impl Into<String>, detail: impl Into<String>) {
        let seq = self.execution_log.last().map(|e| e.seq + 1).unwrap_or(0);
        self.execution_log.push(ExecutionLogEntry {
            seq,
            timestamp: Utc::now(),
            stage: self.stage,
            event: event.into(),
            detail: detail.into(),
        });
        self.updated_at = Utc::now();
    }

    /// Append an error record and a matching execution log entry
    pub fn record_error(&mut self, kind: ErrorKind, detail: impl Into<String>) {
        let detail = detail.into();
        self.errors
            .push(ErrorRecord::new(kind, self.stage, detail.clone()));
        self.record_event("error", detail);
    }

    // ── Stage machine ────────────────────────────────────────────────

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to the next node along an edge of the fixed graph.
    ///
    /// Rejects transitions out of a terminal stage, edges the graph does not
    /// define, and leaving the approval gate while approvals are pending.
    pub fn transition_to(&mut self, to: Stage) -> WorkOrderResult<()> {
        if self.stage.is_terminal() {
            return Err(WorkOrderError::TerminalState(self.stage));
        }
        if !self.stage.can_transition_to(to) {
            return Err(WorkOrderError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        if to == Stage::ArtifactGeneration && !self.pending_approvals.is_empty() {
            return Err(WorkOrderError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        let from = self.stage;
        self.stage = to;
        self.record_event(
            "stage_transition",
            format!("{} -> {}", from.as_str(), to.as_str()),
        );
        Ok(())
    }

    /// Force a terminal failure from any live stage
    pub fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) -> WorkOrderResult<()> {
        self.record_error(kind, detail);
        self.transition_to(Stage::Failed)
    }

    // ── Agent invocation bookkeeping ─────────────────────────────────

    /// Record the agents chosen by the routing node
    pub fn select_agents(&mut self, agents: Vec<AgentName>) {
        let names: Vec<String> = agents.iter().map(|a| a.0.clone()).collect();
        self.record_event("agents_selected", names.join(", "));
        self.selected_agents = agents;
    }

    /// The agents the invocation node should run next: the retry subset
    /// during a feedback cycle, otherwise the full routed selection.
    pub fn agents_to_invoke(&self) -> &[AgentName] {
        if self.retry_agents.is_empty() {
            &self.selected_agents
        } else {
            &self.retry_agents
        }
    }

    /// Append one attempt's output for an agent
    pub fn add_agent_output(&mut self, agent: AgentName, output: AgentOutput) {
        self.agent_outputs.entry(agent).or_default().push(output);
    }

    /// Latest attempt per agent, in stable (sorted) agent order
    pub fn latest_outputs(&self) -> Vec<(&AgentName, &AgentOutput)> {
        let mut latest: Vec<(&AgentName, &AgentOutput)> = self
            .agent_outputs
            .iter()
            .filter_map(|(name, attempts)| attempts.last().map(|out| (name, out)))
            .collect();
        latest.sort_by(|a, b| a.0.cmp(b.0));
        latest
    }

    /// Enter one guardrail/critic → agent re-invocation cycle.
    ///
    /// Bounded by `retry_count < max_retries`; exhausting the bound is the
    /// caller's signal to force `Failed`.
    pub fn begin_retry_cycle(&mut self, offending: Vec<AgentName>) -> WorkOrderResult<()> {
        if self.retry_count >= self.max_retries {
            return Err(WorkOrderError::RetriesExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.record_event(
            "retry_cycle",
            format!(
                "attempt {} of {}: re-invoking {}",
                self.retry_count,
                self.max_retries,
                offending
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );
        self.retry_agents = offending;
        self.transition_to(Stage::AgentInvocation)
    }

    /// Clear the retry subset once the re-invocation has run
    pub fn clear_retry_agents(&mut self) {
        self.retry_agents.clear();
    }

    // ── Approval gates ───────────────────────────────────────────────

    /// Open a named approval gate
    pub fn open_gate(&mut self, gate: impl Into<String>) {
        let gate = gate.into();
        if self.pending_approvals.insert(gate.clone()) {
            self.record_event("gate_opened", gate);
        }
    }

    /// Resolve a named gate with a human decision.
    ///
    /// Appends to the decision log and removes the gate from the pending set.
    /// Fails if the gate is not open.
    pub fn resolve_gate(
        &mut self,
        gate: &str,
        decision: Decision,
        actor: impl Into<String>,
        rationale: impl Into<String>,
    ) -> WorkOrderResult<()> {
        if !self.pending_approvals.remove(gate) {
            return Err(WorkOrderError::UnknownGate(gate.to_string()));
        }
        self.approval_decisions
            .push(ApprovalDecision::new(gate, decision, actor, rationale));
        self.record_event("gate_resolved", format!("{} -> {:?}", gate, decision));
        Ok(())
    }

    /// Whether every open gate has a matching decision
    pub fn approvals_complete(&self) -> bool {
        self.pending_approvals.is_empty()
    }
}
