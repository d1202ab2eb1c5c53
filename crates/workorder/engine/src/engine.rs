//! Graph execution engine
//!
//! Walks the fixed workflow graph one node per `advance` call. Each call
//! loads the work order, honors the cancellation flag at the node boundary,
//! executes the node the work order is due for, and persists the result in
//! one atomic checkpoint write (the optimistic version check on the store is
//! the serialization point). Nodes never hold a worker across a suspension:
//! the approval gate persists `AwaitingApproval` and returns.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use workorder_agents::{
    AdapterError, AgentInvoker, AgentRequest, ArtifactError, ArtifactGenerator, ArtifactRequest,
    BaselineSource, PolicyPack, PolicyPackSource, ProgressBroadcaster, ProgressEvent,
};
use workorder_store::StateStore;
use workorder_types::{
    AgentName, AgentOutput, CriticValidation, Decision, ErrorKind, GuardrailCheck, IdempotencyKey,
    Severity, Stage, TenantId, WorkOrder, WorkOrderError, WorkOrderId, WorkOrderResult,
    GATE_OVERRIDE_GUARDRAIL, GATE_SUPERVISOR_REVIEW,
};

use crate::retry::with_backoff;
use crate::{routing, EngineConfig};

/// Outcome of one `advance` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceResult {
    /// More nodes to run; the caller should re-enqueue
    Ready,
    /// Awaiting an external approval decision; do not re-enqueue
    Suspended,
    /// Reached a terminal stage
    Terminal(Stage),
}

/// The engine. One instance serves all work orders; per-work-order
/// serialization comes from the store's version check, not from this struct.
pub struct ExecutionEngine {
    store: Arc<dyn StateStore>,
    invoker: Arc<dyn AgentInvoker>,
    policy_source: Arc<dyn PolicyPackSource>,
    baseline_source: Arc<dyn BaselineSource>,
    artifact_generator: Arc<dyn ArtifactGenerator>,
    broadcaster: Arc<dyn ProgressBroadcaster>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        invoker: Arc<dyn AgentInvoker>,
        policy_source: Arc<dyn PolicyPackSource>,
        baseline_source: Arc<dyn BaselineSource>,
        artifact_generator: Arc<dyn ArtifactGenerator>,
        broadcaster: Arc<dyn ProgressBroadcaster>,
    ) -> Self {
        Self {
            store,
            invoker,
            policy_source,
            baseline_source,
            artifact_generator,
            broadcaster,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Create a work order in the store, ready for its first advance
    pub async fn submit(&self, work_order: WorkOrder) -> WorkOrderResult<WorkOrderId> {
        let id = work_order.id.clone();
        self.store.insert(&work_order).await?;
        info!(work_order = %id.short(), tenant = %work_order.tenant_id, "work order submitted");
        self.broadcaster.broadcast(ProgressEvent::stage_event(
            id.clone(),
            work_order.stage,
            "work order submitted",
        ));
        Ok(id)
    }

    /// Execute the next node of one work order.
    ///
    /// Exactly one node (or one fan-out set of agent invocations) runs per
    /// call; the resulting state is persisted before this returns. A
    /// `ConcurrencyConflict` means another writer raced this call — reload
    /// by calling again.
    pub async fn advance(
        &self,
        tenant_id: &TenantId,
        id: &WorkOrderId,
    ) -> WorkOrderResult<AdvanceResult> {
        let mut wo = self
            .store
            .load(tenant_id, id)
            .await?
            .ok_or_else(|| WorkOrderError::NotFound(id.clone()))?;

        if wo.is_terminal() {
            return Ok(AdvanceResult::Terminal(wo.stage));
        }
        let loaded_version = wo.version;

        // Cooperative cancellation, honored only at node boundaries
        if wo.cancel_requested {
            let key = IdempotencyKey::new(wo.id.clone(), wo.stage, wo.retry_count);
            for agent in wo.agents_to_invoke().to_vec() {
                self.invoker.cancel(&agent, &key).await;
            }
            wo.record_error(ErrorKind::Cancellation, "cancellation honored at node boundary");
            wo.transition_to(Stage::Cancelled)?;
            return self
                .checkpoint(wo, loaded_version, AdvanceResult::Terminal(Stage::Cancelled))
                .await;
        }

        let result = match wo.stage {
            Stage::IntakeValidated => self.run_dq_validation(&mut wo)?,
            Stage::DqValidation => self.run_routing(&mut wo)?,
            Stage::Routing => self.run_agent_invocation(&mut wo).await?,
            Stage::AgentInvocation => {
                if wo.retry_agents.is_empty() {
                    self.run_guardrail(&mut wo).await?
                } else {
                    // A feedback cycle re-queued the offending agents
                    self.run_agent_invocation(&mut wo).await?
                }
            }
            Stage::Guardrail => {
                if wo.approvals_complete() {
                    self.run_critic(&mut wo).await?
                } else {
                    // Critical guardrail failure: go to the gate, bypass critic
                    self.run_approval_gate(&mut wo)?
                }
            }
            Stage::Critic => self.run_approval_gate(&mut wo)?,
            Stage::ApprovalGate => self.run_artifact_generation(&mut wo).await?,
            Stage::ArtifactGeneration => self.run_artifact_generation(&mut wo).await?,
            Stage::AwaitingApproval => {
                debug!(work_order = %wo.id.short(), "still awaiting approval");
                return Ok(AdvanceResult::Suspended);
            }
            Stage::Completed | Stage::Failed | Stage::Cancelled => {
                return Ok(AdvanceResult::Terminal(wo.stage));
            }
        };

        self.checkpoint(wo, loaded_version, result).await
    }

    /// Resolve one named approval gate with a human decision.
    ///
    /// Only valid while the work order is suspended at `AwaitingApproval`.
    /// When the last pending gate resolves, the work order moves on to
    /// artifact generation (and is ready to advance again) — unless the
    /// decision rejects a guardrail override, in which case the critical
    /// policy failure stands and the work order fails.
    pub async fn submit_decision(
        &self,
        tenant_id: &TenantId,
        id: &WorkOrderId,
        gate: &str,
        decision: Decision,
        actor: &str,
        rationale: &str,
    ) -> WorkOrderResult<AdvanceResult> {
        let mut wo = self
            .store
            .load(tenant_id, id)
            .await?
            .ok_or_else(|| WorkOrderError::NotFound(id.clone()))?;

        if wo.is_terminal() {
            return Err(WorkOrderError::TerminalState(wo.stage));
        }
        if wo.stage != Stage::AwaitingApproval {
            return Err(WorkOrderError::NotAwaitingApproval(wo.stage));
        }
        let loaded_version = wo.version;

        wo.resolve_gate(gate, decision, actor, rationale)?;
        info!(
            work_order = %wo.id.short(),
            gate,
            decision = ?decision,
            actor,
            "approval decision recorded"
        );

        if decision == Decision::Rejected && gate == GATE_OVERRIDE_GUARDRAIL {
            wo.fail(
                ErrorKind::PolicyViolation,
                "guardrail override rejected; critical policy failure stands",
            )?;
            return self
                .checkpoint(wo, loaded_version, AdvanceResult::Terminal(Stage::Failed))
                .await;
        }

        if wo.approvals_complete() {
            wo.transition_to(Stage::ArtifactGeneration)?;
            return self
                .checkpoint(wo, loaded_version, AdvanceResult::Ready)
                .await;
        }

        self.checkpoint(wo, loaded_version, AdvanceResult::Suspended)
            .await
    }

    /// Drive one work order until it suspends or terminates.
    ///
    /// Convenience for tests and embedded use; production scheduling goes
    /// through the dispatcher. Retries a bounded number of times when a
    /// concurrent writer races an advance.
    pub async fn run_to_completion(
        &self,
        tenant_id: &TenantId,
        id: &WorkOrderId,
    ) -> WorkOrderResult<AdvanceResult> {
        let mut conflicts = 0u32;
        loop {
            match self.advance(tenant_id, id).await {
                Ok(AdvanceResult::Ready) => continue,
                Ok(done) => return Ok(done),
                Err(err) if err.is_conflict() && conflicts < 3 => {
                    conflicts += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ── Node executors ───────────────────────────────────────────────

    fn run_dq_validation(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        wo.transition_to(Stage::DqValidation)?;

        if wo.input_dataset_refs.is_empty() {
            wo.fail(ErrorKind::Validation, "no input datasets")?;
            return Ok(AdvanceResult::Terminal(Stage::Failed));
        }
        if wo.objective.trim().is_empty() {
            wo.fail(ErrorKind::Validation, "objective is empty")?;
            return Ok(AdvanceResult::Terminal(Stage::Failed));
        }
        let mut seen = HashSet::new();
        for dataset in &wo.input_dataset_refs {
            if !seen.insert(dataset.dataset_id.clone()) {
                wo.fail(
                    ErrorKind::Validation,
                    format!("duplicate dataset reference: {}", dataset.dataset_id),
                )?;
                return Ok(AdvanceResult::Terminal(Stage::Failed));
            }
            if dataset.version == 0 {
                wo.fail(
                    ErrorKind::Validation,
                    format!("unversioned dataset reference: {}", dataset.dataset_id),
                )?;
                return Ok(AdvanceResult::Terminal(Stage::Failed));
            }
        }

        wo.record_event(
            "node_completed",
            format!("dq_validation: {} dataset(s) accepted", wo.input_dataset_refs.len()),
        );
        Ok(AdvanceResult::Ready)
    }

    fn run_routing(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        wo.transition_to(Stage::Routing)?;

        let agents = routing::select_agents(&wo.objective, &wo.input_dataset_refs);
        if agents.is_empty() {
            wo.fail(
                ErrorKind::Validation,
                "no capability matches the objective or dataset kinds",
            )?;
            return Ok(AdvanceResult::Terminal(Stage::Failed));
        }

        debug!(work_order = %wo.id.short(), count = agents.len(), "agents routed");
        wo.select_agents(agents);
        Ok(AdvanceResult::Ready)
    }

    /// Fan out to the due agents concurrently, bounded by the fan-out limit.
    ///
    /// Each agent gets its own timeout and node-level backoff; a transient
    /// failure of one agent never poisons another's attempt. The stage
    /// completes only when every agent has returned.
    async fn run_agent_invocation(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        if wo.stage != Stage::AgentInvocation {
            wo.transition_to(Stage::AgentInvocation)?;
        }

        let agents = wo.agents_to_invoke().to_vec();
        let key = IdempotencyKey::new(wo.id.clone(), Stage::AgentInvocation, wo.retry_count);
        let semaphore = Arc::new(Semaphore::new(self.config.fan_out_limit));
        let mut join_set = JoinSet::new();

        for agent in agents {
            let semaphore = semaphore.clone();
            let invoker = self.invoker.clone();
            let broadcaster = self.broadcaster.clone();
            let backoff = self.config.backoff.clone();
            let attempt_cap = self.config.node_attempt_cap;
            let agent_timeout = self.config.agent_timeout;
            let request = AgentRequest {
                work_order_id: wo.id.clone(),
                tenant_id: wo.tenant_id.clone(),
                agent_name: agent.clone(),
                objective: wo.objective.clone(),
                datasets: wo.input_dataset_refs.clone(),
                idempotency_key: key.clone(),
            };

            join_set.spawn(async move {
                // The semaphore is never closed, so acquisition cannot fail
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = with_backoff(
                    &backoff,
                    attempt_cap,
                    AdapterError::is_transient,
                    move |_attempt| {
                        let invoker = invoker.clone();
                        let broadcaster = broadcaster.clone();
                        let request = request.clone();
                        Box::pin(async move {
                            let agent_name = request.agent_name.clone();
                            match tokio::time::timeout(
                                agent_timeout,
                                invoker.invoke(request, broadcaster.as_ref()),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(AdapterError::Timeout { agent: agent_name }),
                            }
                        })
                    },
                )
                .await;
                (agent, outcome)
            });
        }

        let mut results: Vec<(AgentName, Result<AgentOutput, AdapterError>)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(err) => {
                    wo.fail(
                        ErrorKind::ContractViolation,
                        format!("invocation task failed: {err}"),
                    )?;
                    return Ok(AdvanceResult::Terminal(Stage::Failed));
                }
            }
        }
        // Join order is nondeterministic; the audit trail is not
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failure: Option<(AgentName, AdapterError)> = None;
        for (agent, outcome) in results {
            match outcome {
                Ok(output) => {
                    wo.record_event(
                        "agent_completed",
                        format!("{} (confidence {:.2})", agent, output.confidence),
                    );
                    wo.add_agent_output(agent, output);
                }
                Err(err) => {
                    warn!(work_order = %wo.id.short(), agent = %agent, error = %err, "agent failed");
                    if failure.is_none() {
                        failure = Some((agent, err));
                    }
                }
            }
        }

        if let Some((agent, err)) = failure {
            if matches!(err, AdapterError::Cancelled { .. }) {
                wo.record_error(
                    ErrorKind::Cancellation,
                    format!("agent '{agent}' invocation cancelled"),
                );
                wo.transition_to(Stage::Cancelled)?;
                return Ok(AdvanceResult::Terminal(Stage::Cancelled));
            }
            let kind = match &err {
                AdapterError::Malformed { .. } => ErrorKind::ContractViolation,
                _ => ErrorKind::TransientAdapter,
            };
            wo.fail(kind, format!("agent '{agent}' failed: {err}"))?;
            return Ok(AdvanceResult::Terminal(Stage::Failed));
        }

        let invoked = wo.agents_to_invoke().len();
        wo.clear_retry_agents();
        wo.record_event(
            "node_completed",
            format!("agent_invocation: {invoked} agent(s) returned"),
        );
        Ok(AdvanceResult::Ready)
    }

    /// Evaluate every loaded policy rule against the latest output of every
    /// agent, then pick the edge: critical failure opens the override gate
    /// and heads for approval; lesser failures cycle back to the offending
    /// agents while the retry budget lasts.
    async fn run_guardrail(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        wo.transition_to(Stage::Guardrail)?;

        let mut packs: Vec<PolicyPack> = Vec::new();
        for pack_id in &wo.policy_refs {
            match self.policy_source.load(pack_id).await {
                Some(pack) => packs.push(pack),
                None => {
                    let detail = format!("unknown policy pack: {pack_id}");
                    wo.fail(ErrorKind::Validation, detail)?;
                    return Ok(AdvanceResult::Terminal(Stage::Failed));
                }
            }
        }

        let latest: Vec<(AgentName, AgentOutput)> = wo
            .latest_outputs()
            .into_iter()
            .map(|(name, output)| (name.clone(), output.clone()))
            .collect();

        let mut checks: Vec<GuardrailCheck> = Vec::new();
        for (agent, output) in &latest {
            for pack in &packs {
                checks.extend(pack.evaluate(agent, output));
            }
        }

        let failed: Vec<&GuardrailCheck> = checks.iter().filter(|c| c.is_failure()).collect();
        let has_critical = failed.iter().any(|c| c.severity == Severity::Critical);
        let has_high = failed.iter().any(|c| c.severity == Severity::High);
        let offending: BTreeSet<AgentName> =
            failed.iter().map(|c| c.agent_name.clone()).collect();
        let failure_count = failed.len();
        let total = checks.len();
        drop(failed);

        wo.guardrail_checks.extend(checks);
        wo.record_event(
            "node_completed",
            format!("guardrail: {total} check(s), {failure_count} failure(s)"),
        );

        if failure_count == 0 {
            return Ok(AdvanceResult::Ready);
        }

        if has_critical {
            wo.record_error(
                ErrorKind::PolicyViolation,
                "critical guardrail failure, override gate opened",
            );
            wo.open_gate(GATE_OVERRIDE_GUARDRAIL);
            return Ok(AdvanceResult::Ready);
        }

        match wo.begin_retry_cycle(offending.into_iter().collect()) {
            Ok(()) => Ok(AdvanceResult::Ready),
            Err(WorkOrderError::RetriesExhausted { .. }) if has_high => {
                wo.fail(
                    ErrorKind::PolicyViolation,
                    "guardrail failures persisted past the retry bound",
                )?;
                Ok(AdvanceResult::Terminal(Stage::Failed))
            }
            Err(WorkOrderError::RetriesExhausted { .. }) => {
                wo.record_event(
                    "guardrail_warning",
                    "low-severity failures past the retry bound, proceeding to critic",
                );
                Ok(AdvanceResult::Ready)
            }
            Err(err) => Err(err),
        }
    }

    /// Compare each agent's latest output against its historical baseline.
    /// A flagged output opens supervisor review but never blocks progression
    /// — it only guarantees a human sees it at the gate.
    async fn run_critic(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        wo.transition_to(Stage::Critic)?;

        let latest: Vec<(AgentName, f64)> = wo
            .latest_outputs()
            .into_iter()
            .map(|(name, output)| (name.clone(), output.confidence))
            .collect();

        let mut flagged_count = 0usize;
        for (agent, confidence) in latest {
            let variance = match self.baseline_source.baseline_for(&agent).await {
                Some(baseline) => baseline.variance_of(confidence),
                // No recorded history for this agent yet
                None => 0.0,
            };
            let flagged = confidence < self.config.confidence_threshold
                || variance > self.config.variance_threshold;
            if flagged {
                flagged_count += 1;
            }
            wo.critic_validations
                .push(CriticValidation::new(agent, confidence, variance, flagged));
        }

        if flagged_count > 0 {
            wo.open_gate(GATE_SUPERVISOR_REVIEW);
        }
        wo.record_event(
            "node_completed",
            format!(
                "critic: {} validation(s), {flagged_count} flagged",
                wo.critic_validations.len()
            ),
        );
        Ok(AdvanceResult::Ready)
    }

    fn run_approval_gate(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        wo.transition_to(Stage::ApprovalGate)?;

        if wo.approvals_complete() {
            wo.record_event("node_completed", "approval_gate: no approvals pending");
            return Ok(AdvanceResult::Ready);
        }

        let gates: Vec<&str> = wo.pending_approvals.iter().map(String::as_str).collect();
        let detail = format!("awaiting approval: {}", gates.join(", "));
        wo.transition_to(Stage::AwaitingApproval)?;
        wo.record_event("suspended", detail);
        Ok(AdvanceResult::Suspended)
    }

    /// Request every artifact kind the agents asked for, record the
    /// descriptors, and close the work order.
    async fn run_artifact_generation(&self, wo: &mut WorkOrder) -> WorkOrderResult<AdvanceResult> {
        if wo.stage != Stage::ArtifactGeneration {
            wo.transition_to(Stage::ArtifactGeneration)?;
        }

        let kinds: BTreeSet<String> = wo
            .latest_outputs()
            .into_iter()
            .flat_map(|(_, output)| output.artifacts_requested.iter().cloned())
            .collect();
        let key = IdempotencyKey::new(wo.id.clone(), Stage::ArtifactGeneration, wo.retry_count);

        for kind in kinds {
            let request = ArtifactRequest {
                work_order_id: wo.id.clone(),
                tenant_id: wo.tenant_id.clone(),
                kind: kind.clone(),
                idempotency_key: key.clone(),
            };
            let generator = self.artifact_generator.clone();
            let outcome = with_backoff(
                &self.config.backoff,
                self.config.node_attempt_cap,
                ArtifactError::is_transient,
                move |_attempt| {
                    let generator = generator.clone();
                    let request = request.clone();
                    Box::pin(async move { generator.generate(request).await })
                },
            )
            .await;

            match outcome {
                Ok(descriptor) => {
                    wo.record_event(
                        "artifact_generated",
                        format!("{} at {}", descriptor.kind, descriptor.location),
                    );
                    wo.artifacts.push(descriptor);
                }
                Err(ArtifactError::Unsupported { kind }) => {
                    wo.fail(
                        ErrorKind::Validation,
                        format!("unsupported artifact kind: {kind}"),
                    )?;
                    return Ok(AdvanceResult::Terminal(Stage::Failed));
                }
                Err(err) => {
                    wo.fail(
                        ErrorKind::TransientAdapter,
                        format!("artifact generation failed: {err}"),
                    )?;
                    return Ok(AdvanceResult::Terminal(Stage::Failed));
                }
            }
        }

        wo.transition_to(Stage::Completed)?;
        Ok(AdvanceResult::Terminal(Stage::Completed))
    }

    // ── Checkpointing ────────────────────────────────────────────────

    /// The one write per advance: persist the mutated aggregate against the
    /// version read at load time, then tell the world.
    async fn checkpoint(
        &self,
        mut wo: WorkOrder,
        expected_version: u64,
        result: AdvanceResult,
    ) -> WorkOrderResult<AdvanceResult> {
        let new_version = self.store.update(&wo, expected_version).await?;
        wo.version = new_version;

        let message = match result {
            AdvanceResult::Ready => "node complete",
            AdvanceResult::Suspended => "suspended for approval",
            AdvanceResult::Terminal(_) => "work order closed",
        };
        self.broadcaster.broadcast(ProgressEvent::stage_event(
            wo.id.clone(),
            wo.stage,
            message,
        ));
        info!(
            work_order = %wo.id.short(),
            stage = wo.stage.as_str(),
            version = new_version,
            "checkpoint written"
        );
        Ok(result)
    }
}
