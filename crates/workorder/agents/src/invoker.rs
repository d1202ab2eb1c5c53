//! Agent invocation adapter
//!
//! The uniform interface the engine uses to call any specialized analysis
//! capability. The adapter must be safe to call twice with the same
//! idempotency key without duplicating billed side effects, and its cancel
//! call is advisory — a best-effort signal, not a guarantee.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use workorder_types::{AgentName, AgentOutput, DatasetRef, IdempotencyKey, TenantId, WorkOrderId};

use crate::{ProgressBroadcaster, ProgressEvent};

/// One invocation request handed to the adapter
#[derive(Clone, Debug)]
pub struct AgentRequest {
    pub work_order_id: WorkOrderId,
    pub tenant_id: TenantId,
    pub agent_name: AgentName,
    /// The work order's objective, verbatim
    pub objective: String,
    /// The input datasets, by immutable reference
    pub datasets: Vec<DatasetRef>,
    /// Deduplicates billed side effects across re-issues
    pub idempotency_key: IdempotencyKey,
}

/// Failures the adapter can surface
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Agent '{agent}' timed out")]
    Timeout { agent: AgentName },

    #[error("Capability '{agent}' unavailable: {reason}")]
    Unavailable { agent: AgentName, reason: String },

    #[error("Agent '{agent}' returned a malformed result: {reason}")]
    Malformed { agent: AgentName, reason: String },

    #[error("Agent '{agent}' invocation was cancelled")]
    Cancelled { agent: AgentName },
}

impl AdapterError {
    /// Transient failures are retried with backoff; contract violations and
    /// cancellations never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Timeout { .. } | AdapterError::Unavailable { .. }
        )
    }

    pub fn agent(&self) -> &AgentName {
        match self {
            AdapterError::Timeout { agent }
            | AdapterError::Unavailable { agent, .. }
            | AdapterError::Malformed { agent, .. }
            | AdapterError::Cancelled { agent } => agent,
        }
    }
}

/// Uniform interface to any specialized analysis capability
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run one agent against the work order's inputs.
    ///
    /// Re-issuing with the same idempotency key must not duplicate billed
    /// side effects. Progress ticks go to `progress` as the agent reports
    /// them.
    async fn invoke(
        &self,
        request: AgentRequest,
        progress: &dyn ProgressBroadcaster,
    ) -> Result<AgentOutput, AdapterError>;

    /// Advisory cancellation of an in-flight invocation. Best-effort; the
    /// invocation is not forcibly killed.
    async fn cancel(&self, agent_name: &AgentName, key: &IdempotencyKey);
}

/// Scripted behavior for one mock agent
#[derive(Clone, Debug)]
struct AgentScript {
    confidence: f64,
    result: serde_json::Value,
    cost_cents: u64,
    artifacts_requested: Vec<String>,
    /// Transient failures to emit before succeeding
    transient_failures: u32,
    /// Always violate the result contract
    malformed: bool,
}

/// A mock adapter for tests: scripted outcomes, observable billing, and
/// idempotency-key memoization.
pub struct MockInvoker {
    scripts: Mutex<HashMap<AgentName, AgentScript>>,
    /// Outcomes memoized per idempotency key — re-issues are not billed
    completed: Mutex<HashMap<String, AgentOutput>>,
    /// Billed (successful, non-memoized) invocations per agent
    billed: Mutex<HashMap<AgentName, u32>>,
    /// All invocation attempts per agent, including failed ones
    attempts: Mutex<HashMap<AgentName, u32>>,
    cancelled: Mutex<HashSet<AgentName>>,
    delay: Option<Duration>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            billed: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
            delay: None,
        }
    }

    /// Register an agent that succeeds with the given confidence
    pub fn with_agent(self, name: impl Into<String>, confidence: f64) -> Self {
        self.scripts.lock().unwrap().insert(
            AgentName::new(name),
            AgentScript {
                confidence,
                result: serde_json::json!({ "summary": "analysis complete" }),
                cost_cents: 100,
                artifacts_requested: vec!["xlsx".into()],
                transient_failures: 0,
                malformed: false,
            },
        );
        self
    }

    /// Make an agent fail transiently `n` times before succeeding
    pub fn with_transient_failures(self, name: impl Into<String>, n: u32) -> Self {
        let name = AgentName::new(name);
        if let Some(script) = self.scripts.lock().unwrap().get_mut(&name) {
            script.transient_failures = n;
        }
        self
    }

    /// Make an agent always return a contract-violating result
    pub fn with_malformed(self, name: impl Into<String>) -> Self {
        let name = AgentName::new(name);
        if let Some(script) = self.scripts.lock().unwrap().get_mut(&name) {
            script.malformed = true;
        }
        self
    }

    /// Override the scripted cost for an agent
    pub fn with_cost_cents(self, name: impl Into<String>, cost: u64) -> Self {
        let name = AgentName::new(name);
        if let Some(script) = self.scripts.lock().unwrap().get_mut(&name) {
            script.cost_cents = cost;
        }
        self
    }

    /// Sleep this long inside every invocation (for overlap tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Billed invocations for one agent
    pub fn billed_count(&self, name: &AgentName) -> u32 {
        self.billed.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// All attempts for one agent, including transient failures
    pub fn attempt_count(&self, name: &AgentName) -> u32 {
        self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Whether an advisory cancel was received for this agent
    pub fn was_cancelled(&self, name: &AgentName) -> bool {
        self.cancelled.lock().unwrap().contains(name)
    }
}

impl Default for MockInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentInvoker for MockInvoker {
    async fn invoke(
        &self,
        request: AgentRequest,
        progress: &dyn ProgressBroadcaster,
    ) -> Result<AgentOutput, AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let key = request.idempotency_key.to_string();

        // Same key, same outcome, no second billing
        if let Some(memoized) = self.completed.lock().unwrap().get(&key) {
            return Ok(memoized.clone());
        }

        *self
            .attempts
            .lock()
            .unwrap()
            .entry(request.agent_name.clone())
            .or_insert(0) += 1;

        progress.broadcast(ProgressEvent::agent_tick(
            request.work_order_id.clone(),
            request.idempotency_key.stage,
            request.agent_name.clone(),
            0,
            "invocation started",
        ));

        let output = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.get_mut(&request.agent_name).ok_or_else(|| {
                AdapterError::Unavailable {
                    agent: request.agent_name.clone(),
                    reason: "no such capability".into(),
                }
            })?;

            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(AdapterError::Timeout {
                    agent: request.agent_name.clone(),
                });
            }
            if script.malformed {
                return Err(AdapterError::Malformed {
                    agent: request.agent_name.clone(),
                    reason: "confidence field missing".into(),
                });
            }

            AgentOutput::new(script.result.clone(), script.confidence)
                .with_cost_cents(script.cost_cents)
                .with_duration_ms(5)
                .with_artifacts_requested(script.artifacts_requested.clone())
                .with_trace_event(format!("mock run for objective: {}", request.objective))
        };

        *self
            .billed
            .lock()
            .unwrap()
            .entry(request.agent_name.clone())
            .or_insert(0) += 1;
        self.completed.lock().unwrap().insert(key, output.clone());

        progress.broadcast(ProgressEvent::agent_tick(
            request.work_order_id,
            request.idempotency_key.stage,
            request.agent_name,
            100,
            "invocation complete",
        ));

        Ok(output)
    }

    async fn cancel(&self, agent_name: &AgentName, _key: &IdempotencyKey) {
        self.cancelled.lock().unwrap().insert(agent_name.clone());
    }
}
