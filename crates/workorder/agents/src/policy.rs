//! Policy packs for the guardrail node
//!
//! A policy pack is a named, read-only set of rules evaluated against every
//! agent output. The engine loads the pack once when the work order first
//! reaches the guardrail node; a mid-run edit to the pack never changes a
//! running evaluation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use workorder_types::{AgentName, AgentOutput, GuardrailCheck, PolicyPackId, Severity};

/// The machine-checkable condition a rule enforces
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyCondition {
    /// Agent-reported confidence must be at least this value
    MinConfidence { floor: f64 },
    /// Billed invocation cost must not exceed this value
    MaxCostCents { ceiling: u64 },
    /// Invocation wall-clock duration must not exceed this value
    MaxDurationMs { ceiling: u64 },
    /// The output must carry a non-empty execution trace
    RequireTrace,
}

/// One rule in a policy pack
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub condition: PolicyCondition,
}

impl PolicyRule {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        condition: PolicyCondition,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity,
            condition,
        }
    }

    /// Evaluate this rule against one agent output
    pub fn evaluate(&self, agent_name: &AgentName, output: &AgentOutput) -> GuardrailCheck {
        let violation = match &self.condition {
            PolicyCondition::MinConfidence { floor } => (output.confidence < *floor).then(|| {
                format!(
                    "confidence {:.2} below floor {:.2}",
                    output.confidence, floor
                )
            }),
            PolicyCondition::MaxCostCents { ceiling } => (output.cost_cents > *ceiling)
                .then(|| format!("cost {} exceeds ceiling {}", output.cost_cents, ceiling)),
            PolicyCondition::MaxDurationMs { ceiling } => (output.duration_ms > *ceiling)
                .then(|| format!("duration {}ms exceeds ceiling {}ms", output.duration_ms, ceiling)),
            PolicyCondition::RequireTrace => output
                .trace
                .is_empty()
                .then(|| "execution trace is empty".to_string()),
        };

        match violation {
            Some(reason) => GuardrailCheck::failed(
                &self.id,
                &self.description,
                agent_name.clone(),
                self.severity,
                reason,
            ),
            None => GuardrailCheck::passed(
                &self.id,
                &self.description,
                agent_name.clone(),
                self.severity,
            ),
        }
    }
}

/// A named, versioned set of guardrail rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyPack {
    pub id: PolicyPackId,
    pub rules: Vec<PolicyRule>,
}

impl PolicyPack {
    pub fn new(id: PolicyPackId) -> Self {
        Self {
            id,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Evaluate every rule against one agent output, in rule order
    pub fn evaluate(&self, agent_name: &AgentName, output: &AgentOutput) -> Vec<GuardrailCheck> {
        self.rules
            .iter()
            .map(|rule| rule.evaluate(agent_name, output))
            .collect()
    }
}

/// Read-only policy pack lookup
#[async_trait]
pub trait PolicyPackSource: Send + Sync {
    /// Fetch a pack by id. `None` when no such pack exists.
    async fn load(&self, id: &PolicyPackId) -> Option<PolicyPack>;
}

/// Fixed in-memory policy packs for tests and single-node deployments.
/// Immutable once built, so a running evaluation can never observe drift.
pub struct StaticPolicySource {
    packs: HashMap<PolicyPackId, PolicyPack>,
}

impl StaticPolicySource {
    pub fn new() -> Self {
        Self {
            packs: HashMap::new(),
        }
    }

    pub fn with_pack(mut self, pack: PolicyPack) -> Self {
        self.packs.insert(pack.id.clone(), pack);
        self
    }
}

impl Default for StaticPolicySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyPackSource for StaticPolicySource {
    async fn load(&self, id: &PolicyPackId) -> Option<PolicyPack> {
        self.packs.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workorder_types::CheckStatus;

    fn sample_pack() -> PolicyPack {
        PolicyPack::new(PolicyPackId::new("std-v1"))
            .with_rule(PolicyRule::new(
                "min-confidence",
                "Confidence above floor",
                Severity::High,
                PolicyCondition::MinConfidence { floor: 0.6 },
            ))
            .with_rule(PolicyRule::new(
                "max-cost",
                "Invocation cost within budget",
                Severity::Critical,
                PolicyCondition::MaxCostCents { ceiling: 500 },
            ))
            .with_rule(PolicyRule::new(
                "require-trace",
                "Execution trace present",
                Severity::Low,
                PolicyCondition::RequireTrace,
            ))
    }

    #[test]
    fn test_all_rules_pass() {
        let output = AgentOutput::new(serde_json::json!({}), 0.9)
            .with_cost_cents(100)
            .with_trace_event("ran");
        let checks = sample_pack().evaluate(&AgentName::new("anomaly-scan"), &output);
        assert_eq!(checks.len(), 3);
        assert!(checks.iter().all(|c| c.status == CheckStatus::Passed));
    }

    #[test]
    fn test_low_confidence_fails_with_reason() {
        let output = AgentOutput::new(serde_json::json!({}), 0.4).with_trace_event("ran");
        let checks = sample_pack().evaluate(&AgentName::new("anomaly-scan"), &output);
        let failed: Vec<_> = checks.iter().filter(|c| c.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].rule_id, "min-confidence");
        assert!(failed[0].reason.as_deref().unwrap().contains("0.40"));
    }

    #[test]
    fn test_cost_ceiling_is_critical() {
        let output = AgentOutput::new(serde_json::json!({}), 0.9)
            .with_cost_cents(9000)
            .with_trace_event("ran");
        let checks = sample_pack().evaluate(&AgentName::new("anomaly-scan"), &output);
        let failed: Vec<_> = checks.iter().filter(|c| c.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].severity, Severity::Critical);
    }

    #[test]
    fn test_empty_trace_fails() {
        let output = AgentOutput::new(serde_json::json!({}), 0.9);
        let checks = sample_pack().evaluate(&AgentName::new("anomaly-scan"), &output);
        assert!(checks
            .iter()
            .any(|c| c.rule_id == "require-trace" && c.is_failure()));
    }

    #[tokio::test]
    async fn test_static_source_lookup() {
        let source = StaticPolicySource::new().with_pack(sample_pack());
        assert!(source.load(&PolicyPackId::new("std-v1")).await.is_some());
        assert!(source.load(&PolicyPackId::new("missing")).await.is_none());
    }
}
