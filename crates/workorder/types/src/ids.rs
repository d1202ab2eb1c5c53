//! Identifier newtypes for the work order domain

use serde::{Deserialize, Serialize};

use crate::Stage;

/// Unique identifier for a work order
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkOrderId(pub String);

impl WorkOrderId {
    /// Generate a new random WorkOrderId
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a WorkOrderId from a known string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Short display form (first 8 chars)
    pub fn short(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl std::fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant isolation boundary — every store read and write is scoped to it
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an uploaded dataset
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a policy pack to enforce at the guardrail stage
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyPackId(pub String);

impl PolicyPackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PolicyPackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a specialized analysis capability behind the invocation adapter
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentName(pub String);

impl AgentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic key for one node execution attempt.
///
/// Derived from `(work_order_id, stage, retry_count)` so that a re-issued
/// node execution after a crash carries the same key and downstream
/// collaborators can suppress duplicate billed side effects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub work_order_id: WorkOrderId,
    pub stage: Stage,
    pub retry_count: u32,
}

impl IdempotencyKey {
    pub fn new(work_order_id: WorkOrderId, stage: Stage, retry_count: u32) -> Self {
        Self {
            work_order_id,
            stage,
            retry_count,
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.work_order_id,
            self.stage.as_str(),
            self.retry_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let a = WorkOrderId::generate();
        let b = WorkOrderId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_form() {
        let id = WorkOrderId::new("abcdef1234567890");
        assert_eq!(id.short(), "abcdef12");
    }

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let wo = WorkOrderId::new("wo-1");
        let a = IdempotencyKey::new(wo.clone(), Stage::Guardrail, 2);
        let b = IdempotencyKey::new(wo, Stage::Guardrail, 2);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "wo-1:guardrail:2");
    }

    #[test]
    fn test_idempotency_key_differs_per_retry_cycle() {
        let wo = WorkOrderId::new("wo-1");
        let a = IdempotencyKey::new(wo.clone(), Stage::AgentInvocation, 0);
        let b = IdempotencyKey::new(wo, Stage::AgentInvocation, 1);
        assert_ne!(a, b);
    }
}
