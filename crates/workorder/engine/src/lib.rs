//! Work Order Graph Execution Engine
//!
//! Drives each work order through the fixed workflow graph:
//!
//! ```text
//! intake_validated → dq_validation → routing → agent_invocation
//!     → guardrail → critic → approval_gate → artifact_generation → completed
//! ```
//!
//! with one bounded back edge (guardrail/critic → agent re-invocation) and
//! one designed suspension point (the approval gate).
//!
//! Key Concepts:
//! - **One node per advance**: each [`ExecutionEngine::advance`] call runs
//!   exactly one node, or one fan-out set of agent invocations, then
//!   persists a checkpoint and returns its worker.
//! - **Checkpoint**: the single atomic store write per advance; state,
//!   version bump, and audit entries land together or not at all.
//! - **Resumability lives in storage**: a suspended work order is a row
//!   with stage `awaiting_approval`, not a parked thread or coroutine.
//! - **Bounded feedback**: the guardrail/critic retry cycle is an explicit
//!   counter on the aggregate, so it survives process restarts and can
//!   never loop unbounded.

#![deny(unsafe_code)]

mod config;
mod engine;
mod retry;
mod routing;

pub use config::{EngineConfig, RetryConfig};
pub use engine::{AdvanceResult, ExecutionEngine};
pub use retry::with_backoff;
pub use routing::select_agents;
