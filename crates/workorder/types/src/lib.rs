//! Work Order Domain Types
//!
//! A **work order** is one unit of orchestrated processing: an uploaded
//! financial dataset driven through a fixed directed workflow of validation,
//! specialized analysis, policy enforcement, statistical review, human
//! approval, and output generation.
//!
//! # Key Concepts
//!
//! - **WorkOrder**: The root aggregate. One store row per instance, mutated
//!   only by the execution engine and by approval-decision submission.
//! - **Stage**: The work order's position in the fixed workflow graph. The
//!   one permitted backward path is the guardrail/critic → agent re-invocation
//!   cycle, bounded by `retry_count < max_retries`.
//! - **ExecutionLogEntry**: The append-only, totally ordered audit trail.
//!   Never mutated, never deleted.
//! - **IdempotencyKey**: Deterministic identifier derived from
//!   `(work_order_id, stage, retry_count)` so re-issued node executions never
//!   duplicate billed side effects.
//!
//! # Design Principles
//!
//! 1. Invariants live on the aggregate. Stage transitions, gate bookkeeping,
//!    and the retry bound are enforced by `WorkOrder` methods, not by callers.
//! 2. Terminal states are immutable. Once completed, failed, or cancelled, a
//!    work order accepts no further mutation.
//! 3. Every failure is explicit. Errors append to the aggregate's error list;
//!    there is no silent failure path.

#![deny(unsafe_code)]

mod errors;
mod ids;
mod output;
mod record;
mod stage;
mod work_order;

pub use errors::*;
pub use ids::*;
pub use output::*;
pub use record::*;
pub use stage::*;
pub use work_order::*;
