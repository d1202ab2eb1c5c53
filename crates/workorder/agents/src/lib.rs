//! External Collaborator Contracts
//!
//! The orchestration engine has no opinion on what an analysis agent does
//! internally, how progress reaches a UI, where policy packs live, or how
//! output documents get rendered. This crate defines the narrow contracts it
//! consumes and exposes:
//!
//! - [`AgentInvoker`]: uniform interface to any specialized analysis
//!   capability. Safe to call twice with the same idempotency key without
//!   duplicate billed side effects; cancellation is advisory, not a kill.
//! - [`ProgressBroadcaster`]: sink for stage/agent progress events.
//! - [`PolicyPackSource`] / [`BaselineSource`]: read-only lookups, loaded
//!   once per work order lifetime so a mid-run policy edit cannot drift a
//!   running evaluation.
//! - [`ArtifactGenerator`]: requests rendering of output documents and
//!   records the resulting descriptors; the rendering itself is out of scope.
//!
//! In-memory and mock implementations live alongside each contract, in the
//! shape the engine's tests consume them.

#![deny(unsafe_code)]

mod artifact;
mod baseline;
mod invoker;
mod policy;
mod progress;

pub use artifact::*;
pub use baseline::*;
pub use invoker::*;
pub use policy::*;
pub use progress::*;
