//! Work Order State Store
//!
//! The single authoritative record of one work order's full state. The store
//! is the serialization point for everything that mutates a work order: every
//! write carries the version the writer read, and a mismatch means a
//! concurrent writer raced and the caller must reload and retry.
//!
//! A successful `update` is the **checkpoint**: state plus version bump in
//! one atomic operation. The engine only re-issues a node after a crash if
//! the prior attempt's checkpoint was never written.
//!
//! Physical storage technology is unconstrained; the shipped backend is
//! in-memory. Everything is tenant-scoped.

#![deny(unsafe_code)]

mod memory;
mod traits;

pub use memory::InMemoryStateStore;
pub use traits::StateStore;
