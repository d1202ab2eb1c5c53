//! Work Order Dispatcher
//!
//! The scheduling layer between work order submission and the execution
//! engine. The engine advances one node per call and returns; this crate
//! decides when those calls happen:
//!
//! Key Concepts:
//! - **Coalescing**: concurrent enqueues for the same work order collapse
//!   into one scheduled advance — at most one advance runs per work order
//!   at a time, which is what makes the store's version check a formality
//!   rather than a hot path.
//! - **Tenant fairness**: a per-tenant semaphore bounds concurrent advances
//!   so one tenant's burst cannot starve the others.
//! - **Suspension exits the queue**: a work order awaiting approval holds
//!   no worker and no queue slot; resolving the decision re-enqueues it.

#![deny(unsafe_code)]

mod dispatcher;

pub use dispatcher::{
    DispatchError, DispatchEvent, DispatchOutcome, Dispatcher, DispatcherConfig,
};
