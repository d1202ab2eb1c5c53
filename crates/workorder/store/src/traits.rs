//! Storage trait definition.
//!
//! Defines the interface for work order state backends.

use async_trait::async_trait;
use workorder_types::{TenantId, WorkOrder, WorkOrderId, WorkOrderResult};

/// Trait for work order state backends.
///
/// All reads and writes are tenant-scoped; a work order belonging to another
/// tenant is indistinguishable from a missing one.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a newly created work order at version 1.
    ///
    /// The id must be unused: inserting over an existing work order fails
    /// with `ConcurrencyConflict` (expected version 0) so a double-submit
    /// cannot clobber in-flight state.
    async fn insert(&self, work_order: &WorkOrder) -> WorkOrderResult<()>;

    /// Load the current state of a work order.
    async fn load(&self, tenant_id: &TenantId, id: &WorkOrderId)
        -> WorkOrderResult<Option<WorkOrder>>;

    /// Atomically persist a mutated work order — the checkpoint write.
    ///
    /// Succeeds only when the stored version equals `expected_version` and
    /// the stored stage is not terminal; returns the new version. A version
    /// mismatch fails with `ConcurrencyConflict`, a terminal stored stage
    /// with `TerminalState`.
    async fn update(&self, work_order: &WorkOrder, expected_version: u64)
        -> WorkOrderResult<u64>;

    /// Set the cooperative cancellation flag.
    ///
    /// Allowed at any point except when the work order is already terminal.
    /// The engine honors the flag at the next node boundary.
    async fn request_cancellation(
        &self,
        tenant_id: &TenantId,
        id: &WorkOrderId,
    ) -> WorkOrderResult<()>;

    /// List the ids of all work orders for a tenant.
    async fn list_for_tenant(&self, tenant_id: &TenantId) -> WorkOrderResult<Vec<WorkOrderId>>;

    /// Check whether a work order exists for this tenant.
    async fn exists(&self, tenant_id: &TenantId, id: &WorkOrderId) -> WorkOrderResult<bool> {
        Ok(self.load(tenant_id, id).await?.is_some())
    }
}
