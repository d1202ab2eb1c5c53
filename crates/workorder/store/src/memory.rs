//! In-memory state store backend.
//!
//! Useful for tests and embedded deployments. The single `RwLock` write
//! section makes the version check and the write one atomic operation, which
//! is all the optimistic-concurrency contract requires.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use workorder_types::{
    TenantId, WorkOrder, WorkOrderError, WorkOrderId, WorkOrderResult,
};

use crate::StateStore;

/// In-memory implementation of [`StateStore`]
pub struct InMemoryStateStore {
    orders: RwLock<HashMap<WorkOrderId, WorkOrder>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn insert(&self, work_order: &WorkOrder) -> WorkOrderResult<()> {
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.get(&work_order.id) {
            return Err(WorkOrderError::ConcurrencyConflict {
                expected: 0,
                actual: existing.version,
            });
        }
        let mut stored = work_order.clone();
        stored.version = 1;
        debug!(work_order = %stored.id, tenant = %stored.tenant_id, "inserting work order");
        orders.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn load(
        &self,
        tenant_id: &TenantId,
        id: &WorkOrderId,
    ) -> WorkOrderResult<Option<WorkOrder>> {
        let orders = self.orders.read().await;
        Ok(orders
            .get(id)
            .filter(|wo| wo.tenant_id == *tenant_id)
            .cloned())
    }

    async fn update(
        &self,
        work_order: &WorkOrder,
        expected_version: u64,
    ) -> WorkOrderResult<u64> {
        let mut orders = self.orders.write().await;
        let existing = orders
            .get(&work_order.id)
            .filter(|wo| wo.tenant_id == work_order.tenant_id)
            .ok_or_else(|| WorkOrderError::NotFound(work_order.id.clone()))?;

        if existing.stage.is_terminal() {
            return Err(WorkOrderError::TerminalState(existing.stage));
        }
        if existing.version != expected_version {
            return Err(WorkOrderError::ConcurrencyConflict {
                expected: expected_version,
                actual: existing.version,
            });
        }

        let mut stored = work_order.clone();
        stored.version = expected_version + 1;
        let new_version = stored.version;
        debug!(
            work_order = %stored.id,
            stage = %stored.stage,
            version = new_version,
            "checkpoint written"
        );
        orders.insert(stored.id.clone(), stored);
        Ok(new_version)
    }

    async fn request_cancellation(
        &self,
        tenant_id: &TenantId,
        id: &WorkOrderId,
    ) -> WorkOrderResult<()> {
        let mut orders = self.orders.write().await;
        let wo = orders
            .get_mut(id)
            .filter(|wo| wo.tenant_id == *tenant_id)
            .ok_or_else(|| WorkOrderError::NotFound(id.clone()))?;

        if wo.stage.is_terminal() {
            return Err(WorkOrderError::TerminalState(wo.stage));
        }
        wo.cancel_requested = true;
        wo.record_event("cancellation_requested", "external cancellation call");
        // A persisted mutation: bump so an in-flight writer conflicts and
        // reloads with the flag visible.
        wo.version += 1;
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> WorkOrderResult<Vec<WorkOrderId>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|wo| wo.tenant_id == *tenant_id)
            .map(|wo| wo.id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workorder_types::{
        DatasetId, DatasetKind, DatasetRef, ErrorKind, PolicyPackId, Stage,
    };

    fn make_order(tenant: &str) -> WorkOrder {
        WorkOrder::new(
            TenantId::new(tenant),
            "reconcile positions",
            vec![DatasetRef::new(
                DatasetId::new("ds-1"),
                DatasetKind::Portfolio,
                1,
            )],
            vec![PolicyPackId::new("core")],
        )
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        let loaded = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, wo.id);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_rejected() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        // A double-submit must not clobber the stored state
        let mut advanced = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        advanced.transition_to(Stage::DqValidation).unwrap();
        store.update(&advanced, 1).await.unwrap();

        let err = store.insert(&wo).await.unwrap_err();
        assert!(matches!(
            err,
            WorkOrderError::ConcurrencyConflict {
                expected: 0,
                actual: 2
            }
        ));
        let stored = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::DqValidation);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        let other = store
            .load(&TenantId::new("rival"), &wo.id)
            .await
            .unwrap();
        assert!(other.is_none());

        let err = store
            .request_cancellation(&TenantId::new("rival"), &wo.id)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkOrderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        let mut loaded = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        loaded.transition_to(Stage::DqValidation).unwrap();
        let v = store.update(&loaded, 1).await.unwrap();
        assert_eq!(v, 2);

        let reloaded = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        assert_eq!(reloaded.version, 2);
        assert_eq!(reloaded.stage, Stage::DqValidation);
    }

    #[tokio::test]
    async fn test_stale_writer_conflicts() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        // Two writers read version 1
        let mut a = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        let mut b = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();

        a.transition_to(Stage::DqValidation).unwrap();
        store.update(&a, 1).await.unwrap();

        b.transition_to(Stage::DqValidation).unwrap();
        let err = store.update(&b, 1).await.unwrap_err();
        assert!(matches!(
            err,
            WorkOrderError::ConcurrencyConflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_rejects_all_writes() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        let mut loaded = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        loaded
            .fail(ErrorKind::Validation, "bad dataset")
            .unwrap();
        store.update(&loaded, 1).await.unwrap();

        // Any further write fails, regardless of version
        let err = store.update(&loaded, 2).await.unwrap_err();
        assert!(matches!(err, WorkOrderError::TerminalState(Stage::Failed)));

        let err = store
            .request_cancellation(&wo.tenant_id, &wo.id)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkOrderError::TerminalState(Stage::Failed)));
    }

    #[tokio::test]
    async fn test_cancellation_conflicts_in_flight_writer() {
        let store = InMemoryStateStore::new();
        let wo = make_order("acme");
        store.insert(&wo).await.unwrap();

        let mut in_flight = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        store
            .request_cancellation(&wo.tenant_id, &wo.id)
            .await
            .unwrap();

        in_flight.transition_to(Stage::DqValidation).unwrap();
        let err = store.update(&in_flight, 1).await.unwrap_err();
        assert!(matches!(err, WorkOrderError::ConcurrencyConflict { .. }));

        // Reloading makes the flag visible
        let reloaded = store.load(&wo.tenant_id, &wo.id).await.unwrap().unwrap();
        assert!(reloaded.cancel_requested);
    }

    #[tokio::test]
    async fn test_list_for_tenant() {
        let store = InMemoryStateStore::new();
        let a = make_order("acme");
        let b = make_order("acme");
        let c = make_order("rival");
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.insert(&c).await.unwrap();

        let acme = store.list_for_tenant(&TenantId::new("acme")).await.unwrap();
        assert_eq!(acme.len(), 2);
        assert!(store.exists(&TenantId::new("rival"), &c.id).await.unwrap());
    }
}
