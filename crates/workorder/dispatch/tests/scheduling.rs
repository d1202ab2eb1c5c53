//! Scheduling tests: the dispatcher driving work orders end to end,
//! coalesced enqueues, per-tenant concurrency bounds, suspension handling,
//! and shutdown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use workorder_agents::{
    AdapterError, AgentInvoker, AgentRequest, ChannelBroadcaster, MockArtifactGenerator,
    MockInvoker, PolicyCondition, PolicyPack, PolicyRule, ProgressBroadcaster, StaticBaselines,
    StaticPolicySource,
};
use workorder_dispatch::{DispatchError, DispatchOutcome, Dispatcher, DispatcherConfig};
use workorder_engine::{EngineConfig, ExecutionEngine};
use workorder_store::{InMemoryStateStore, StateStore};
use workorder_types::{
    AgentName, AgentOutput, DatasetId, DatasetKind, DatasetRef, Decision, IdempotencyKey,
    PolicyPackId, Severity, Stage, TenantId, WorkOrder, WorkOrderId, GATE_OVERRIDE_GUARDRAIL,
};

fn tenant() -> TenantId {
    TenantId::new("acme")
}

fn standard_pack() -> PolicyPack {
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
}

fn anomaly_order() -> WorkOrder {
    WorkOrder::new(
        tenant(),
        "flag unusual journal entries",
        vec![DatasetRef::new(
            DatasetId::new("ds-1"),
            DatasetKind::Transactions,
            1,
        )],
        vec![PolicyPackId::new("std-v1")],
    )
}

fn build_engine(invoker: Arc<dyn AgentInvoker>, store: Arc<InMemoryStateStore>) -> ExecutionEngine {
    ExecutionEngine::new(
        store,
        invoker,
        Arc::new(StaticPolicySource::new().with_pack(standard_pack())),
        Arc::new(StaticBaselines::new().with_baseline("anomaly-scan", 0.88, 0.05)),
        Arc::new(MockArtifactGenerator::new()),
        Arc::new(ChannelBroadcaster::default()),
    )
    .with_config(EngineConfig::fast())
}

/// Wait until the dispatcher reports the given outcome for this work order
async fn await_outcome(
    rx: &mut tokio::sync::broadcast::Receiver<workorder_dispatch::DispatchEvent>,
    id: &WorkOrderId,
    want: impl Fn(&DispatchOutcome) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if &event.work_order_id == id && want(&event.outcome) {
                return;
            }
        }
    })
    .await
    .expect("dispatcher never reported the expected outcome");
}

/// Wait until every listed work order completes, in whatever order the
/// workers finish them. One receive loop, so no terminal event is lost to
/// an earlier wait on the shared receiver.
async fn await_all_completed(
    rx: &mut tokio::sync::broadcast::Receiver<workorder_dispatch::DispatchEvent>,
    ids: &[WorkOrderId],
) {
    let mut remaining: HashSet<WorkOrderId> = ids.iter().cloned().collect();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !remaining.is_empty() {
            let event = rx.recv().await.unwrap();
            if matches!(event.outcome, DispatchOutcome::Terminal(Stage::Completed)) {
                remaining.remove(&event.work_order_id);
            }
        }
    })
    .await
    .expect("dispatcher never completed every work order");
}

#[tokio::test]
async fn test_dispatcher_drives_to_completion() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(build_engine(
        Arc::new(MockInvoker::new().with_agent("anomaly-scan", 0.9)),
        store.clone(),
    ));
    let dispatcher = Dispatcher::start(engine, DispatcherConfig::default());
    let mut rx = dispatcher.events();

    let wo = anomaly_order();
    let id = wo.id.clone();
    store.insert(&wo).await.unwrap();

    assert!(dispatcher.enqueue(&tenant(), &id).await.unwrap());
    await_outcome(&mut rx, &id, |o| {
        matches!(o, DispatchOutcome::Terminal(Stage::Completed))
    })
    .await;

    let wo = store.load(&tenant(), &id).await.unwrap().unwrap();
    assert_eq!(wo.stage, Stage::Completed);
    assert_eq!(wo.artifacts.len(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_enqueues_are_coalesced() {
    let store = Arc::new(InMemoryStateStore::new());
    let invoker = Arc::new(
        MockInvoker::new()
            .with_agent("anomaly-scan", 0.9)
            .with_delay(Duration::from_millis(20)),
    );
    let engine = Arc::new(build_engine(invoker, store.clone()));
    let dispatcher = Dispatcher::start(engine, DispatcherConfig::default());
    let mut rx = dispatcher.events();

    let wo = anomaly_order();
    let id = wo.id.clone();
    store.insert(&wo).await.unwrap();

    assert!(dispatcher.enqueue(&tenant(), &id).await.unwrap());
    // The work order is queued or running; these collapse into it
    assert!(!dispatcher.enqueue(&tenant(), &id).await.unwrap());
    assert!(!dispatcher.enqueue(&tenant(), &id).await.unwrap());

    await_outcome(&mut rx, &id, |o| matches!(o, DispatchOutcome::Terminal(_))).await;

    // Re-enqueueing after it left the queue is a fresh schedule again,
    // and advancing a completed order is a no-op.
    assert!(dispatcher.enqueue(&tenant(), &id).await.unwrap());
    await_outcome(&mut rx, &id, |o| {
        matches!(o, DispatchOutcome::Terminal(Stage::Completed))
    })
    .await;
    dispatcher.shutdown().await;
}

/// Tracks how many invocations run at once
struct CountingInvoker {
    inner: MockInvoker,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingInvoker {
    fn new(inner: MockInvoker) -> Self {
        Self {
            inner,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentInvoker for CountingInvoker {
    async fn invoke(
        &self,
        request: AgentRequest,
        progress: &dyn ProgressBroadcaster,
    ) -> Result<AgentOutput, AdapterError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.inner.invoke(request, progress).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn cancel(&self, agent_name: &AgentName, key: &IdempotencyKey) {
        self.inner.cancel(agent_name, key).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_tenant_concurrency_bound() {
    let store = Arc::new(InMemoryStateStore::new());
    let invoker = Arc::new(CountingInvoker::new(
        MockInvoker::new()
            .with_agent("anomaly-scan", 0.9)
            .with_delay(Duration::from_millis(20)),
    ));
    let engine = Arc::new(build_engine(invoker.clone(), store.clone()));
    let dispatcher = Dispatcher::start(
        engine,
        DispatcherConfig {
            worker_count: 4,
            per_tenant_limit: 1,
            ..DispatcherConfig::default()
        },
    );
    let mut rx = dispatcher.events();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let wo = anomaly_order();
        ids.push(wo.id.clone());
        store.insert(&wo).await.unwrap();
    }
    for id in &ids {
        assert!(dispatcher.enqueue(&tenant(), id).await.unwrap());
    }
    await_all_completed(&mut rx, &ids).await;

    // Four workers, one tenant slot: invocations never overlapped
    assert_eq!(invoker.peak.load(Ordering::SeqCst), 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_tiny_queue_does_not_stall_requeues() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(build_engine(
        Arc::new(MockInvoker::new().with_agent("anomaly-scan", 0.9)),
        store.clone(),
    ));
    // One worker, one queue slot: every Ready requeue meets a full queue
    // while the other order is waiting.
    let dispatcher = Dispatcher::start(
        engine,
        DispatcherConfig {
            worker_count: 1,
            queue_capacity: 1,
            ..DispatcherConfig::default()
        },
    );
    let mut rx = dispatcher.events();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let wo = anomaly_order();
        ids.push(wo.id.clone());
        store.insert(&wo).await.unwrap();
    }
    for id in &ids {
        assert!(dispatcher.enqueue(&tenant(), id).await.unwrap());
    }
    await_all_completed(&mut rx, &ids).await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_suspension_leaves_the_queue_and_resumes_on_decision() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(build_engine(
        Arc::new(
            MockInvoker::new()
                .with_agent("anomaly-scan", 0.9)
                .with_cost_cents("anomaly-scan", 9000),
        ),
        store.clone(),
    ));
    let dispatcher = Dispatcher::start(engine.clone(), DispatcherConfig::default());
    let mut rx = dispatcher.events();

    let wo = anomaly_order();
    let id = wo.id.clone();
    store.insert(&wo).await.unwrap();

    dispatcher.enqueue(&tenant(), &id).await.unwrap();
    await_outcome(&mut rx, &id, |o| matches!(o, DispatchOutcome::Suspended)).await;
    assert_eq!(
        store.load(&tenant(), &id).await.unwrap().unwrap().stage,
        Stage::AwaitingApproval
    );

    engine
        .submit_decision(
            &tenant(),
            &id,
            GATE_OVERRIDE_GUARDRAIL,
            Decision::Approved,
            "alice",
            "budget overrun reviewed and accepted",
        )
        .await
        .unwrap();
    dispatcher.enqueue(&tenant(), &id).await.unwrap();
    await_outcome(&mut rx, &id, |o| {
        matches!(o, DispatchOutcome::Terminal(Stage::Completed))
    })
    .await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_dispatcher_survives_an_external_racing_driver() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(build_engine(
        Arc::new(MockInvoker::new().with_agent("anomaly-scan", 0.9)),
        store.clone(),
    ));
    let dispatcher = Dispatcher::start(engine.clone(), DispatcherConfig::default());
    let mut rx = dispatcher.events();

    let wo = anomaly_order();
    let id = wo.id.clone();
    store.insert(&wo).await.unwrap();

    // An embedded driver and the dispatcher fight over the same work
    // order; version conflicts are retried, and the outcome is the same.
    dispatcher.enqueue(&tenant(), &id).await.unwrap();
    let _ = engine.run_to_completion(&tenant(), &id).await;

    await_outcome(&mut rx, &id, |o| {
        matches!(o, DispatchOutcome::Terminal(Stage::Completed))
    })
    .await;
    assert_eq!(
        store.load(&tenant(), &id).await.unwrap().unwrap().stage,
        Stage::Completed
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_rejected() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(build_engine(
        Arc::new(MockInvoker::new().with_agent("anomaly-scan", 0.9)),
        store.clone(),
    ));
    let dispatcher = Dispatcher::start(engine, DispatcherConfig::default());
    dispatcher.shutdown().await;

    let err = dispatcher
        .enqueue(&tenant(), &WorkOrderId::new("wo-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Shutdown));
}

#[tokio::test]
async fn test_missing_work_order_reports_an_error_outcome() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(build_engine(
        Arc::new(MockInvoker::new().with_agent("anomaly-scan", 0.9)),
        store.clone(),
    ));
    let dispatcher = Dispatcher::start(engine, DispatcherConfig::default());
    let mut rx = dispatcher.events();

    let id = WorkOrderId::new("nonexistent");
    dispatcher.enqueue(&tenant(), &id).await.unwrap();
    await_outcome(&mut rx, &id, |o| matches!(o, DispatchOutcome::Error(_))).await;
    dispatcher.shutdown().await;
}
