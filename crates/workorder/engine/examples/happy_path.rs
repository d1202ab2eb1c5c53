//! Drives one work order through the full workflow with mock collaborators.
//!
//! ```sh
//! cargo run -p workorder-engine --example happy_path
//! ```

use std::sync::Arc;

use anyhow::Result;
use workorder_agents::{
    ChannelBroadcaster, MockArtifactGenerator, MockInvoker, PolicyCondition, PolicyPack,
    PolicyRule, StaticBaselines, StaticPolicySource,
};
use workorder_engine::{EngineConfig, ExecutionEngine};
use workorder_store::{InMemoryStateStore, StateStore};
use workorder_types::{
    DatasetId, DatasetKind, DatasetRef, PolicyPackId, Severity, TenantId, WorkOrder,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = Arc::new(InMemoryStateStore::new());
    let pack = PolicyPack::new(PolicyPackId::new("std-v1"))
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
        ));

    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let mut progress = broadcaster.subscribe();

    let engine = ExecutionEngine::new(
        store.clone(),
        Arc::new(MockInvoker::new().with_agent("anomaly-scan", 0.91)),
        Arc::new(StaticPolicySource::new().with_pack(pack)),
        Arc::new(StaticBaselines::new().with_baseline("anomaly-scan", 0.88, 0.05)),
        Arc::new(MockArtifactGenerator::new()),
        broadcaster,
    )
    .with_config(EngineConfig::default());

    let tenant = TenantId::new("acme");
    let wo = WorkOrder::new(
        tenant.clone(),
        "flag unusual journal entries in the Q3 transaction extract",
        vec![DatasetRef::new(
            DatasetId::new("ds-q3-txn"),
            DatasetKind::Transactions,
            1,
        )],
        vec![PolicyPackId::new("std-v1")],
    );
    let id = engine.submit(wo).await?;

    let outcome = engine.run_to_completion(&tenant, &id).await?;
    println!("outcome: {outcome:?}");

    while let Ok(event) = progress.try_recv() {
        println!("[{}] {} — {}", event.timestamp, event.stage.as_str(), event.message);
    }

    if let Some(wo) = store.load(&tenant, &id).await? {
        for artifact in &wo.artifacts {
            println!("artifact: {} at {}", artifact.kind, artifact.location);
        }
    }
    Ok(())
}
