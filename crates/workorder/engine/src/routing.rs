//! Capability routing
//!
//! Maps a work order's objective text and dataset kinds to the analysis
//! agents to invoke. The table is fixed at compile time; routing is a pure
//! function of its inputs so the same work order always routes the same way.

use std::collections::BTreeSet;

use workorder_types::{AgentName, DatasetKind, DatasetRef};

/// Agents implied by the kind of data submitted
fn agents_for_kind(kind: DatasetKind) -> &'static [&'static str] {
    match kind {
        DatasetKind::GeneralLedger => &["ledger-reconciliation"],
        DatasetKind::Transactions => &["anomaly-scan"],
        DatasetKind::Portfolio => &["portfolio-exposure"],
        DatasetKind::MarketData => &["market-risk"],
        // Reference data supports other analyses, it implies none itself
        DatasetKind::Reference => &[],
    }
}

/// Keyword hints in the objective text
const KEYWORD_TABLE: &[(&str, &str)] = &[
    ("anomal", "anomaly-scan"),
    ("fraud", "anomaly-scan"),
    ("unusual", "anomaly-scan"),
    ("reconcil", "ledger-reconciliation"),
    ("exposure", "portfolio-exposure"),
    ("concentration", "portfolio-exposure"),
    ("risk", "market-risk"),
    ("volatil", "market-risk"),
];

/// Select the agents to fan out to, in stable sorted order.
///
/// Empty output means no capability matches; the caller treats that as a
/// validation failure.
pub fn select_agents(objective: &str, datasets: &[DatasetRef]) -> Vec<AgentName> {
    let mut selected = BTreeSet::new();

    for dataset in datasets {
        for agent in agents_for_kind(dataset.kind) {
            selected.insert(AgentName::new(*agent));
        }
    }

    let objective = objective.to_lowercase();
    for (keyword, agent) in KEYWORD_TABLE {
        if objective.contains(keyword) {
            selected.insert(AgentName::new(*agent));
        }
    }

    selected.into_iter().collect()
}
