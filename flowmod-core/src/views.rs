//! Read-only derivations over the ledger.
//!
//! Everything here is a pure function of the ledger (plus the read-only
//! providers) and is recomputed on every call. Nothing is cached, so views
//! can never go stale across mutations.

use crate::ledger::ModificationLedger;
use crate::providers::{StatisticsProvider, TopologyProvider};
use crate::types::{FlowNodeId, Modification, TokenModification, VariableModification};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Net token effect staged against a single flow node. Drives the diagram
/// badges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNodeModificationSummary {
    /// Tokens that will be created at this node.
    pub new_tokens: u32,
    /// Tokens that will be cancelled at this node.
    pub cancelled_tokens: u32,
    /// Cancelled tokens under the current instance filter.
    pub visible_cancelled_tokens: u32,
    /// Visible tokens cancelled inside this node's descendants by a cascade.
    pub cancelled_child_tokens: u32,
}

/// Fold every token record, in ledger order, into per-flow-node summaries.
///
/// `AddToken` accumulates into the node's `new_tokens`. `CancelToken`
/// overwrites the node's cancelled counts and cascades onto every descendant,
/// whose live counts come from the statistics provider. `MoveToken` is a
/// cancellation at the source plus a creation at the target, collapsed to one
/// new token when the source is multi-instance.
pub fn modifications_by_flow_node(
    ledger: &ModificationLedger,
    topology: &dyn TopologyProvider,
    statistics: &dyn StatisticsProvider,
) -> BTreeMap<FlowNodeId, FlowNodeModificationSummary> {
    let mut summaries: BTreeMap<FlowNodeId, FlowNodeModificationSummary> = BTreeMap::new();

    for modification in ledger.modifications() {
        let Modification::Token(token) = modification else {
            continue;
        };
        match token {
            TokenModification::AddToken {
                flow_node,
                affected_token_count,
                ..
            } => {
                summaries
                    .entry(flow_node.id.clone())
                    .or_default()
                    .new_tokens += affected_token_count;
            }

            TokenModification::CancelToken {
                flow_node,
                affected_token_count,
                visible_affected_token_count,
            } => {
                let mut cancelled_child_tokens = 0;
                for child_id in topology.flow_element_ids(&flow_node.id) {
                    let child = summaries.entry(child_id.clone()).or_default();
                    child.cancelled_tokens = statistics.total_running_instances(&child_id);
                    child.visible_cancelled_tokens =
                        statistics.total_running_instances_visible(&child_id);
                    cancelled_child_tokens += child.visible_cancelled_tokens;
                }
                let entry = summaries.entry(flow_node.id.clone()).or_default();
                entry.cancelled_tokens = *affected_token_count;
                entry.visible_cancelled_tokens = *visible_affected_token_count;
                entry.cancelled_child_tokens = cancelled_child_tokens;
            }

            TokenModification::MoveToken {
                flow_node,
                target_flow_node,
                affected_token_count,
                visible_affected_token_count,
                ..
            } => {
                {
                    let source = summaries.entry(flow_node.id.clone()).or_default();
                    source.cancelled_tokens = *affected_token_count;
                    source.visible_cancelled_tokens = *visible_affected_token_count;
                }
                let created = if topology.is_multi_instance(&flow_node.id) {
                    1
                } else {
                    *affected_token_count
                };
                summaries
                    .entry(target_flow_node.id.clone())
                    .or_default()
                    .new_tokens += created;
            }
        }
    }

    summaries
}

/// Whether a cancellation is staged against this node, directly or through a
/// cascade. The explicit record only exists on the sub-process node, while
/// cascade-derived cancellations only set the descendant's count, so both
/// sides of the check are needed.
pub fn is_cancel_modification_applied_on_flow_node(
    ledger: &ModificationLedger,
    topology: &dyn TopologyProvider,
    statistics: &dyn StatisticsProvider,
    flow_node_id: &str,
) -> bool {
    let cascaded = modifications_by_flow_node(ledger, topology, statistics)
        .get(flow_node_id)
        .map(|summary| summary.cancelled_tokens > 0)
        .unwrap_or(false);

    cascaded
        || ledger.modifications().iter().any(|modification| {
            matches!(
                modification,
                Modification::Token(TokenModification::CancelToken { flow_node, .. })
                    if flow_node.id == flow_node_id
            )
        })
}

/// The observable variable records: one per `(scope_id, id)` key, the
/// last-appended record winning, in first-occurrence order. Every read of
/// variable state goes through this, never the raw ledger.
pub fn variable_modifications(ledger: &ModificationLedger) -> Vec<&VariableModification> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut latest: HashMap<(&str, &str), &VariableModification> = HashMap::new();

    for modification in ledger.modifications() {
        let Modification::Variable(variable) = modification else {
            continue;
        };
        let key = (variable.scope_id.as_str(), variable.id.as_str());
        if !latest.contains_key(&key) {
            order.push(key);
        }
        latest.insert(key, variable);
    }

    order.into_iter().map(|key| latest[&key]).collect()
}

/// Observable edits for one scope as `{name: parsed value}`.
///
/// Returns `None` when the scope has no staged edits at all, so callers can
/// tell "no edits" apart from "edited to an empty value".
pub fn variable_modifications_per_scope(
    ledger: &ModificationLedger,
    scope_id: &str,
) -> Option<BTreeMap<String, Value>> {
    let edits: BTreeMap<String, Value> = variable_modifications(ledger)
        .into_iter()
        .filter(|variable| variable.scope_id == scope_id)
        .map(|variable| {
            (
                variable.name.clone(),
                parse_variable_value(&variable.new_value),
            )
        })
        .collect();

    if edits.is_empty() {
        None
    } else {
        Some(edits)
    }
}

/// Parse the raw JSON text of a variable value. Text that is not valid JSON
/// degrades to a JSON string of the raw text rather than failing.
pub fn parse_variable_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
