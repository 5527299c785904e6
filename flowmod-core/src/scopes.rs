//! Parent-scope resolution for token creation.
//!
//! A new token deep inside nested sub-processes may need execution scopes
//! that do not exist yet. The resolver mints ids only for those, reusing a
//! scope that an earlier staged record already created or that a single live
//! instance already provides. Fabricating an id where one exists would make
//! the backend duplicate the execution branch.

use crate::ledger::ModificationLedger;
use crate::providers::{ScopeIdProvider, StatisticsProvider, TopologyProvider};
use crate::types::{FlowNodeId, Modification, ScopeId, TokenModification};
use std::collections::BTreeMap;

/// Compute the ancestor scopes a new token at `target_flow_node_id` needs.
///
/// Ancestors are tested innermost to outermost. An ancestor is skipped when a
/// staged `AddToken`/`MoveToken` already owns a scope for it, or when exactly
/// one live instance of it is running (that instance is the only possible
/// scope). Only ancestors that needed a fresh id appear in the result.
pub fn resolve_parent_scope_ids(
    ledger: &ModificationLedger,
    topology: &dyn TopologyProvider,
    statistics: &dyn StatisticsProvider,
    scope_ids: &dyn ScopeIdProvider,
    target_flow_node_id: &str,
) -> BTreeMap<FlowNodeId, ScopeId> {
    let mut resolved = BTreeMap::new();

    for ancestor_id in topology.flow_node_parents(target_flow_node_id) {
        if has_staged_scope(ledger, &ancestor_id) {
            continue;
        }
        if statistics.total_running_instances(&ancestor_id) == 1 {
            continue;
        }
        resolved.insert(ancestor_id, scope_ids.generate());
    }

    resolved
}

fn has_staged_scope(ledger: &ModificationLedger, flow_node_id: &str) -> bool {
    ledger.modifications().iter().any(|modification| {
        match modification {
            Modification::Token(TokenModification::AddToken {
                parent_scope_ids, ..
            })
            | Modification::Token(TokenModification::MoveToken {
                parent_scope_ids, ..
            }) => parent_scope_ids.contains_key(flow_node_id),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{SequentialScopeIds, StaticStatistics, StaticTopology};
    use crate::types::FlowNodeRef;

    fn resolve(
        ledger: &ModificationLedger,
        topology: &StaticTopology,
        statistics: &StaticStatistics,
        target: &str,
    ) -> BTreeMap<FlowNodeId, ScopeId> {
        resolve_parent_scope_ids(ledger, topology, statistics, &SequentialScopeIds::new(), target)
    }

    #[test]
    fn mints_fresh_ids_for_every_unresolved_ancestor() {
        let topology =
            StaticTopology::new().with_parents("task", ["subprocess_a", "subprocess_b"]);
        let resolved = resolve(
            &ModificationLedger::new(),
            &topology,
            &StaticStatistics::new(),
            "task",
        );

        assert_eq!(resolved.len(), 2);
        assert_ne!(resolved["subprocess_a"], resolved["subprocess_b"]);
    }

    #[test]
    fn single_live_instance_is_reused() {
        let topology =
            StaticTopology::new().with_parents("task", ["subprocess_a", "subprocess_b"]);
        let statistics = StaticStatistics::new().with_count("subprocess_a", 1, 1);

        let resolved = resolve(&ModificationLedger::new(), &topology, &statistics, "task");
        assert!(!resolved.contains_key("subprocess_a"));
        assert!(resolved.contains_key("subprocess_b"));
    }

    #[test]
    fn several_live_instances_still_need_a_fresh_scope() {
        let topology = StaticTopology::new().with_parents("task", ["subprocess_a"]);
        let statistics = StaticStatistics::new().with_count("subprocess_a", 2, 2);

        let resolved = resolve(&ModificationLedger::new(), &topology, &statistics, "task");
        assert!(resolved.contains_key("subprocess_a"));
    }

    #[test]
    fn staged_scope_is_reused() {
        let topology = StaticTopology::new().with_parents("task", ["subprocess_a"]);

        let mut ledger = ModificationLedger::new();
        ledger.append(Modification::Token(TokenModification::AddToken {
            scope_id: "scope-earlier".to_string(),
            flow_node: FlowNodeRef::new("sibling_task", "Sibling"),
            affected_token_count: 1,
            visible_affected_token_count: 1,
            parent_scope_ids: BTreeMap::from([(
                "subprocess_a".to_string(),
                "scope-sub-a".to_string(),
            )]),
        }));

        let resolved = resolve(&ledger, &topology, &StaticStatistics::new(), "task");
        assert!(resolved.is_empty());
    }

    #[test]
    fn unknown_target_resolves_to_nothing() {
        let resolved = resolve(
            &ModificationLedger::new(),
            &StaticTopology::new(),
            &StaticStatistics::new(),
            "ghost",
        );
        assert!(resolved.is_empty());
    }
}
