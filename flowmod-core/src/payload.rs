//! Compilation of the ledger into the ordered backend payload.
//!
//! Token operations come out first, in ledger order. A variable edit whose
//! scope is created by one of those operations cannot stand alone (the scope
//! does not exist until the operation runs), so it rides along inside the
//! creating operation's `variables`; everything else becomes a standalone
//! variable operation at the end.

use crate::ledger::ModificationLedger;
use crate::types::{
    Modification, ModificationOperation, ScopeId, TokenModification, VariableModification,
    VariableOperation, VariablesByFlowNode,
};
use crate::views::{parse_variable_value, variable_modifications};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Compile the ledger into the list of operations submitted to the backend.
pub fn compile(ledger: &ModificationLedger) -> Vec<ModificationOperation> {
    let resolved_variables = variable_modifications(ledger);
    let mut operations = Vec::new();
    let mut covered_scope_ids: HashSet<ScopeId> = HashSet::new();

    for modification in ledger.modifications() {
        let Modification::Token(token) = modification else {
            continue;
        };
        match token {
            TokenModification::AddToken {
                scope_id,
                flow_node,
                parent_scope_ids,
                ..
            } => {
                let mut variables = VariablesByFlowNode::new();
                attach_scope_variables(&resolved_variables, scope_id, &flow_node.id, &mut variables);
                for (ancestor_flow_node_id, ancestor_scope_id) in parent_scope_ids {
                    attach_scope_variables(
                        &resolved_variables,
                        ancestor_scope_id,
                        ancestor_flow_node_id,
                        &mut variables,
                    );
                }

                covered_scope_ids.insert(scope_id.clone());
                covered_scope_ids.extend(parent_scope_ids.values().cloned());

                operations.push(ModificationOperation::AddToken {
                    to_flow_node_id: flow_node.id.clone(),
                    variables: non_empty(variables),
                });
            }

            TokenModification::CancelToken { flow_node, .. } => {
                operations.push(ModificationOperation::CancelToken {
                    from_flow_node_id: flow_node.id.clone(),
                });
            }

            TokenModification::MoveToken {
                flow_node,
                target_flow_node,
                scope_ids,
                parent_scope_ids,
                ..
            } => {
                let mut variables = VariablesByFlowNode::new();
                // One variable set per new target scope; scopes without
                // staged edits contribute nothing.
                for scope_id in scope_ids {
                    attach_scope_variables(
                        &resolved_variables,
                        scope_id,
                        &target_flow_node.id,
                        &mut variables,
                    );
                }
                for (ancestor_flow_node_id, ancestor_scope_id) in parent_scope_ids {
                    attach_scope_variables(
                        &resolved_variables,
                        ancestor_scope_id,
                        ancestor_flow_node_id,
                        &mut variables,
                    );
                }

                covered_scope_ids.extend(scope_ids.iter().cloned());
                covered_scope_ids.extend(parent_scope_ids.values().cloned());

                operations.push(ModificationOperation::MoveToken {
                    from_flow_node_id: flow_node.id.clone(),
                    to_flow_node_id: target_flow_node.id.clone(),
                    new_tokens_count: scope_ids.len() as u32,
                    variables: non_empty(variables),
                });
            }
        }
    }

    // Standalone pass: edits whose scope already exists on the backend.
    for variable in resolved_variables {
        if covered_scope_ids.contains(&variable.scope_id) {
            continue;
        }
        let variables = BTreeMap::from([(
            variable.name.clone(),
            parse_variable_value(&variable.new_value),
        )]);
        operations.push(match variable.operation {
            VariableOperation::AddVariable => ModificationOperation::AddVariable {
                scope_key: variable.scope_id.clone(),
                variables,
            },
            VariableOperation::EditVariable => ModificationOperation::EditVariable {
                scope_key: variable.scope_id.clone(),
                variables,
            },
        });
    }

    operations
}

/// Collect the observable edits for `scope_id` into one variable set under
/// `flow_node_id`, when there are any.
fn attach_scope_variables(
    resolved: &[&VariableModification],
    scope_id: &str,
    flow_node_id: &str,
    out: &mut VariablesByFlowNode,
) {
    let set: BTreeMap<String, Value> = resolved
        .iter()
        .filter(|variable| variable.scope_id == scope_id)
        .map(|variable| {
            (
                variable.name.clone(),
                parse_variable_value(&variable.new_value),
            )
        })
        .collect();

    if !set.is_empty() {
        out.entry(flow_node_id.to_string()).or_default().push(set);
    }
}

fn non_empty(variables: VariablesByFlowNode) -> Option<VariablesByFlowNode> {
    if variables.is_empty() {
        None
    } else {
        Some(variables)
    }
}
