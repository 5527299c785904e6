//! The modification ledger: an ordered list of staged records plus the
//! modification-mode status flag. This is the engine's sole mutable state;
//! every view in [`crate::views`] is recomputed from it on demand.

use crate::types::{
    FlowNodeId, LastRemoved, Modification, ModificationStatus, RemovalSource, TokenModification,
    VariableOperation,
};
use crate::views;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered ledger of staged modifications.
///
/// Mutation happens only through this API. Removals that match nothing are
/// no-ops; the ledger performs no semantic validation of its callers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModificationLedger {
    status: ModificationStatus,
    modifications: Vec<Modification>,
    source_flow_node_for_move: Option<FlowNodeId>,
    last_removed: Option<LastRemoved>,
}

impl ModificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ──

    pub fn status(&self) -> ModificationStatus {
        self.status
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn has_pending_modifications(&self) -> bool {
        !self.modifications.is_empty()
    }

    /// Source node remembered while a token move is in flight.
    pub fn source_flow_node_for_move(&self) -> Option<&str> {
        self.source_flow_node_for_move.as_deref()
    }

    pub fn last_removed_modification(&self) -> Option<&LastRemoved> {
        self.last_removed.as_ref()
    }

    // ── Mode lifecycle ──

    /// Enter modification mode.
    pub fn enable(&mut self) {
        self.status = ModificationStatus::Enabled;
    }

    /// Leave modification mode, discarding every staged record.
    pub fn disable(&mut self) {
        self.reset();
    }

    /// Discard the entire state, back to empty and `Disabled`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ── Record mutation ──

    /// Append a record to the end. No de-duplication at this layer.
    pub fn append(&mut self, modification: Modification) {
        debug!(total = self.modifications.len() + 1, "staged modification");
        self.modifications.push(modification);
    }

    /// Pop the most recent record, remembering it as removed via the footer.
    pub fn remove_last(&mut self) -> Option<Modification> {
        let modification = self.modifications.pop()?;
        self.last_removed = Some(LastRemoved {
            modification: modification.clone(),
            source: RemovalSource::Footer,
        });
        Some(modification)
    }

    /// Remove staged token records matching `target`.
    ///
    /// `AddToken` records match by flow node and scope id; `CancelToken` and
    /// `MoveToken` match by flow node alone, since only one such record per
    /// node is meaningful at a time.
    pub fn remove_token_modification(&mut self, target: &TokenModification) {
        self.modifications.retain(|modification| {
            let Modification::Token(token) = modification else {
                return true;
            };
            !token_matches(token, target)
        });
    }

    /// Remove a staged variable record by `(scope_id, id, kind)`.
    ///
    /// Two steps, order-sensitive: the observable record for `(scope_id, id)`
    /// (the last-appended one) must carry the requested operation, otherwise
    /// nothing happens; the record actually removed is the one at the first
    /// ledger index matching the full key.
    pub fn remove_variable_modification(
        &mut self,
        scope_id: &str,
        id: &str,
        kind: VariableOperation,
        source: RemovalSource,
    ) {
        let observable_matches = views::variable_modifications(self)
            .into_iter()
            .any(|v| v.scope_id == scope_id && v.id == id && v.operation == kind);
        if !observable_matches {
            return;
        }

        let Some(index) = self.modifications.iter().position(|modification| {
            matches!(
                modification,
                Modification::Variable(v)
                    if v.scope_id == scope_id && v.id == id && v.operation == kind
            )
        }) else {
            return;
        };

        let removed = self.modifications.remove(index);
        self.last_removed = Some(LastRemoved {
            modification: removed,
            source,
        });
    }

    // ── Move-protocol hooks (driven by the engine) ──

    pub(crate) fn begin_move(&mut self, source_flow_node_id: FlowNodeId) {
        self.status = ModificationStatus::MovingToken;
        self.source_flow_node_for_move = Some(source_flow_node_id);
    }

    pub(crate) fn end_move(&mut self) -> Option<FlowNodeId> {
        self.status = ModificationStatus::Enabled;
        self.source_flow_node_for_move.take()
    }

    pub(crate) fn set_status(&mut self, status: ModificationStatus) {
        self.status = status;
    }
}

fn token_matches(candidate: &TokenModification, target: &TokenModification) -> bool {
    match (candidate, target) {
        (
            TokenModification::AddToken {
                flow_node,
                scope_id,
                ..
            },
            TokenModification::AddToken {
                flow_node: target_node,
                scope_id: target_scope,
                ..
            },
        ) => flow_node.id == target_node.id && scope_id == target_scope,
        (
            TokenModification::CancelToken { flow_node, .. },
            TokenModification::CancelToken {
                flow_node: target_node,
                ..
            },
        )
        | (
            TokenModification::MoveToken { flow_node, .. },
            TokenModification::MoveToken {
                flow_node: target_node,
                ..
            },
        ) => flow_node.id == target_node.id,
        _ => false,
    }
}
