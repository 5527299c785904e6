use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Scalar aliases ───────────────────────────────────────────

/// Flow-node identifier from the process diagram.
pub type FlowNodeId = String;

/// Process-unique scope identifier. Either an existing element-instance key
/// known to the backend or an id freshly minted for a branch that will only
/// exist once the payload is applied.
pub type ScopeId = String;

// ─── Flow node reference ──────────────────────────────────────

/// Minimal reference to a diagram flow node, kept on every staged record so
/// summaries can be rendered without consulting the diagram again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNodeRef {
    pub id: FlowNodeId,
    pub name: String,
}

impl FlowNodeRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ─── Staged modifications ─────────────────────────────────────

/// A structural token edit staged against a running instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TokenModification {
    /// Create a new token at a flow node, inside freshly minted ancestor
    /// scopes where the target branch does not exist yet.
    AddToken {
        scope_id: ScopeId,
        flow_node: FlowNodeRef,
        affected_token_count: u32,
        visible_affected_token_count: u32,
        /// Ancestor flow node to the scope id minted for it. Ancestors whose
        /// scope already exists (staged earlier, or exactly one live
        /// instance) never appear here.
        parent_scope_ids: BTreeMap<FlowNodeId, ScopeId>,
    },
    /// Cancel every token at a flow node. For sub-processes the cancellation
    /// cascades onto all descendant flow nodes even though only this record
    /// is stored.
    CancelToken {
        flow_node: FlowNodeRef,
        affected_token_count: u32,
        visible_affected_token_count: u32,
    },
    /// Cancel at the source and recreate at the target, recorded as one
    /// atomic record so cancellation and creation bookkeeping stay in step.
    MoveToken {
        flow_node: FlowNodeRef,
        target_flow_node: FlowNodeRef,
        affected_token_count: u32,
        visible_affected_token_count: u32,
        /// One freshly minted scope per new token at the target. Collapsed
        /// to a single entry when the source is multi-instance.
        scope_ids: Vec<ScopeId>,
        parent_scope_ids: BTreeMap<FlowNodeId, ScopeId>,
    },
}

impl TokenModification {
    /// The flow node the record is keyed on (the source node for moves).
    pub fn flow_node(&self) -> &FlowNodeRef {
        match self {
            TokenModification::AddToken { flow_node, .. }
            | TokenModification::CancelToken { flow_node, .. }
            | TokenModification::MoveToken { flow_node, .. } => flow_node,
        }
    }

    pub fn affected_token_count(&self) -> u32 {
        match self {
            TokenModification::AddToken {
                affected_token_count,
                ..
            }
            | TokenModification::CancelToken {
                affected_token_count,
                ..
            }
            | TokenModification::MoveToken {
                affected_token_count,
                ..
            } => *affected_token_count,
        }
    }
}

/// Which variable operation a record stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableOperation {
    AddVariable,
    EditVariable,
}

/// A staged add or edit of a variable inside one execution scope.
///
/// `(scope_id, id)` identifies the record; appending another record with the
/// same key shadows the earlier one (last write wins).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableModification {
    pub operation: VariableOperation,
    /// Client-side identifier of the edit row.
    pub id: String,
    pub scope_id: ScopeId,
    /// Display name of the flow node owning the scope.
    pub flow_node_name: String,
    pub name: String,
    /// Raw JSON text of the previous value, when the variable existed.
    pub old_value: Option<String>,
    /// Raw JSON text of the new value. Parsed only at read/compile time.
    pub new_value: String,
}

/// One ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Modification {
    Token(TokenModification),
    Variable(VariableModification),
}

// ─── Ledger status ────────────────────────────────────────────

/// Modification-mode state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationStatus {
    #[default]
    Disabled,
    Enabled,
    MovingToken,
    ApplyingModifications,
}

/// Where a removal was requested from. Echoed back to the caller so the
/// originating surface can offer an undo affordance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalSource {
    Footer,
    Variables,
    SummaryModal,
}

/// The most recently removed record, tagged with its removal source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastRemoved {
    pub modification: Modification,
    pub source: RemovalSource,
}

// ─── Wire operations ──────────────────────────────────────────

/// Variable sets grouped by the flow node whose new scope receives them.
/// One set per new token instance under that node.
pub type VariablesByFlowNode = BTreeMap<FlowNodeId, Vec<BTreeMap<String, serde_json::Value>>>;

/// One backend operation in the compiled payload. Serialized order is the
/// order the backend executes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modification")]
pub enum ModificationOperation {
    #[serde(rename = "ADD_TOKEN", rename_all = "camelCase")]
    AddToken {
        to_flow_node_id: FlowNodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        variables: Option<VariablesByFlowNode>,
    },
    #[serde(rename = "CANCEL_TOKEN", rename_all = "camelCase")]
    CancelToken { from_flow_node_id: FlowNodeId },
    #[serde(rename = "MOVE_TOKEN", rename_all = "camelCase")]
    MoveToken {
        from_flow_node_id: FlowNodeId,
        to_flow_node_id: FlowNodeId,
        new_tokens_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        variables: Option<VariablesByFlowNode>,
    },
    #[serde(rename = "ADD_VARIABLE", rename_all = "camelCase")]
    AddVariable {
        scope_key: ScopeId,
        variables: BTreeMap<String, serde_json::Value>,
    },
    #[serde(rename = "EDIT_VARIABLE", rename_all = "camelCase")]
    EditVariable {
        scope_key: ScopeId,
        variables: BTreeMap<String, serde_json::Value>,
    },
}
