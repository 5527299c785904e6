//! Client-side staging and compilation of process-instance modifications.
//!
//! An operator plans structural edits to a *running* workflow instance (add
//! a token at a flow node, cancel tokens, move tokens, edit variables inside
//! an execution scope) entirely client-side. The engine keeps those edits in
//! an ordered ledger, derives live per-flow-node token deltas for the
//! diagram, mints scope ids for branches that will only exist once the plan
//! runs, and compiles the ledger into the single ordered payload the backend
//! executes atomically.
//!
//! - [`types`]: staged-modification records and the wire operations
//! - [`providers`]: collaborator traits (diagram, statistics, ids, submit)
//! - [`ledger`]: the ordered ledger, the engine's sole mutable state
//! - [`views`]: pure derivations recomputed from the ledger on demand
//! - [`scopes`]: parent-scope resolution for not-yet-existing branches
//! - [`payload`]: compilation into the backend operation list
//! - [`engine`]: the facade UI layers talk to

pub mod engine;
pub mod ledger;
pub mod payload;
pub mod providers;
pub mod scopes;
pub mod types;
pub mod views;

pub use engine::ModificationEngine;
pub use ledger::ModificationLedger;
pub use providers::{
    ModificationSubmitter, ScopeIdProvider, SequentialScopeIds, StaticStatistics, StaticTopology,
    StatisticsProvider, TopologyProvider, UuidScopeIds,
};
pub use types::{
    FlowNodeId, FlowNodeRef, LastRemoved, Modification, ModificationOperation,
    ModificationStatus, RemovalSource, ScopeId, TokenModification, VariableModification,
    VariableOperation, VariablesByFlowNode,
};
pub use views::FlowNodeModificationSummary;
