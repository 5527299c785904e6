//! Collaborator seams consumed by the engine.
//!
//! The diagram, statistics, and id-generation collaborators are read-only and
//! synchronous (their data is fetched and cached elsewhere); submission is
//! async. All four are injected into the engine as trait objects so the
//! engine is testable without a live backend or UI tree.

use crate::types::{FlowNodeId, ModificationOperation, ScopeId};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Read-only view of the process diagram, consulted during scope resolution
/// and per-flow-node aggregation.
///
/// Unknown flow-node ids must degrade to empty answers, never fail: the UI
/// queries transient states while diagram data is still loading.
pub trait TopologyProvider: Send + Sync {
    /// Ancestor flow nodes of `flow_node_id`, innermost to outermost,
    /// excluding the process root.
    fn flow_node_parents(&self, flow_node_id: &str) -> Vec<FlowNodeId>;

    /// Whether the node collapses concurrent tokens under one logical scope.
    fn is_multi_instance(&self, flow_node_id: &str) -> bool;

    /// Descendant flow-node ids of a sub-process, for cascade cancellation.
    fn flow_element_ids(&self, flow_node_id: &str) -> Vec<FlowNodeId>;

    /// Display name, when the diagram knows one. Callers fall back to the id.
    fn flow_node_name(&self, _flow_node_id: &str) -> Option<String> {
        None
    }
}

/// Live token counts per flow node: the unfiltered total and the count
/// visible under the currently applied instance filter.
pub trait StatisticsProvider: Send + Sync {
    fn total_running_instances(&self, flow_node_id: &str) -> u32;
    fn total_running_instances_visible(&self, flow_node_id: &str) -> u32;
}

/// Mints process-unique scope identifiers for branches that do not exist yet.
pub trait ScopeIdProvider: Send + Sync {
    fn generate(&self) -> ScopeId;
}

/// Submits a compiled payload to the executing backend as one atomic request.
#[async_trait]
pub trait ModificationSubmitter: Send + Sync {
    async fn submit(
        &self,
        process_instance_id: &str,
        operations: &[ModificationOperation],
    ) -> Result<()>;
}

// ─── In-memory implementations ────────────────────────────────

/// Diagram topology held as plain maps.
///
/// Suitable for embedders that already parsed the diagram, and for tests.
#[derive(Clone, Debug, Default)]
pub struct StaticTopology {
    parents: HashMap<FlowNodeId, Vec<FlowNodeId>>,
    children: HashMap<FlowNodeId, Vec<FlowNodeId>>,
    multi_instance: HashSet<FlowNodeId>,
    names: HashMap<FlowNodeId, String>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the ancestor chain of a node, innermost first.
    pub fn with_parents(
        mut self,
        flow_node_id: impl Into<String>,
        parents: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.parents.insert(
            flow_node_id.into(),
            parents.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Register the descendant flow nodes of a sub-process.
    pub fn with_children(
        mut self,
        flow_node_id: impl Into<String>,
        children: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.children.insert(
            flow_node_id.into(),
            children.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_multi_instance(mut self, flow_node_id: impl Into<String>) -> Self {
        self.multi_instance.insert(flow_node_id.into());
        self
    }

    pub fn with_name(
        mut self,
        flow_node_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.names.insert(flow_node_id.into(), name.into());
        self
    }
}

impl TopologyProvider for StaticTopology {
    fn flow_node_parents(&self, flow_node_id: &str) -> Vec<FlowNodeId> {
        self.parents.get(flow_node_id).cloned().unwrap_or_default()
    }

    fn is_multi_instance(&self, flow_node_id: &str) -> bool {
        self.multi_instance.contains(flow_node_id)
    }

    fn flow_element_ids(&self, flow_node_id: &str) -> Vec<FlowNodeId> {
        self.children.get(flow_node_id).cloned().unwrap_or_default()
    }

    fn flow_node_name(&self, flow_node_id: &str) -> Option<String> {
        self.names.get(flow_node_id).cloned()
    }
}

/// Per-node token counts held as plain maps. Absent nodes count zero.
#[derive(Clone, Debug, Default)]
pub struct StaticStatistics {
    counts: HashMap<FlowNodeId, (u32, u32)>,
}

impl StaticStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(
        mut self,
        flow_node_id: impl Into<String>,
        total: u32,
        visible: u32,
    ) -> Self {
        self.counts.insert(flow_node_id.into(), (total, visible));
        self
    }
}

impl StatisticsProvider for StaticStatistics {
    fn total_running_instances(&self, flow_node_id: &str) -> u32 {
        self.counts.get(flow_node_id).map(|c| c.0).unwrap_or(0)
    }

    fn total_running_instances_visible(&self, flow_node_id: &str) -> u32 {
        self.counts.get(flow_node_id).map(|c| c.1).unwrap_or(0)
    }
}

/// UUID-backed scope ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidScopeIds;

impl ScopeIdProvider for UuidScopeIds {
    fn generate(&self) -> ScopeId {
        Uuid::now_v7().to_string()
    }
}

/// Deterministic `scope-1`, `scope-2`, ... ids for tests and replayable
/// sessions.
#[derive(Debug, Default)]
pub struct SequentialScopeIds {
    next: AtomicU64,
}

impl SequentialScopeIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScopeIdProvider for SequentialScopeIds {
    fn generate(&self) -> ScopeId {
        format!("scope-{}", self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_flow_nodes_degrade_to_empty_answers() {
        let topology = StaticTopology::new();
        assert!(topology.flow_node_parents("ghost").is_empty());
        assert!(topology.flow_element_ids("ghost").is_empty());
        assert!(!topology.is_multi_instance("ghost"));
        assert_eq!(topology.flow_node_name("ghost"), None);

        let statistics = StaticStatistics::new();
        assert_eq!(statistics.total_running_instances("ghost"), 0);
        assert_eq!(statistics.total_running_instances_visible("ghost"), 0);
    }

    #[test]
    fn sequential_ids_are_distinct_and_ordered() {
        let ids = SequentialScopeIds::new();
        assert_eq!(ids.generate(), "scope-1");
        assert_eq!(ids.generate(), "scope-2");
    }

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidScopeIds;
        assert_ne!(ids.generate(), ids.generate());
    }
}
