//! The staging engine facade.
//!
//! Owns the ledger, consults the injected read-only providers, drives the
//! token-move state machine, and submits the compiled payload. UI layers talk
//! to this type only; the ledger is never mutated from outside.

use crate::ledger::ModificationLedger;
use crate::payload;
use crate::providers::{
    ModificationSubmitter, ScopeIdProvider, StatisticsProvider, TopologyProvider,
};
use crate::scopes;
use crate::types::{
    FlowNodeId, FlowNodeRef, LastRemoved, Modification, ModificationOperation,
    ModificationStatus, RemovalSource, ScopeId, TokenModification, VariableModification,
    VariableOperation,
};
use crate::views::{self, FlowNodeModificationSummary};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct ModificationEngine {
    topology: Arc<dyn TopologyProvider>,
    statistics: Arc<dyn StatisticsProvider>,
    scope_ids: Arc<dyn ScopeIdProvider>,
    submitter: Arc<dyn ModificationSubmitter>,
    ledger: ModificationLedger,
}

impl ModificationEngine {
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        statistics: Arc<dyn StatisticsProvider>,
        scope_ids: Arc<dyn ScopeIdProvider>,
        submitter: Arc<dyn ModificationSubmitter>,
    ) -> Self {
        Self {
            topology,
            statistics,
            scope_ids,
            submitter,
            ledger: ModificationLedger::new(),
        }
    }

    // ── Mode & accessors ──

    /// Enter modification mode.
    pub fn enable(&mut self) {
        self.ledger.enable();
    }

    /// Leave modification mode, discarding every staged record.
    pub fn disable(&mut self) {
        self.ledger.disable();
    }

    pub fn status(&self) -> ModificationStatus {
        self.ledger.status()
    }

    pub fn modifications(&self) -> &[Modification] {
        self.ledger.modifications()
    }

    pub fn has_pending_modifications(&self) -> bool {
        self.ledger.has_pending_modifications()
    }

    pub fn source_flow_node_for_move(&self) -> Option<&str> {
        self.ledger.source_flow_node_for_move()
    }

    pub fn last_removed_modification(&self) -> Option<&LastRemoved> {
        self.ledger.last_removed_modification()
    }

    // ── Ledger mutation ──

    pub fn append(&mut self, modification: Modification) {
        self.ledger.append(modification);
    }

    pub fn remove_last(&mut self) -> Option<Modification> {
        self.ledger.remove_last()
    }

    pub fn remove_token_modification(&mut self, target: &TokenModification) {
        self.ledger.remove_token_modification(target);
    }

    pub fn remove_variable_modification(
        &mut self,
        scope_id: &str,
        id: &str,
        kind: VariableOperation,
        source: RemovalSource,
    ) {
        self.ledger
            .remove_variable_modification(scope_id, id, kind, source);
    }

    // ── Staging helpers ──

    /// Stage a new token at `flow_node_id`, minting its scope and whatever
    /// ancestor scopes the branch still needs. Returns the new token's scope
    /// id so variable edits can be staged against it right away.
    pub fn stage_add_token(&mut self, flow_node_id: &str) -> ScopeId {
        let scope_id = self.scope_ids.generate();
        let parent_scope_ids = self.resolve_parent_scope_ids(flow_node_id);
        let flow_node = self.flow_node_ref(flow_node_id);
        self.ledger
            .append(Modification::Token(TokenModification::AddToken {
                scope_id: scope_id.clone(),
                flow_node,
                affected_token_count: 1,
                visible_affected_token_count: 1,
                parent_scope_ids,
            }));
        scope_id
    }

    /// Stage a cancellation of every token at `flow_node_id`, with counts
    /// taken from the live statistics. Staging a second cancellation for the
    /// same node is ignored.
    pub fn stage_cancel_token(&mut self, flow_node_id: &str) {
        if self.is_cancel_modification_applied_on_flow_node(flow_node_id) {
            warn!(flow_node = flow_node_id, "cancellation already staged");
            return;
        }
        let flow_node = self.flow_node_ref(flow_node_id);
        self.ledger
            .append(Modification::Token(TokenModification::CancelToken {
                flow_node,
                affected_token_count: self.statistics.total_running_instances(flow_node_id),
                visible_affected_token_count: self
                    .statistics
                    .total_running_instances_visible(flow_node_id),
            }));
    }

    // ── Token move protocol ──

    /// Begin moving the tokens at `source_flow_node_id`. Only valid while
    /// the engine is enabled and no other move is in flight.
    pub fn start_move(&mut self, source_flow_node_id: &str) {
        if self.ledger.status() != ModificationStatus::Enabled {
            warn!(
                status = ?self.ledger.status(),
                "ignoring start_move outside enabled mode"
            );
            return;
        }
        self.ledger.begin_move(source_flow_node_id.to_string());
    }

    /// Complete or abandon the move in flight.
    ///
    /// With a target, this stages one `MoveToken` record: the source's live
    /// tokens are cancelled and recreated at the target, one fresh scope per
    /// token unless the source is multi-instance (then a single collapsed
    /// scope). Without a target the move is abandoned and nothing is staged.
    pub fn finish_move(&mut self, target_flow_node_id: Option<&str>) {
        if self.ledger.status() != ModificationStatus::MovingToken {
            warn!(
                status = ?self.ledger.status(),
                "ignoring finish_move without a move in flight"
            );
            return;
        }
        let source = self.ledger.end_move();
        let (Some(source_id), Some(target_id)) = (source, target_flow_node_id) else {
            return;
        };

        let affected_token_count = self.statistics.total_running_instances(&source_id);
        let visible_affected_token_count =
            self.statistics.total_running_instances_visible(&source_id);
        let new_scope_count = if self.topology.is_multi_instance(&source_id) {
            1
        } else {
            affected_token_count
        };
        let scope_ids = (0..new_scope_count)
            .map(|_| self.scope_ids.generate())
            .collect();
        let parent_scope_ids = self.resolve_parent_scope_ids(target_id);

        let flow_node = self.flow_node_ref(&source_id);
        let target_flow_node = self.flow_node_ref(target_id);
        self.ledger
            .append(Modification::Token(TokenModification::MoveToken {
                flow_node,
                target_flow_node,
                affected_token_count,
                visible_affected_token_count,
                scope_ids,
                parent_scope_ids,
            }));
    }

    // ── Derivations ──

    pub fn modifications_by_flow_node(
        &self,
    ) -> BTreeMap<FlowNodeId, FlowNodeModificationSummary> {
        views::modifications_by_flow_node(
            &self.ledger,
            self.topology.as_ref(),
            self.statistics.as_ref(),
        )
    }

    pub fn is_cancel_modification_applied_on_flow_node(&self, flow_node_id: &str) -> bool {
        views::is_cancel_modification_applied_on_flow_node(
            &self.ledger,
            self.topology.as_ref(),
            self.statistics.as_ref(),
            flow_node_id,
        )
    }

    pub fn variable_modifications(&self) -> Vec<&VariableModification> {
        views::variable_modifications(&self.ledger)
    }

    pub fn variable_modifications_per_scope(
        &self,
        scope_id: &str,
    ) -> Option<BTreeMap<String, Value>> {
        views::variable_modifications_per_scope(&self.ledger, scope_id)
    }

    pub fn resolve_parent_scope_ids(
        &self,
        target_flow_node_id: &str,
    ) -> BTreeMap<FlowNodeId, ScopeId> {
        scopes::resolve_parent_scope_ids(
            &self.ledger,
            self.topology.as_ref(),
            self.statistics.as_ref(),
            self.scope_ids.as_ref(),
            target_flow_node_id,
        )
    }

    pub fn compile(&self) -> Vec<ModificationOperation> {
        payload::compile(&self.ledger)
    }

    // ── Apply ──

    /// Compile and submit the staged plan as one atomic request.
    ///
    /// The ledger is reset to empty and `Disabled` whatever the outcome; a
    /// failed submission discards the staged plan just like a successful one.
    pub async fn apply(&mut self, process_instance_id: &str) -> Result<()> {
        self.ledger
            .set_status(ModificationStatus::ApplyingModifications);
        let operations = payload::compile(&self.ledger);
        debug!(
            process_instance_id,
            operations = operations.len(),
            "submitting staged modifications"
        );

        let result = self
            .submitter
            .submit(process_instance_id, &operations)
            .await;
        if let Err(e) = &result {
            error!(process_instance_id, error = %e, "modification submission failed");
        }

        self.ledger.reset();
        result
    }

    fn flow_node_ref(&self, flow_node_id: &str) -> FlowNodeRef {
        let name = self
            .topology
            .flow_node_name(flow_node_id)
            .unwrap_or_else(|| flow_node_id.to_string());
        FlowNodeRef::new(flow_node_id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{SequentialScopeIds, StaticStatistics, StaticTopology};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSubmitter {
        calls: Mutex<Vec<(String, Vec<ModificationOperation>)>>,
        fail: bool,
    }

    impl RecordingSubmitter {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ModificationSubmitter for RecordingSubmitter {
        async fn submit(
            &self,
            process_instance_id: &str,
            operations: &[ModificationOperation],
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((process_instance_id.to_string(), operations.to_vec()));
            if self.fail {
                return Err(anyhow!("modify endpoint returned 500"));
            }
            Ok(())
        }
    }

    fn make_engine(
        topology: StaticTopology,
        statistics: StaticStatistics,
        submitter: Arc<RecordingSubmitter>,
    ) -> ModificationEngine {
        ModificationEngine::new(
            Arc::new(topology),
            Arc::new(statistics),
            Arc::new(SequentialScopeIds::new()),
            submitter,
        )
    }

    #[test]
    fn stage_add_token_resolves_ancestor_scopes() {
        let topology = StaticTopology::new()
            .with_parents("task", ["subprocess_a", "subprocess_b"])
            .with_name("task", "Check payment");
        let statistics = StaticStatistics::new().with_count("subprocess_b", 1, 1);
        let mut engine = make_engine(topology, statistics, Arc::default());
        engine.enable();

        let scope_id = engine.stage_add_token("task");
        assert_eq!(engine.modifications().len(), 1);
        match &engine.modifications()[0] {
            Modification::Token(TokenModification::AddToken {
                scope_id: recorded,
                flow_node,
                parent_scope_ids,
                ..
            }) => {
                assert_eq!(recorded, &scope_id);
                assert_eq!(flow_node.name, "Check payment");
                // subprocess_b has exactly one live instance and is reused.
                assert!(parent_scope_ids.contains_key("subprocess_a"));
                assert!(!parent_scope_ids.contains_key("subprocess_b"));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn stage_cancel_token_takes_counts_from_statistics_and_dedupes() {
        let statistics = StaticStatistics::new().with_count("task", 4, 2);
        let mut engine = make_engine(StaticTopology::new(), statistics, Arc::default());
        engine.enable();

        engine.stage_cancel_token("task");
        engine.stage_cancel_token("task");
        assert_eq!(engine.modifications().len(), 1);
        match &engine.modifications()[0] {
            Modification::Token(TokenModification::CancelToken {
                affected_token_count,
                visible_affected_token_count,
                ..
            }) => {
                assert_eq!(*affected_token_count, 4);
                assert_eq!(*visible_affected_token_count, 2);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn abandoned_move_stages_nothing() {
        let mut engine =
            make_engine(StaticTopology::new(), StaticStatistics::new(), Arc::default());
        engine.enable();

        engine.start_move("task_a");
        assert_eq!(engine.status(), ModificationStatus::MovingToken);
        assert_eq!(engine.source_flow_node_for_move(), Some("task_a"));

        engine.finish_move(None);
        assert_eq!(engine.status(), ModificationStatus::Enabled);
        assert_eq!(engine.source_flow_node_for_move(), None);
        assert!(engine.modifications().is_empty());
    }

    #[test]
    fn completed_move_mints_one_scope_per_token() {
        let statistics = StaticStatistics::new().with_count("task_a", 2, 2);
        let mut engine = make_engine(StaticTopology::new(), statistics, Arc::default());
        engine.enable();

        engine.start_move("task_a");
        engine.finish_move(Some("task_b"));

        assert_eq!(engine.status(), ModificationStatus::Enabled);
        match &engine.modifications()[0] {
            Modification::Token(TokenModification::MoveToken {
                affected_token_count,
                scope_ids,
                ..
            }) => {
                assert_eq!(*affected_token_count, 2);
                assert_eq!(scope_ids.len(), 2);
                assert_ne!(scope_ids[0], scope_ids[1]);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn move_from_multi_instance_source_collapses_scopes() {
        let topology = StaticTopology::new().with_multi_instance("task_a");
        let statistics = StaticStatistics::new().with_count("task_a", 5, 5);
        let mut engine = make_engine(topology, statistics, Arc::default());
        engine.enable();

        engine.start_move("task_a");
        engine.finish_move(Some("task_b"));

        match &engine.modifications()[0] {
            Modification::Token(TokenModification::MoveToken { scope_ids, .. }) => {
                assert_eq!(scope_ids.len(), 1);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn start_move_is_ignored_outside_enabled_mode() {
        let mut engine =
            make_engine(StaticTopology::new(), StaticStatistics::new(), Arc::default());

        engine.start_move("task_a");
        assert_eq!(engine.status(), ModificationStatus::Disabled);
        assert_eq!(engine.source_flow_node_for_move(), None);

        engine.enable();
        engine.finish_move(Some("task_b"));
        assert!(engine.modifications().is_empty());
    }

    #[tokio::test]
    async fn apply_submits_and_resets_on_success() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let statistics = StaticStatistics::new().with_count("task", 1, 1);
        let mut engine = make_engine(StaticTopology::new(), statistics, submitter.clone());
        engine.enable();
        engine.stage_cancel_token("task");

        engine.apply("2251799813685249").await.unwrap();

        assert_eq!(engine.status(), ModificationStatus::Disabled);
        assert!(engine.modifications().is_empty());

        let calls = submitter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "2251799813685249");
        assert_eq!(
            calls[0].1,
            vec![ModificationOperation::CancelToken {
                from_flow_node_id: "task".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn apply_resets_even_when_submission_fails() {
        let submitter = Arc::new(RecordingSubmitter::failing());
        let statistics = StaticStatistics::new().with_count("task", 1, 1);
        let mut engine = make_engine(StaticTopology::new(), statistics, submitter.clone());
        engine.enable();
        engine.stage_cancel_token("task");

        let result = engine.apply("2251799813685249").await;
        assert!(result.is_err());

        // The staged plan is discarded on failure as well.
        assert_eq!(engine.status(), ModificationStatus::Disabled);
        assert!(engine.modifications().is_empty());
    }

    #[tokio::test]
    async fn apply_variable_edit_rides_with_the_creating_operation() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut engine =
            make_engine(StaticTopology::new(), StaticStatistics::new(), submitter.clone());
        engine.enable();

        let scope_id = engine.stage_add_token("task_n");
        engine.append(Modification::Variable(VariableModification {
            operation: VariableOperation::EditVariable,
            id: "x".to_string(),
            scope_id,
            flow_node_name: "task_n".to_string(),
            name: "x".to_string(),
            old_value: None,
            new_value: "1".to_string(),
        }));

        engine.apply("pi-1").await.unwrap();

        let calls = submitter.calls.lock().unwrap();
        assert_eq!(calls[0].1.len(), 1, "no standalone EDIT_VARIABLE emitted");
        assert!(matches!(
            calls[0].1[0],
            ModificationOperation::AddToken { .. }
        ));
    }
}
