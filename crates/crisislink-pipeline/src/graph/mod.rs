//! The fixed set of stages and the edges between them.
//!
//! Every stage has exactly one outgoing [`Edge`]. Static edges always lead to
//! the same place; conditional edges call a [`Router`] over the committed
//! state and must answer with one of their declared targets. A graph may
//! declare one suspend point: after that stage the engine persists the
//! session and hands control back to the caller instead of following the edge.
//!
//! Graphs are validated once in [`StageGraphBuilder::build`]; a built graph
//! cannot reference an unregistered stage.

pub mod edge;
pub mod stage;

use std::collections::HashMap;
use std::sync::Arc;

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::state::{Field, MergePolicy, MergeTable, SessionState, STANDARD_POLICIES};

pub use edge::{end_of_call, is_hang_up, route_after_input, Edge, Route, Router};
pub use stage::{Stage, StageContext, StageId};

/// A validated, immutable stage graph.
pub struct StageGraph {
    stages: HashMap<StageId, Arc<dyn Stage>>,
    edges: HashMap<StageId, Edge>,
    entry: StageId,
    suspend_after: Option<StageId>,
    merge: MergeTable,
}

impl StageGraph {
    pub fn builder(entry: StageId) -> StageGraphBuilder {
        StageGraphBuilder {
            stages: Vec::new(),
            edges: Vec::new(),
            entry,
            suspend_after: None,
            policies: STANDARD_POLICIES.to_vec(),
        }
    }

    pub fn entry(&self) -> StageId {
        self.entry
    }

    pub fn suspend_after(&self) -> Option<StageId> {
        self.suspend_after
    }

    pub fn merge_table(&self) -> &MergeTable {
        &self.merge
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    pub fn stage(&self, id: StageId) -> Result<&Arc<dyn Stage>> {
        self.stages.get(&id).ok_or_else(|| CrisisError::InvalidRoute {
            from: "graph".into(),
            to: id.to_string(),
        })
    }

    /// Follow the outgoing edge of `from` over `state`.
    ///
    /// A router answer outside the edge's declared targets is an
    /// [`CrisisError::InvalidRoute`].
    pub fn next(&self, from: StageId, state: &SessionState) -> Result<Route> {
        let edge = self.edges.get(&from).ok_or_else(|| CrisisError::InvalidRoute {
            from: from.to_string(),
            to: "<no edge>".into(),
        })?;

        match edge {
            Edge::Static { to, .. } => Ok(*to),
            Edge::Conditional {
                targets, router, ..
            } => {
                let route = router(state);
                if !targets.contains(&route) {
                    return Err(CrisisError::InvalidRoute {
                        from: from.to_string(),
                        to: route.to_string(),
                    });
                }
                Ok(route)
            }
        }
    }
}

impl std::fmt::Debug for StageGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<&StageId> = self.stages.keys().collect();
        stages.sort_by_key(|id| id.as_str());
        f.debug_struct("StageGraph")
            .field("entry", &self.entry)
            .field("stages", &stages)
            .field("suspend_after", &self.suspend_after)
            .finish()
    }
}

/// Collects stages and edges, then validates them into a [`StageGraph`].
pub struct StageGraphBuilder {
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<Edge>,
    entry: StageId,
    suspend_after: Option<StageId>,
    policies: Vec<(Field, MergePolicy)>,
}

impl StageGraphBuilder {
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Persist and return control after `stage` instead of following its edge.
    pub fn suspend_after(mut self, stage: StageId) -> Self {
        self.suspend_after = Some(stage);
        self
    }

    /// Replace the merge policies (defaults to the standard table).
    pub fn merge_policies(mut self, policies: Vec<(Field, MergePolicy)>) -> Self {
        self.policies = policies;
        self
    }

    pub fn build(self) -> Result<StageGraph> {
        let merge = MergeTable::new(&self.policies)?;

        let mut stages = HashMap::new();
        for stage in self.stages {
            let id = stage.id();
            if stages.insert(id, stage).is_some() {
                return Err(CrisisError::Config(format!("stage '{}' registered twice", id)));
            }
        }

        if !stages.contains_key(&self.entry) {
            return Err(CrisisError::Config(format!(
                "entry stage '{}' is not registered",
                self.entry
            )));
        }
        if let Some(id) = self.suspend_after {
            if !stages.contains_key(&id) {
                return Err(CrisisError::Config(format!(
                    "suspend point '{}' is not registered",
                    id
                )));
            }
        }

        let mut edges = HashMap::new();
        for edge in self.edges {
            let from = edge.from();
            if !stages.contains_key(&from) {
                return Err(CrisisError::Config(format!(
                    "edge leaves unregistered stage '{}'",
                    from
                )));
            }
            if edge.targets().is_empty() {
                return Err(CrisisError::Config(format!(
                    "conditional edge from '{}' declares no targets",
                    from
                )));
            }
            for target in edge.targets() {
                if let Route::Stage(to) = target {
                    if !stages.contains_key(&to) {
                        return Err(CrisisError::Config(format!(
                            "edge '{}' -> '{}' targets an unregistered stage",
                            from, to
                        )));
                    }
                }
            }
            if edges.insert(from, edge).is_some() {
                return Err(CrisisError::Config(format!(
                    "stage '{}' has more than one outgoing edge",
                    from
                )));
            }
        }

        for id in stages.keys() {
            if !edges.contains_key(id) {
                return Err(CrisisError::Config(format!(
                    "stage '{}' has no outgoing edge",
                    id
                )));
            }
        }

        Ok(StageGraph {
            stages,
            edges,
            entry: self.entry,
            suspend_after: self.suspend_after,
            merge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisislink_core::state::StateUpdate;
    use futures::future::BoxFuture;

    struct Noop(StageId);

    impl Stage for Noop {
        fn id(&self) -> StageId {
            self.0
        }

        fn run<'a>(
            &'a self,
            _ctx: &'a StageContext,
            _state: &'a SessionState,
        ) -> BoxFuture<'a, Result<StateUpdate>> {
            Box::pin(async { Ok(StateUpdate::none()) })
        }
    }

    fn noop(id: StageId) -> Arc<dyn Stage> {
        Arc::new(Noop(id))
    }

    #[test]
    fn test_graph_construction() {
        let graph = StageGraph::builder(StageId::ScenarioSetup)
            .stage(noop(StageId::ScenarioSetup))
            .stage(noop(StageId::VoiceProvision))
            .edge(Edge::always(StageId::ScenarioSetup, StageId::VoiceProvision))
            .edge(Edge::Static {
                from: StageId::VoiceProvision,
                to: Route::Terminal,
            })
            .build()
            .unwrap();

        assert_eq!(graph.entry(), StageId::ScenarioSetup);
        assert!(graph.contains(StageId::VoiceProvision));
        assert_eq!(
            graph
                .next(StageId::ScenarioSetup, &SessionState::new())
                .unwrap(),
            Route::Stage(StageId::VoiceProvision)
        );
    }

    #[test]
    fn test_missing_edge_rejected() {
        let err = StageGraph::builder(StageId::ScenarioSetup)
            .stage(noop(StageId::ScenarioSetup))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no outgoing edge"));
    }

    #[test]
    fn test_edge_to_unregistered_stage_rejected() {
        let err = StageGraph::builder(StageId::ScenarioSetup)
            .stage(noop(StageId::ScenarioSetup))
            .edge(Edge::always(StageId::ScenarioSetup, StageId::ReplyGenerate))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unregistered"));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let result = StageGraph::builder(StageId::ScenarioSetup)
            .stage(noop(StageId::ScenarioSetup))
            .edge(Edge::always(StageId::ScenarioSetup, StageId::ScenarioSetup))
            .edge(Edge::Static {
                from: StageId::ScenarioSetup,
                to: Route::Terminal,
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_merge_table_rejected() {
        let result = StageGraph::builder(StageId::ScenarioSetup)
            .stage(noop(StageId::ScenarioSetup))
            .edge(Edge::Static {
                from: StageId::ScenarioSetup,
                to: Route::Terminal,
            })
            .merge_policies(vec![(Field::Messages, MergePolicy::Append)])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_undeclared_route_is_fatal() {
        let rogue: Router = Arc::new(|_| Route::Stage(StageId::VoiceProvision));
        let graph = StageGraph::builder(StageId::ScenarioSetup)
            .stage(noop(StageId::ScenarioSetup))
            .stage(noop(StageId::VoiceProvision))
            .edge(Edge::conditional(
                StageId::ScenarioSetup,
                vec![Route::Terminal],
                rogue,
            ))
            .edge(Edge::always(StageId::VoiceProvision, StageId::ScenarioSetup))
            .build()
            .unwrap();

        let err = graph
            .next(StageId::ScenarioSetup, &SessionState::new())
            .unwrap_err();
        assert!(matches!(err, CrisisError::InvalidRoute { .. }));
    }
}
