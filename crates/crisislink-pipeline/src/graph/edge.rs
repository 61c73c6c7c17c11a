use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crisislink_core::state::SessionState;
use crisislink_core::types::Role;

use super::stage::StageId;

/// Where control goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "stage", rename_all = "snake_case")]
pub enum Route {
    Stage(StageId),
    /// The call is over; the session will not run again.
    Terminal,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Stage(id) => write!(f, "{}", id),
            Route::Terminal => f.write_str("terminal"),
        }
    }
}

/// Routing function evaluated over the just-committed state.
pub type Router = Arc<dyn Fn(&SessionState) -> Route + Send + Sync>;

/// The single outgoing edge of a stage.
#[derive(Clone)]
pub enum Edge {
    /// Always go to `to`.
    Static { from: StageId, to: Route },
    /// Ask `router`; its answer must be one of `targets`.
    Conditional {
        from: StageId,
        targets: Vec<Route>,
        router: Router,
    },
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: StageId, to: StageId) -> Self {
        Self::Static {
            from,
            to: Route::Stage(to),
        }
    }

    /// Create a conditional edge with its declared targets.
    pub fn conditional(from: StageId, targets: Vec<Route>, router: Router) -> Self {
        Self::Conditional {
            from,
            targets,
            router,
        }
    }

    pub fn from(&self) -> StageId {
        match self {
            Edge::Static { from, .. } | Edge::Conditional { from, .. } => *from,
        }
    }

    /// Every route this edge can produce.
    pub fn targets(&self) -> Vec<Route> {
        match self {
            Edge::Static { to, .. } => vec![*to],
            Edge::Conditional { targets, .. } => targets.clone(),
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Static { from, to } => write!(f, "Edge({} -> {})", from, to),
            Edge::Conditional { from, targets, .. } => {
                write!(f, "Edge({} -> one of {:?})", from, targets)
            }
        }
    }
}

/// Whether the dispatcher just asked to end the call.
pub fn is_hang_up(state: &SessionState) -> bool {
    state
        .last_message()
        .is_some_and(|m| m.role == Role::Dispatcher && m.content.to_lowercase().contains("hang up"))
}

/// Decide what follows a dispatcher's input: end the call, or run another turn.
pub fn route_after_input(state: &SessionState, max_audio_history: usize) -> Route {
    if is_hang_up(state) || state.audio_history.len() > max_audio_history {
        return Route::Terminal;
    }
    Route::Stage(StageId::ScenarioSetup)
}

/// [`route_after_input`] as a [`Router`], with the targets it can produce.
pub fn end_of_call(max_audio_history: usize) -> (Vec<Route>, Router) {
    let targets = vec![Route::Stage(StageId::ScenarioSetup), Route::Terminal];
    let router: Router = Arc::new(move |state| route_after_input(state, max_audio_history));
    (targets, router)
}
