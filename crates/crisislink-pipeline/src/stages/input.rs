use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crisislink_core::error::Result;
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::traits::InputSource;

use crate::graph::{Stage, StageContext, StageId};

/// Pulls the dispatcher's next line in-graph (autonomous mode).
pub struct NextInputAcquire {
    source: Arc<dyn InputSource>,
}

impl NextInputAcquire {
    pub fn new(source: Arc<dyn InputSource>) -> Self {
        Self { source }
    }
}

impl Stage for NextInputAcquire {
    fn id(&self) -> StageId {
        StageId::NextInputAcquire
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        _state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let line = self.source.next_input(&ctx.session_id).await?;
            info!(session_id = %ctx.session_id, input = %line, "Dispatcher input");
            Ok(StateUpdate::dispatcher_input(line))
        })
    }
}
