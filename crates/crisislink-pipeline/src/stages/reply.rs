use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::traits::ReplyGenerator;
use crisislink_core::types::Message;

use super::missing;
use crate::graph::{Stage, StageContext, StageId};

/// Asks the reply generator for the caller's next line.
pub struct ReplyGenerate {
    generator: Arc<dyn ReplyGenerator>,
}

impl ReplyGenerate {
    pub fn new(generator: Arc<dyn ReplyGenerator>) -> Self {
        Self { generator }
    }
}

impl Stage for ReplyGenerate {
    fn id(&self) -> StageId {
        StageId::ReplyGenerate
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let scenario = state
                .scenario
                .as_ref()
                .ok_or_else(|| missing(self.id(), "a scenario"))?;

            let line = self
                .generator
                .reply(&scenario.persona_text, &state.messages)
                .await?;
            let line = line.trim();
            if line.is_empty() {
                return Err(CrisisError::malformed("reply", "empty reply"));
            }

            info!(session_id = %ctx.session_id, turn = ctx.turn, reply = %line, "Caller replied");
            Ok(StateUpdate::none()
                .with_text(line)
                .push_message(Message::victim(line)))
        })
    }
}
