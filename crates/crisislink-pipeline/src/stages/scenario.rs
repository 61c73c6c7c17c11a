use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use crisislink_core::error::Result;
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::traits::ScenarioGenerator;

use crate::graph::{Stage, StageContext, StageId};

/// Generates the caller persona once per session.
pub struct ScenarioSetup {
    generator: Arc<dyn ScenarioGenerator>,
}

impl ScenarioSetup {
    pub fn new(generator: Arc<dyn ScenarioGenerator>) -> Self {
        Self { generator }
    }
}

impl Stage for ScenarioSetup {
    fn id(&self) -> StageId {
        StageId::ScenarioSetup
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            if state.scenario.is_some() {
                debug!(session_id = %ctx.session_id, "Scenario already set, skipping generation");
                return Ok(StateUpdate::none());
            }

            let scenario = self.generator.generate().await?;
            info!(
                session_id = %ctx.session_id,
                voice_name = %scenario.voice_name,
                "Generated scenario"
            );
            Ok(StateUpdate::none().with_scenario(scenario))
        })
    }
}
