use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::traits::{ScenarioStore, VoiceProvisioner};
use crisislink_core::types::{Scenario, ScenarioRecord, VoiceDefinition};

use super::missing;
use crate::graph::{Stage, StageContext, StageId};

/// Provisions the synthesis voice once per session and, when a store is
/// attached, saves the scenario/voice pair for reuse.
pub struct VoiceProvision {
    provisioner: Arc<dyn VoiceProvisioner>,
    store: Option<Arc<dyn ScenarioStore>>,
}

impl VoiceProvision {
    pub fn new(provisioner: Arc<dyn VoiceProvisioner>) -> Self {
        Self {
            provisioner,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ScenarioStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Save the pair unless the store already has this voice.
    async fn ensure_saved(
        &self,
        store: &dyn ScenarioStore,
        scenario: &Scenario,
        voice: &VoiceDefinition,
    ) -> Result<()> {
        if store.get(&voice.voice_reference).await?.is_some() {
            return Ok(());
        }
        store.save(ScenarioRecord::new(scenario, voice)).await?;
        debug!(voice = %voice.voice_reference, "Saved scenario for reuse");
        Ok(())
    }
}

impl Stage for VoiceProvision {
    fn id(&self) -> StageId {
        StageId::VoiceProvision
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            if let Some(voice) = &state.voice_definition {
                debug!(session_id = %ctx.session_id, "Voice already provisioned, skipping");
                // a save that failed on an earlier attempt is retried here
                if let (Some(store), Some(scenario)) = (&self.store, &state.scenario) {
                    self.ensure_saved(store.as_ref(), scenario, voice).await?;
                }
                return Ok(StateUpdate::none());
            }
            let scenario = state
                .scenario
                .as_ref()
                .ok_or_else(|| missing(self.id(), "a scenario"))?;

            let voice = self.provisioner.provision(scenario).await?;
            info!(
                session_id = %ctx.session_id,
                voice = %voice.voice_reference,
                "Provisioned voice"
            );

            let update = StateUpdate::none().with_voice(voice.clone());
            if let Some(store) = &self.store {
                if let Err(e) = store.save(ScenarioRecord::new(scenario, &voice)).await {
                    warn!(voice = %voice.voice_reference, error = %e, "Could not save scenario");
                    return Err(CrisisError::incomplete(update, e));
                }
                debug!(voice = %voice.voice_reference, "Saved scenario for reuse");
            }

            Ok(update)
        })
    }
}
