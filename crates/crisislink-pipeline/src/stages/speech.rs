use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crisislink_core::error::Result;
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::traits::{AudioStore, SpeechSynthesizer};
use crisislink_core::types::AudioRef;

use super::missing;
use crate::graph::{Stage, StageContext, StageId};

/// Speaks `current_text` and appends the utterance to the audio history.
pub struct SpeechSynthesize {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    audio: Arc<dyn AudioStore>,
}

impl SpeechSynthesize {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, audio: Arc<dyn AudioStore>) -> Self {
        Self { synthesizer, audio }
    }
}

/// Session-scoped key of the n-th (1-based) utterance.
pub(crate) fn utterance_key(ctx: &StageContext, n: usize) -> AudioRef {
    AudioRef::scoped(&ctx.session_id, &format!("utterance-{:04}.wav", n))
}

impl Stage for SpeechSynthesize {
    fn id(&self) -> StageId {
        StageId::SpeechSynthesize
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let text = state
                .current_text
                .as_deref()
                .ok_or_else(|| missing(self.id(), "a line to speak"))?;
            let voice = state
                .voice_definition
                .as_ref()
                .ok_or_else(|| missing(self.id(), "a provisioned voice"))?;

            let wav = self.synthesizer.synthesize(text, voice).await?;
            let key = utterance_key(ctx, state.audio_history.len() + 1);
            let stored = self.audio.put(key, wav).await?;

            info!(session_id = %ctx.session_id, audio = %stored, "Synthesized utterance");
            Ok(StateUpdate::none().push_audio(stored))
        })
    }
}
