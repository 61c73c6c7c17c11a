use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crisislink_audio::{mix, AudioError, AudioTrack, MixParams};
use crisislink_core::error::{CrisisError, Result};
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::traits::{AmbienceGenerator, AudioStore};
use crisislink_core::types::AudioRef;

use super::missing;
use crate::graph::{Stage, StageContext, StageId};

/// Name of the generated ambience inside a session's artifacts.
pub const SESSION_AMBIENCE: &str = "ambience.wav";

/// Lays the latest utterance over the session's ambience track.
///
/// A configured background is shared by every session. Without one, each
/// session gets its own ambience from the generator on first use.
pub struct AudioPostprocess {
    audio: Arc<dyn AudioStore>,
    background: Option<AudioRef>,
    ambience: Option<Arc<dyn AmbienceGenerator>>,
    params: MixParams,
}

impl AudioPostprocess {
    pub fn new(audio: Arc<dyn AudioStore>, background: Option<AudioRef>, params: MixParams) -> Self {
        Self {
            audio,
            background,
            ambience: None,
            params,
        }
    }

    pub fn with_ambience(mut self, generator: Arc<dyn AmbienceGenerator>) -> Self {
        self.ambience = Some(generator);
        self
    }

    async fn fetch_track(&self, key: &AudioRef, role: &str) -> Result<AudioTrack> {
        let bytes = self
            .audio
            .get(key)
            .await?
            .ok_or_else(|| CrisisError::MixerInputMissing(format!("{} track {} not found", role, key)))?;
        decode(key, role, &bytes)
    }

    async fn background(&self, ctx: &StageContext, state: &SessionState) -> Result<(AudioRef, AudioTrack)> {
        if let Some(key) = &self.background {
            return Ok((key.clone(), self.fetch_track(key, "background").await?));
        }
        let generator = self
            .ambience
            .as_ref()
            .ok_or_else(|| CrisisError::MixerInputMissing("no background track configured".into()))?;

        let key = AudioRef::scoped(&ctx.session_id, SESSION_AMBIENCE);
        let bytes = match self.audio.get(&key).await? {
            Some(bytes) => bytes,
            None => {
                let scenario = state
                    .scenario
                    .as_ref()
                    .ok_or_else(|| missing(self.id(), "a scenario"))?;
                let wav = generator.ambience(scenario).await?;
                self.audio.put(key.clone(), wav.clone()).await?;
                info!(session_id = %ctx.session_id, audio = %key, "Generated session ambience");
                wav
            }
        };
        let track = decode(&key, "background", &bytes)?;
        Ok((key, track))
    }
}

fn decode(key: &AudioRef, role: &str, bytes: &[u8]) -> Result<AudioTrack> {
    AudioTrack::from_wav(bytes).map_err(|e| CrisisError::Audio(format!("{} track {}: {}", role, key, e)))
}

impl Stage for AudioPostprocess {
    fn id(&self) -> StageId {
        StageId::AudioPostprocess
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let fg_key = state
                .audio_history
                .last()
                .ok_or_else(|| CrisisError::MixerInputMissing("no synthesized utterance".into()))?;
            let foreground = self.fetch_track(fg_key, "foreground").await?;
            let (bg_key, background) = self.background(ctx, state).await?;
            let background = background.resample(foreground.sample_rate);

            let mixed = mix(&foreground, &background, &self.params).map_err(|e| match e {
                AudioError::EmptyBackground => {
                    CrisisError::MixerInputMissing(format!("background track {} is empty", bg_key))
                }
                other => CrisisError::Audio(other.to_string()),
            })?;
            let wav = mixed
                .to_wav()
                .map_err(|e| CrisisError::Audio(e.to_string()))?;

            let key = AudioRef::scoped(
                &ctx.session_id,
                &format!("mix-{:04}.wav", state.audio_history.len()),
            );
            let stored = self.audio.put(key, wav).await?;

            info!(
                session_id = %ctx.session_id,
                audio = %stored,
                duration_ms = mixed.duration_ms(),
                "Mixed utterance over ambience"
            );
            Ok(StateUpdate::none().with_final_audio(stored))
        })
    }
}
