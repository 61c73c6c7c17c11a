//! Wiring of the emergency-call conversation graph.
//!
//! ```text
//! scenario_setup -> voice_provision -> reply_generate -> speech_synthesize -> audio_postprocess
//!       ^                                                                         |
//!       +---------------- [suspend | next_input_acquire] -- end_of_call ----------+--> terminal
//! ```
//!
//! In interactive mode the engine suspends after `audio_postprocess` and the
//! end-of-call router runs when the caller supplies the next line. In
//! autonomous mode `next_input_acquire` fetches that line in-graph and the
//! router runs after it.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crisislink_audio::MixParams;
use crisislink_core::config::{AppConfig, PipelineMode};
use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::*;
use crisislink_core::types::AudioRef;

use crate::graph::{end_of_call, Edge, StageGraph, StageId};
use crate::stages::*;

/// External services the conversation stages call.
#[derive(Clone)]
pub struct Collaborators {
    pub scenario: Arc<dyn ScenarioGenerator>,
    pub reply: Arc<dyn ReplyGenerator>,
    pub voice: Arc<dyn VoiceProvisioner>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub audio: Arc<dyn AudioStore>,
    /// Where provisioned scenarios are saved for reuse.
    pub scenarios: Option<Arc<dyn ScenarioStore>>,
    /// Dispatcher input for autonomous mode.
    pub input: Option<Arc<dyn InputSource>>,
    /// Per-session ambience, used when no background track is configured.
    pub ambience: Option<Arc<dyn AmbienceGenerator>>,
}

/// Tunables for graph construction.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: PipelineMode,
    pub max_audio_history: usize,
    pub mix: MixParams,
    /// Ambience track in the audio store.
    pub background: Option<AudioRef>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl PipelineSettings {
    /// Settings from config. The background track must be imported
    /// separately (see [`import_background`]).
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mode: config.engine.mode,
            max_audio_history: config.engine.max_audio_history,
            mix: MixParams {
                background_gain_db: config.mixer.background_gain_db,
                margin_ms: config.mixer.margin_ms,
            },
            background: None,
        }
    }

    pub fn with_background(mut self, background: AudioRef) -> Self {
        self.background = Some(background);
        self
    }
}

/// Key the ambience track is stored under.
pub const BACKGROUND_KEY: &str = "ambience/background.wav";

/// Copy an ambience WAV from disk into the audio store.
pub async fn import_background(audio: &dyn AudioStore, path: &Path) -> Result<AudioRef> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        CrisisError::MixerInputMissing(format!("background {}: {}", path.display(), e))
    })?;
    let stored = audio.put(AudioRef(BACKGROUND_KEY.to_string()), bytes).await?;
    info!(path = %path.display(), audio = %stored, "Imported background track");
    Ok(stored)
}

/// Build the conversation graph for the configured mode.
pub fn conversation_graph(
    collaborators: &Collaborators,
    settings: &PipelineSettings,
) -> Result<StageGraph> {
    let mut voice = VoiceProvision::new(collaborators.voice.clone());
    if let Some(store) = &collaborators.scenarios {
        voice = voice.with_store(store.clone());
    }

    let mut postprocess = AudioPostprocess::new(
        collaborators.audio.clone(),
        settings.background.clone(),
        settings.mix,
    );
    if let Some(generator) = &collaborators.ambience {
        postprocess = postprocess.with_ambience(generator.clone());
    }

    let builder = StageGraph::builder(StageId::ScenarioSetup)
        .stage(Arc::new(ScenarioSetup::new(collaborators.scenario.clone())))
        .stage(Arc::new(voice))
        .stage(Arc::new(ReplyGenerate::new(collaborators.reply.clone())))
        .stage(Arc::new(SpeechSynthesize::new(
            collaborators.speech.clone(),
            collaborators.audio.clone(),
        )))
        .stage(Arc::new(postprocess))
        .edge(Edge::always(StageId::ScenarioSetup, StageId::VoiceProvision))
        .edge(Edge::always(StageId::VoiceProvision, StageId::ReplyGenerate))
        .edge(Edge::always(StageId::ReplyGenerate, StageId::SpeechSynthesize))
        .edge(Edge::always(StageId::SpeechSynthesize, StageId::AudioPostprocess));

    let (targets, router) = end_of_call(settings.max_audio_history);
    let builder = match settings.mode {
        PipelineMode::Interactive => builder
            .edge(Edge::conditional(StageId::AudioPostprocess, targets, router))
            .suspend_after(StageId::AudioPostprocess),
        PipelineMode::Autonomous => {
            let input = collaborators.input.clone().ok_or_else(|| {
                CrisisError::Config("autonomous mode needs a dispatcher input source".into())
            })?;
            builder
                .stage(Arc::new(NextInputAcquire::new(input)))
                .edge(Edge::always(StageId::AudioPostprocess, StageId::NextInputAcquire))
                .edge(Edge::conditional(StageId::NextInputAcquire, targets, router))
        }
    };

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Route;
    use crisislink_core::state::SessionState;
    use crisislink_core::types::Message;
    use crisislink_test_utils::*;

    fn collaborators() -> Collaborators {
        Collaborators {
            scenario: Arc::new(FixedScenarioGenerator::new(sample_scenario())),
            reply: Arc::new(EchoReplyGenerator),
            voice: Arc::new(MockVoiceProvisioner::default()),
            speech: Arc::new(ToneSynthesizer::new()),
            audio: Arc::new(MemoryAudioStore::new()),
            scenarios: None,
            input: None,
            ambience: None,
        }
    }

    #[test]
    fn test_interactive_graph() {
        let graph = conversation_graph(&collaborators(), &PipelineSettings::default()).unwrap();
        assert_eq!(graph.entry(), StageId::ScenarioSetup);
        assert_eq!(graph.suspend_after(), Some(StageId::AudioPostprocess));
        assert!(!graph.contains(StageId::NextInputAcquire));

        let mut state = SessionState::new();
        state.messages.push(Message::dispatcher("hang up"));
        assert_eq!(
            graph.next(StageId::AudioPostprocess, &state).unwrap(),
            Route::Terminal
        );
    }

    #[test]
    fn test_autonomous_graph_needs_input() {
        let settings = PipelineSettings {
            mode: PipelineMode::Autonomous,
            ..PipelineSettings::default()
        };
        let err = conversation_graph(&collaborators(), &settings).unwrap_err();
        assert!(matches!(err, CrisisError::Config(_)));

        let mut with_input = collaborators();
        with_input.input = Some(Arc::new(ScriptedInput::new(["hello"])));
        let graph = conversation_graph(&with_input, &settings).unwrap();
        assert_eq!(graph.suspend_after(), None);
        assert_eq!(
            graph
                .next(StageId::AudioPostprocess, &SessionState::new())
                .unwrap(),
            Route::Stage(StageId::NextInputAcquire)
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.engine.max_audio_history = 3;
        config.mixer.margin_ms = 250;
        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.max_audio_history, 3);
        assert_eq!(settings.mix.margin_ms, 250);
        assert_eq!(settings.mix.background_gain_db, -5.0);
        assert!(settings.background.is_none());
    }

    #[tokio::test]
    async fn test_import_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ambience.wav");
        std::fs::write(&path, background_wav()).unwrap();

        let store = MemoryAudioStore::new();
        let key = import_background(&store, &path).await.unwrap();
        assert_eq!(key.as_str(), BACKGROUND_KEY);
        assert_eq!(store.get_sync(&key).unwrap(), background_wav());

        let missing = import_background(&store, &dir.path().join("nope.wav")).await;
        assert!(matches!(missing, Err(CrisisError::MixerInputMissing(_))));
    }
}
