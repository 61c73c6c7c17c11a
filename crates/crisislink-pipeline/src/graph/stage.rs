use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crisislink_core::error::Result;
use crisislink_core::state::{SessionState, StateUpdate};
use crisislink_core::types::SessionId;

/// Identifier of every stage the conversation pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    ScenarioSetup,
    VoiceProvision,
    ReplyGenerate,
    SpeechSynthesize,
    AudioPostprocess,
    NextInputAcquire,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        StageId::ScenarioSetup,
        StageId::VoiceProvision,
        StageId::ReplyGenerate,
        StageId::SpeechSynthesize,
        StageId::AudioPostprocess,
        StageId::NextInputAcquire,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::ScenarioSetup => "scenario_setup",
            StageId::VoiceProvision => "voice_provision",
            StageId::ReplyGenerate => "reply_generate",
            StageId::SpeechSynthesize => "speech_synthesize",
            StageId::AudioPostprocess => "audio_postprocess",
            StageId::NextInputAcquire => "next_input_acquire",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage may know about the run it is part of.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub session_id: SessionId,
    /// 1-based turn counter.
    pub turn: usize,
}

/// One pipeline step: reads the committed state, returns a sparse update.
///
/// Stages never see a state that is being mutated; the engine merges the
/// returned update before the next stage runs.
pub trait Stage: Send + Sync + 'static {
    fn id(&self) -> StageId;

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        state: &'a SessionState,
    ) -> BoxFuture<'a, Result<StateUpdate>>;
}
