use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Invents a fresh emergency-call persona.
pub trait ScenarioGenerator: Send + Sync + 'static {
    fn generate(&self) -> BoxFuture<'_, Result<Scenario>>;
}

/// Produces the caller's next line given persona and transcript.
pub trait ReplyGenerator: Send + Sync + 'static {
    fn reply<'a>(
        &'a self,
        persona_text: &'a str,
        transcript: &'a [Message],
    ) -> BoxFuture<'a, Result<String>>;
}

/// Designs and saves a synthesis voice for a scenario.
pub trait VoiceProvisioner: Send + Sync + 'static {
    fn provision<'a>(&'a self, scenario: &'a Scenario) -> BoxFuture<'a, Result<VoiceDefinition>>;
}

/// Speaks text with a provisioned voice.
///
/// Returns an encoded WAV artifact.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice: &'a VoiceDefinition,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Generates the ambient background heard behind the caller.
///
/// Returns an encoded WAV artifact.
pub trait AmbienceGenerator: Send + Sync + 'static {
    fn ambience<'a>(&'a self, scenario: &'a Scenario) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Speech-to-text.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(&self, audio: Vec<u8>) -> BoxFuture<'_, Result<String>>;
}

/// Source of the dispatcher's next line when the pipeline acquires input itself.
pub trait InputSource: Send + Sync + 'static {
    fn next_input<'a>(&'a self, session: &'a SessionId) -> BoxFuture<'a, Result<String>>;
}

/// Content store for audio artifacts.
pub trait AudioStore: Send + Sync + 'static {
    /// Store `bytes` under `key`, replacing anything already there.
    fn put(&self, key: AudioRef, bytes: Vec<u8>) -> BoxFuture<'_, Result<AudioRef>>;

    /// Fetch an artifact. Missing keys are `Ok(None)`.
    fn get<'a>(&'a self, key: &'a AudioRef) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;
}

/// Saved scenario/voice pairs, reusable across sessions.
pub trait ScenarioStore: Send + Sync + 'static {
    fn save(&self, record: ScenarioRecord) -> BoxFuture<'_, Result<()>>;

    fn get<'a>(&'a self, voice_reference: &'a str)
        -> BoxFuture<'a, Result<Option<ScenarioRecord>>>;

    fn list(&self) -> BoxFuture<'_, Result<Vec<ScenarioRecord>>>;
}
