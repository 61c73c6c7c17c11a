//! Scripted collaborators for exercising the pipeline without network access.
//!
//! Every double is deterministic: the same calls in the same order produce
//! the same outputs, which is what resume-transparency tests rely on.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use crisislink_audio::AudioTrack;
use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::*;
use crisislink_core::types::*;

/// Sample rate of every track produced here.
pub const TEST_SAMPLE_RATE: u32 = 8_000;

pub fn sample_scenario() -> Scenario {
    Scenario {
        voice_name: "Arthur".into(),
        voice_prompt: "Elderly male voice, deep, raspy, Scottish accent.".into(),
        persona_text: "You are Arthur. You have fallen on the stairs. You are terrified.".into(),
        sample_dialogue: "I've been living in this old house for nearly forty years now.".into(),
        sound_prompt: "Wind howling outside an old stone house".into(),
    }
}

/// A deterministic tone whose length grows with the text.
pub fn tone_for(text: &str) -> AudioTrack {
    let len = (TEST_SAMPLE_RATE as usize / 10) + text.len() * 80;
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / TEST_SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    AudioTrack::new(TEST_SAMPLE_RATE, samples)
}

/// One second of low hiss-like ambience, encoded as WAV.
pub fn background_wav() -> Vec<u8> {
    let samples = (0..TEST_SAMPLE_RATE as usize)
        .map(|i| ((i * 7919 % 101) as f32 / 101.0 - 0.5) * 0.2)
        .collect();
    AudioTrack::new(TEST_SAMPLE_RATE, samples)
        .to_wav()
        .expect("encode background")
}

/// Always produces the same scenario, counting calls.
pub struct FixedScenarioGenerator {
    scenario: Scenario,
    pub calls: AtomicUsize,
}

impl FixedScenarioGenerator {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ScenarioGenerator for FixedScenarioGenerator {
    fn generate(&self) -> BoxFuture<'_, Result<Scenario>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scenario = self.scenario.clone();
        Box::pin(async move { Ok(scenario) })
    }
}

/// Replies with a line derived from the last dispatcher message.
pub struct EchoReplyGenerator;

impl ReplyGenerator for EchoReplyGenerator {
    fn reply<'a>(
        &'a self,
        _persona_text: &'a str,
        transcript: &'a [Message],
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let heard = transcript
                .iter()
                .rev()
                .find(|m| m.role == Role::Dispatcher)
                .map(|m| m.content.as_str())
                .unwrap_or("nothing yet");
            Ok(format!("Please hurry! ({} lines so far, heard: {})", transcript.len(), heard))
        })
    }
}

/// Hands out `voice-<name>` references, counting calls.
#[derive(Default)]
pub struct MockVoiceProvisioner {
    pub calls: AtomicUsize,
}

impl VoiceProvisioner for MockVoiceProvisioner {
    fn provision<'a>(&'a self, scenario: &'a Scenario) -> BoxFuture<'a, Result<VoiceDefinition>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(VoiceDefinition::new(format!(
                "voice-{}",
                scenario.voice_name.to_lowercase()
            )))
        })
    }
}

/// Synthesizes [`tone_for`] the text. Fails the first `failures` calls.
pub struct ToneSynthesizer {
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ToneSynthesizer {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        _voice: &'a VoiceDefinition,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Box::pin(async move {
            if fail {
                return Err(CrisisError::collaborator("speech", "synthesis backend unavailable"));
            }
            tone_for(text)
                .to_wav()
                .map_err(|e| CrisisError::Audio(e.to_string()))
        })
    }
}

/// Returns a fixed transcription.
pub struct FixedTranscriber(pub String);

impl Transcriber for FixedTranscriber {
    fn transcribe(&self, _audio: Vec<u8>) -> BoxFuture<'_, Result<String>> {
        let text = self.0.clone();
        Box::pin(async move { Ok(text) })
    }
}

/// Pops dispatcher lines from a queue; running dry is a collaborator failure.
pub struct ScriptedInput {
    lines: Mutex<VecDeque<String>>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }
}

impl InputSource for ScriptedInput {
    fn next_input<'a>(&'a self, _session: &'a SessionId) -> BoxFuture<'a, Result<String>> {
        let next = self.lines.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| CrisisError::collaborator("input", "script exhausted"))
        })
    }
}

/// In-memory artifact store.
#[derive(Default)]
pub struct MemoryAudioStore {
    blobs: Mutex<HashMap<AudioRef, Vec<u8>>>,
}

impl MemoryAudioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<AudioRef> {
        let mut keys: Vec<AudioRef> = self.blobs.lock().unwrap().keys().cloned().collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        keys
    }

    pub fn get_sync(&self, key: &AudioRef) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }
}

impl AudioStore for MemoryAudioStore {
    fn put(&self, key: AudioRef, bytes: Vec<u8>) -> BoxFuture<'_, Result<AudioRef>> {
        self.blobs.lock().unwrap().insert(key.clone(), bytes);
        Box::pin(async move { Ok(key) })
    }

    fn get<'a>(&'a self, key: &'a AudioRef) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        let found = self.get_sync(key);
        Box::pin(async move { Ok(found) })
    }
}

/// Hands out [`background_wav`] as every scenario's ambience, counting calls.
#[derive(Default)]
pub struct StaticAmbience {
    pub calls: AtomicUsize,
}

impl AmbienceGenerator for StaticAmbience {
    fn ambience<'a>(&'a self, _scenario: &'a Scenario) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(background_wav()) })
    }
}

/// In-memory scenario store. Fails the first `failures` saves.
#[derive(Default)]
pub struct MemoryScenarioStore {
    records: Mutex<Vec<ScenarioRecord>>,
    failures: AtomicUsize,
    pub saves: AtomicUsize,
}

impl MemoryScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<ScenarioRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ScenarioStore for MemoryScenarioStore {
    fn save(&self, record: ScenarioRecord) -> BoxFuture<'_, Result<()>> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !fail {
            let mut records = self.records.lock().unwrap();
            records.retain(|r| r.voice_reference != record.voice_reference);
            records.push(record);
        }
        Box::pin(async move {
            if fail {
                return Err(CrisisError::Database("disk full".into()));
            }
            Ok(())
        })
    }

    fn get<'a>(&'a self, voice_reference: &'a str) -> BoxFuture<'a, Result<Option<ScenarioRecord>>> {
        let found = self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.voice_reference == voice_reference)
            .cloned();
        Box::pin(async move { Ok(found) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<ScenarioRecord>>> {
        let records = self.records();
        Box::pin(async move { Ok(records) })
    }
}
