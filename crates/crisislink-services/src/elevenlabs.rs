use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crisislink_audio::AudioTrack;
use crisislink_core::config::VoiceConfig;
use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::{AmbienceGenerator, SpeechSynthesizer, Transcriber, VoiceProvisioner};
use crisislink_core::types::{Scenario, VoiceDefinition};

const SERVICE: &str = "elevenlabs";

/// Used when a scenario does not describe its surroundings.
const FALLBACK_AMBIENCE: &str = "Quiet indoor room tone with faint traffic outside";

/// Voice design, speech synthesis and transcription through ElevenLabs.
pub struct ElevenLabsClient {
    http: Client,
    api_key: String,
    config: VoiceConfig,
}

impl ElevenLabsClient {
    /// Fails without an API key.
    pub fn new(config: VoiceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CrisisError::Config("voice.api_key is not set".into()))?;
        Ok(Self {
            http: Client::new(),
            api_key,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(self.url(path))
            .header("xi-api-key", &self.api_key)
    }

    /// Raw 16-bit PCM at `rate`, as requested with `output_format=pcm_<rate>`.
    async fn pcm(&self, request: RequestBuilder, rate: u32, what: &str) -> Result<AudioTrack> {
        let pcm = send(request.query(&[("output_format", format!("pcm_{}", rate))]))
            .await?
            .bytes()
            .await
            .map_err(|e| CrisisError::collaborator(SERVICE, e))?;

        let track = AudioTrack::from_pcm_s16le(rate, &pcm)
            .map_err(|e| CrisisError::malformed(SERVICE, e))?;
        if track.is_empty() {
            return Err(CrisisError::malformed(SERVICE, format!("{} returned no audio", what)));
        }
        Ok(track)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        send(request)
            .await?
            .json()
            .await
            .map_err(|e| CrisisError::malformed(SERVICE, e))
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| CrisisError::collaborator(SERVICE, e))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(CrisisError::collaborator(
            SERVICE,
            format!("HTTP {}: {}", status, body),
        ));
    }
    Ok(response)
}

#[derive(Serialize)]
struct DesignRequest<'a> {
    voice_description: &'a str,
    model_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct DesignResponse {
    #[serde(default)]
    previews: Vec<Preview>,
}

#[derive(Deserialize)]
struct Preview {
    generated_voice_id: String,
}

#[derive(Serialize)]
struct SaveVoiceRequest<'a> {
    voice_name: &'a str,
    voice_description: &'a str,
    generated_voice_id: &'a str,
}

#[derive(Deserialize)]
struct SaveVoiceResponse {
    voice_id: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

#[derive(Serialize)]
struct SoundRequest<'a> {
    text: &'a str,
    duration_seconds: f32,
    prompt_influence: f32,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    text: String,
}

/// The first preview's id. No previews usually means the prompt was refused.
fn first_preview(design: DesignResponse) -> Result<String> {
    design
        .previews
        .into_iter()
        .next()
        .map(|p| p.generated_voice_id)
        .ok_or_else(|| {
            CrisisError::collaborator(SERVICE, "voice design returned no previews")
        })
}

impl VoiceProvisioner for ElevenLabsClient {
    fn provision<'a>(&'a self, scenario: &'a Scenario) -> BoxFuture<'a, Result<VoiceDefinition>> {
        Box::pin(async move {
            let design: DesignResponse = self
                .json(self.post("/v1/text-to-voice/design").json(&DesignRequest {
                    voice_description: &scenario.voice_prompt,
                    model_id: &self.config.design_model,
                    text: &scenario.sample_dialogue,
                }))
                .await?;
            let generated = first_preview(design)?;
            debug!(generated_voice_id = %generated, "Voice preview designed");

            let saved: SaveVoiceResponse = self
                .json(self.post("/v1/text-to-voice").json(&SaveVoiceRequest {
                    voice_name: &scenario.voice_name,
                    voice_description: &scenario.voice_prompt,
                    generated_voice_id: &generated,
                }))
                .await?;

            info!(voice_name = %scenario.voice_name, voice_id = %saved.voice_id, "Saved designed voice");
            Ok(VoiceDefinition::new(saved.voice_id))
        })
    }
}

impl SpeechSynthesizer for ElevenLabsClient {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice: &'a VoiceDefinition,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let request = self
                .post(&format!("/v1/text-to-speech/{}", voice.voice_reference))
                .json(&SpeechRequest {
                    text,
                    model_id: &self.config.tts_model,
                });

            let track = self.pcm(request, self.config.sample_rate, "synthesis").await?;
            debug!(duration_ms = track.duration_ms(), "Synthesized speech");
            track.to_wav().map_err(|e| CrisisError::Audio(e.to_string()))
        })
    }
}

fn ambience_prompt(scenario: &Scenario) -> &str {
    match scenario.sound_prompt.trim() {
        "" => FALLBACK_AMBIENCE,
        prompt => prompt,
    }
}

impl AmbienceGenerator for ElevenLabsClient {
    fn ambience<'a>(&'a self, scenario: &'a Scenario) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let text = ambience_prompt(scenario);
            let request = self.post("/v1/sound-generation").json(&SoundRequest {
                text,
                duration_seconds: self.config.ambience_seconds,
                prompt_influence: self.config.ambience_prompt_influence,
            });

            let track = self.pcm(request, self.config.sample_rate, "sound generation").await?;
            info!(prompt = %text, duration_ms = track.duration_ms(), "Generated ambience");
            track.to_wav().map_err(|e| CrisisError::Audio(e.to_string()))
        })
    }
}

impl Transcriber for ElevenLabsClient {
    fn transcribe(&self, audio: Vec<u8>) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let file = Part::bytes(audio)
                .file_name("dispatcher.wav")
                .mime_str("audio/wav")
                .map_err(|e| CrisisError::collaborator(SERVICE, e))?;
            let form = Form::new()
                .text("model_id", self.config.stt_model.clone())
                .part("file", file);

            let transcript: TranscriptResponse = self
                .json(self.post("/v1/speech-to-text").multipart(form))
                .await?;
            debug!(chars = transcript.text.len(), "Transcribed dispatcher audio");
            Ok(transcript.text)
        })
    }
}
