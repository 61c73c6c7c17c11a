use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crisislink_core::config::LlmConfig;
use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::{ReplyGenerator, ScenarioGenerator};
use crisislink_core::types::{Message, Role, Scenario};

const SERVICE: &str = "ollama";

/// Voice design needs at least this many characters of sample speech.
const MIN_SAMPLE_CHARS: usize = 100;

const SAMPLE_FILLER: &str = " I need you to listen to me very carefully because the situation is \
getting worse by the second and I don't know how much longer I can stay on this line.";

/// Stands in for the dispatcher before anyone has spoken.
const OPEN_LINE: &str = "...";

const SCENARIO_PROMPT: &str = r#"You generate callers for an emergency dispatcher training simulator.
Invent one realistic, high-stress emergency call.

Answer with a single JSON object with these keys:
- "voice_name": the caller's first name.
- "voice_prompt": how the caller sounds for a voice actor (gender, age, accent, pitch). No emotions.
- "example_dialogue": one or two sentences the caller might say, used to design the voice.
- "victim_persona": instructions for playing the caller: the situation, how stressed they are, and what they only reveal when asked.
- "background_sounds": what can be heard around the caller, for a sound designer. Sounds only, no speech.

Example:
{
  "voice_name": "Arthur",
  "voice_prompt": "Elderly male voice, deep, raspy, Scottish accent.",
  "example_dialogue": "I've been living in this old house for nearly forty years now and I've never seen the winters get quite this cold.",
  "victim_persona": "You are Arthur. You have fallen on the stairs. You are terrified.",
  "background_sounds": "Wind howling outside an old stone house, a ticking clock."
}"#;

/// Text generation through Ollama's chat API.
///
/// Scenarios use JSON mode at a low temperature; replies are free text at
/// a higher one.
pub struct OllamaClient {
    http: Client,
    config: LlmConfig,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String> {
        let response = self
            .http
            .post(self.chat_url())
            .json(request)
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

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CrisisError::malformed(SERVICE, e))?;
        Ok(body.message.content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ChatOptions,
}

#[derive(Serialize, Debug, PartialEq)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Scenario JSON as the model writes it. All keys but `background_sounds`
/// are required, but are optional here so the error can name the missing ones.
#[derive(Deserialize)]
struct RawScenario {
    voice_name: Option<String>,
    voice_prompt: Option<String>,
    example_dialogue: Option<String>,
    victim_persona: Option<String>,
    #[serde(default)]
    background_sounds: Option<String>,
}

fn parse_scenario(content: &str) -> Result<Scenario> {
    let raw: RawScenario = serde_json::from_str(content.trim())
        .map_err(|e| CrisisError::malformed(SERVICE, format!("scenario is not JSON: {}", e)))?;

    let missing: Vec<&str> = [
        ("voice_name", raw.voice_name.is_none()),
        ("voice_prompt", raw.voice_prompt.is_none()),
        ("example_dialogue", raw.example_dialogue.is_none()),
        ("victim_persona", raw.victim_persona.is_none()),
    ]
    .into_iter()
    .filter_map(|(key, absent)| absent.then_some(key))
    .collect();
    if !missing.is_empty() {
        return Err(CrisisError::collaborator(
            SERVICE,
            format!("scenario is missing {}", missing.join(", ")),
        ));
    }

    Ok(Scenario {
        voice_name: raw.voice_name.unwrap_or_default(),
        voice_prompt: raw.voice_prompt.unwrap_or_default(),
        persona_text: raw.victim_persona.unwrap_or_default(),
        sample_dialogue: pad_sample(raw.example_dialogue.unwrap_or_default()),
        sound_prompt: raw.background_sounds.unwrap_or_default(),
    })
}

fn pad_sample(mut sample: String) -> String {
    if sample.chars().count() < MIN_SAMPLE_CHARS {
        debug!(chars = sample.chars().count(), "Padding short sample dialogue");
        sample.push_str(SAMPLE_FILLER);
        sample.push_str(SAMPLE_FILLER);
    }
    sample
}

/// Persona as system prompt, then the transcript from the caller's side:
/// the dispatcher is the user, the victim is the assistant.
fn reply_messages<'a>(persona_text: &'a str, transcript: &'a [Message]) -> Vec<ChatMessage<'a>> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: persona_text,
    }];
    if transcript.is_empty() {
        messages.push(ChatMessage {
            role: "user",
            content: OPEN_LINE,
        });
    }
    messages.extend(transcript.iter().map(|m| ChatMessage {
        role: match m.role {
            Role::Dispatcher => "user",
            Role::Victim => "assistant",
        },
        content: &m.content,
    }));
    messages
}

impl ScenarioGenerator for OllamaClient {
    fn generate(&self) -> BoxFuture<'_, Result<Scenario>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.config.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: SCENARIO_PROMPT,
                }],
                stream: false,
                format: Some("json"),
                options: ChatOptions {
                    temperature: self.config.scenario_temperature,
                },
            };

            let content = self.chat(&request).await?;
            let scenario = parse_scenario(&content).map_err(|e| {
                warn!(error = %e, raw = %content, "Rejected generated scenario");
                e
            })?;
            debug!(voice_name = %scenario.voice_name, "Generated scenario");
            Ok(scenario)
        })
    }
}

impl ReplyGenerator for OllamaClient {
    fn reply<'a>(
        &'a self,
        persona_text: &'a str,
        transcript: &'a [Message],
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.config.model,
                messages: reply_messages(persona_text, transcript),
                stream: false,
                format: None,
                options: ChatOptions {
                    temperature: self.config.reply_temperature,
                },
            };
            self.chat(&request).await
        })
    }
}
