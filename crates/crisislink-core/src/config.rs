use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CrisisError, Result};

/// Top-level CrisisLink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// How the turn loop acquires the dispatcher's next line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Suspend after post-processing and wait for the caller to `step`.
    #[default]
    Interactive,
    /// Acquire input in-graph and loop until a terminal condition fires.
    Autonomous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: PipelineMode,
    /// End the call once more than this many utterances were synthesized.
    #[serde(default = "default_max_audio_history")]
    pub max_audio_history: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            max_audio_history: default_max_audio_history(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_max_audio_history() -> usize { 10 }
fn default_data_dir() -> String { "~/.crisislink".to_string() }

/// Voice + ambience mixing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerConfig {
    #[serde(default = "default_background_gain_db")]
    pub background_gain_db: f32,
    #[serde(default = "default_margin_ms")]
    pub margin_ms: u32,
    /// Ambient WAV file laid under every utterance.
    #[serde(default)]
    pub background: Option<String>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            background_gain_db: default_background_gain_db(),
            margin_ms: default_margin_ms(),
            background: None,
        }
    }
}

fn default_background_gain_db() -> f32 { -5.0 }
fn default_margin_ms() -> u32 { 500 }

/// Text generation backend (Ollama chat API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_scenario_temperature")]
    pub scenario_temperature: f32,
    #[serde(default = "default_reply_temperature")]
    pub reply_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            scenario_temperature: default_scenario_temperature(),
            reply_temperature: default_reply_temperature(),
        }
    }
}

fn default_llm_base_url() -> String { "http://localhost:11434".to_string() }
fn default_llm_model() -> String { "llama3.2:3b".to_string() }
fn default_scenario_temperature() -> f32 { 0.2 }
fn default_reply_temperature() -> f32 { 0.8 }

/// Voice backend (ElevenLabs API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_voice_base_url")]
    pub base_url: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_design_model")]
    pub design_model: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    /// PCM sample rate requested from synthesis.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Length of generated ambience, in seconds.
    #[serde(default = "default_ambience_seconds")]
    pub ambience_seconds: f32,
    /// How literally sound generation follows the prompt (0.0 - 1.0).
    #[serde(default = "default_ambience_prompt_influence")]
    pub ambience_prompt_influence: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_voice_base_url(),
            tts_model: default_tts_model(),
            design_model: default_design_model(),
            stt_model: default_stt_model(),
            sample_rate: default_sample_rate(),
            ambience_seconds: default_ambience_seconds(),
            ambience_prompt_influence: default_ambience_prompt_influence(),
        }
    }
}

fn default_voice_base_url() -> String { "https://api.elevenlabs.io".to_string() }
fn default_tts_model() -> String { "eleven_multilingual_v2".to_string() }
fn default_design_model() -> String { "eleven_multilingual_ttv_v2".to_string() }
fn default_stt_model() -> String { "scribe_v1".to_string() }
fn default_sample_rate() -> u32 { 22_050 }
fn default_ambience_seconds() -> f32 { 10.0 }
fn default_ambience_prompt_influence() -> f32 { 0.5 }

/// Checkpoint persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// SQLite file. Default: <data_dir>/checkpoints.db
    #[serde(default)]
    pub path: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CrisisError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| CrisisError::Config(e.to_string()))
    }

    /// Resolve the data directory (expand ~).
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.engine.data_dir)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.checkpoint.path {
            Some(p) => expand_home(p),
            None => self.data_dir().join("checkpoints.db"),
        }
    }

    pub fn scenario_db_path(&self) -> PathBuf {
        self.data_dir().join("scenarios.db")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir().join("audio")
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
