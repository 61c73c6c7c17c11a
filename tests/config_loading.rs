use std::io::Write;

use crisislink_core::config::{AppConfig, PipelineMode};
use crisislink_core::error::CrisisError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
mode = "autonomous"
max_audio_history = 4
data_dir = "/tmp/crisislink-test"

[mixer]
background_gain_db = -12.5
margin_ms = 750
background = "/tmp/crisislink-test/ambience.wav"

[llm]
base_url = "http://gpu-box:11434"
model = "llama3.1:8b"
scenario_temperature = 0.1
reply_temperature = 0.9

[voice]
api_key = "sk-test-key"
tts_model = "eleven_turbo_v2_5"
sample_rate = 16000

[checkpoint]
path = "/tmp/crisislink-test/sessions.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.mode, PipelineMode::Autonomous);
    assert_eq!(config.engine.max_audio_history, 4);
    assert_eq!(config.mixer.background_gain_db, -12.5);
    assert_eq!(config.mixer.margin_ms, 750);
    assert_eq!(
        config.mixer.background.as_deref(),
        Some("/tmp/crisislink-test/ambience.wav")
    );
    assert_eq!(config.llm.model, "llama3.1:8b");
    assert_eq!(config.llm.base_url, "http://gpu-box:11434");
    assert_eq!(config.voice.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.voice.tts_model, "eleven_turbo_v2_5");
    assert_eq!(config.voice.sample_rate, 16000);
    // untouched keys keep their defaults
    assert_eq!(config.voice.stt_model, "scribe_v1");

    assert_eq!(
        config.checkpoint_path(),
        std::path::PathBuf::from("/tmp/crisislink-test/sessions.db")
    );
    assert_eq!(
        config.scenario_db_path(),
        std::path::PathBuf::from("/tmp/crisislink-test/scenarios.db")
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("CRISISLINK_TEST_VOICE_KEY", "expanded-key-value");

    let toml_content = r#"
[voice]
api_key = "${CRISISLINK_TEST_VOICE_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.voice.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("CRISISLINK_TEST_VOICE_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[llm]
model = "llama3.2:3b"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.mode, PipelineMode::Interactive);
    assert_eq!(config.engine.max_audio_history, 10);
    assert_eq!(config.mixer.background_gain_db, -5.0);
    assert_eq!(config.mixer.margin_ms, 500);
    assert!(config.mixer.background.is_none());
    assert_eq!(config.llm.base_url, "http://localhost:11434");
    assert_eq!(config.llm.scenario_temperature, 0.2);
    assert_eq!(config.llm.reply_temperature, 0.8);
    assert!(config.voice.api_key.is_none());
    assert_eq!(config.voice.base_url, "https://api.elevenlabs.io");
    assert_eq!(config.voice.sample_rate, 22_050);
    assert_eq!(config.voice.ambience_seconds, 10.0);
    assert_eq!(config.voice.ambience_prompt_influence, 0.5);
    assert!(config.checkpoint.path.is_none());
}

#[test]
fn test_missing_file_and_bad_toml() {
    let missing = AppConfig::load(std::path::Path::new("/nonexistent/crisislink.toml"));
    assert!(matches!(missing, Err(CrisisError::ConfigNotFound(_))));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nmode = \"sometimes\"\n")
        .expect("write toml");
    let bad = AppConfig::load(tmp.path());
    assert!(matches!(bad, Err(CrisisError::Config(_))));
}

#[test]
fn test_example_config_loads() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("crisislink.toml.example");
    let config = AppConfig::load(&path).unwrap();
    let defaults = AppConfig::default();
    assert_eq!(config.engine.mode, PipelineMode::Interactive);
    assert_eq!(config.engine.max_audio_history, defaults.engine.max_audio_history);
    assert_eq!(config.mixer.margin_ms, defaults.mixer.margin_ms);
    assert!(config.mixer.background.is_none());
    assert_eq!(config.llm.model, defaults.llm.model);
    assert_eq!(config.voice.tts_model, defaults.voice.tts_model);
    assert_eq!(config.voice.ambience_seconds, defaults.voice.ambience_seconds);
    assert!(config.checkpoint.path.is_none());
}
