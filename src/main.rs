use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crisislink_audio::{mix, AudioTrack, MixParams};
use crisislink_core::config::{AppConfig, PipelineMode};
use crisislink_core::state::SessionState;
use crisislink_core::traits::{AmbienceGenerator, InputSource, ScenarioStore};
use crisislink_core::types::{Role, SessionId};

use crisislink_pipeline::{
    conversation_graph, import_background, CheckpointStore, Collaborators, FsAudioStore,
    PipelineEngine, PipelineSettings, SqliteCheckpointStore, SqliteScenarioStore, TurnOutcome,
    TurnReport,
};
use crisislink_services::{ElevenLabsClient, OllamaClient, StdinInput};

#[derive(Parser)]
#[command(name = "crisislink", version, about = "Emergency-call training simulator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "crisislink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a whole call, reading the dispatcher's lines from stdin
    Demo {
        /// Session ID (auto-generated if not provided)
        #[arg(short, long)]
        session: Option<String>,
        /// Reuse a saved scenario instead of generating one
        #[arg(long)]
        load_voice_id: Option<String>,
    },
    /// Start a call and stop after the victim's first line
    Start {
        #[arg(short, long)]
        session: String,
        /// Reuse a saved scenario instead of generating one
        #[arg(long)]
        load_voice_id: Option<String>,
    },
    /// Answer the victim and run the next turn
    Step {
        #[arg(short, long)]
        session: String,
        /// Dispatcher audio (WAV) to transcribe instead of text
        #[arg(long, conflicts_with = "text")]
        audio: Option<PathBuf>,
        /// What the dispatcher says
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Retry a call whose last turn failed
    Resume {
        #[arg(short, long)]
        session: String,
    },
    /// Print a session's committed checkpoint as JSON
    Inspect {
        #[arg(short, long)]
        session: String,
    },
    /// Lay a voice track over a background track
    Mix {
        #[arg(long)]
        foreground: PathBuf,
        #[arg(long)]
        background: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Background gain in dB (default from config)
        #[arg(long, allow_negative_numbers = true)]
        gain_db: Option<f32>,
        /// Background tail after the voice ends, in ms (default from config)
        #[arg(long)]
        margin_ms: Option<u32>,
    },
    /// List saved scenarios
    Scenarios,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crisislink=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "crisislink", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    match cli.command {
        Commands::Demo {
            session,
            load_voice_id,
        } => {
            let session_id = session.map(|s| SessionId::from_str(&s)).unwrap_or_default();
            run_demo(&config, &session_id, load_voice_id.as_deref()).await?;
        }
        Commands::Start {
            session,
            load_voice_id,
        } => {
            let app = App::build(&config, PipelineMode::Interactive).await?;
            let seed = app.seed(load_voice_id.as_deref()).await?;
            let report = app.engine.start(&SessionId::from_str(&session), seed).await?;
            app.print_report(&report);
        }
        Commands::Step {
            session,
            audio,
            text,
        } => {
            let app = App::build(&config, PipelineMode::Interactive).await?;
            let session_id = SessionId::from_str(&session);
            let report = match audio {
                Some(path) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    app.engine.step_audio(&session_id, bytes).await?
                }
                None => {
                    let line = text.join(" ");
                    if line.trim().is_empty() {
                        anyhow::bail!("nothing to say: pass the dispatcher's text or --audio");
                    }
                    app.engine.step(&session_id, &line).await?
                }
            };
            app.print_report(&report);
        }
        Commands::Resume { session } => {
            let app = App::build(&config, PipelineMode::Interactive).await?;
            let report = app.engine.resume(&SessionId::from_str(&session)).await?;
            app.print_report(&report);
        }
        Commands::Inspect { session } => {
            let store = SqliteCheckpointStore::open(&config.checkpoint_path())?;
            let checkpoint = store.load(&SessionId::from_str(&session))?;
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        }
        Commands::Mix {
            foreground,
            background,
            out,
            gain_db,
            margin_ms,
        } => {
            let params = MixParams {
                background_gain_db: gain_db.unwrap_or(config.mixer.background_gain_db),
                margin_ms: margin_ms.unwrap_or(config.mixer.margin_ms),
            };
            mix_files(&foreground, &background, &out, &params)?;
        }
        Commands::Scenarios => {
            let store = SqliteScenarioStore::open(&config.scenario_db_path())?;
            let records = store.list().await?;
            if records.is_empty() {
                println!("No saved scenarios.");
            }
            for record in records {
                println!(
                    "{}  {:<12} {}",
                    record.voice_reference, record.voice_name, record.voice_prompt
                );
            }
        }
        Commands::Config => {
            println!("Config file: {}", cli.config.display());
            println!("Data dir:    {}", data_dir.display());
            println!();
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Everything a conversation command needs.
struct App {
    engine: PipelineEngine,
    audio: Arc<FsAudioStore>,
    scenarios: Arc<SqliteScenarioStore>,
}

impl App {
    async fn build(config: &AppConfig, mode: PipelineMode) -> anyhow::Result<Self> {
        let ollama = Arc::new(OllamaClient::new(config.llm.clone()));
        let voice = Arc::new(ElevenLabsClient::new(config.voice.clone())?);
        let audio = Arc::new(FsAudioStore::new(config.artifact_dir()));
        let scenarios = Arc::new(SqliteScenarioStore::open(&config.scenario_db_path())?);
        let checkpoints = Arc::new(SqliteCheckpointStore::open(&config.checkpoint_path())?);

        let mut settings = PipelineSettings::from_config(config);
        settings.mode = mode;
        let ambience = match &config.mixer.background {
            Some(path) => {
                let key = import_background(audio.as_ref(), Path::new(path)).await?;
                settings = settings.with_background(key);
                None
            }
            None => {
                info!("No [mixer] background configured; generating ambience per session");
                Some(voice.clone() as Arc<dyn AmbienceGenerator>)
            }
        };

        let collaborators = Collaborators {
            scenario: ollama.clone(),
            reply: ollama,
            voice: voice.clone(),
            speech: voice.clone(),
            audio: audio.clone(),
            scenarios: Some(scenarios.clone() as Arc<dyn ScenarioStore>),
            input: match mode {
                PipelineMode::Autonomous => {
                    Some(Arc::new(StdinInput::new()) as Arc<dyn InputSource>)
                }
                PipelineMode::Interactive => None,
            },
            ambience,
        };
        let graph = conversation_graph(&collaborators, &settings)?;
        let engine = PipelineEngine::new(graph, checkpoints).with_transcriber(voice);

        Ok(Self {
            engine,
            audio,
            scenarios,
        })
    }

    /// Seed state from a saved scenario.
    async fn seed(&self, voice_id: Option<&str>) -> anyhow::Result<Option<SessionState>> {
        let Some(voice_id) = voice_id else {
            return Ok(None);
        };
        let record = self
            .scenarios
            .get(voice_id)
            .await?
            .with_context(|| format!("no saved scenario for voice '{}'", voice_id))?;
        info!(voice = %voice_id, voice_name = %record.voice_name, "Loaded saved scenario");
        Ok(Some(SessionState::seeded(&record)))
    }

    fn print_report(&self, report: &TurnReport) {
        if let Some(line) = report.state.last_from(Role::Victim) {
            if report.stages.is_empty() {
                println!("(no new line from the caller)");
            } else {
                println!("{}: {}", victim_name(&report.state), line);
            }
        }
        if let Some(audio) = &report.state.final_audio {
            match self.audio.path_for(audio) {
                Ok(path) => println!("  audio: {}", path.display()),
                Err(_) => println!("  audio: {}", audio),
            }
        }
        match report.outcome {
            TurnOutcome::Suspended => println!(
                "[turn {} of session {}; waiting for the dispatcher]",
                report.turn, report.session_id
            ),
            TurnOutcome::Completed => println!(
                "[call ended after {} turns, {} utterances]",
                report.turn,
                report.state.audio_history.len()
            ),
        }
    }
}

fn victim_name(state: &SessionState) -> &str {
    state
        .scenario
        .as_ref()
        .map(|s| s.voice_name.as_str())
        .unwrap_or("Caller")
}

/// A whole call in one process. Autonomous mode acquires dispatcher lines
/// in-graph; interactive mode steps the engine from this loop.
async fn run_demo(
    config: &AppConfig,
    session_id: &SessionId,
    load_voice_id: Option<&str>,
) -> anyhow::Result<()> {
    let mode = config.engine.mode;
    let app = App::build(config, mode).await?;
    let seed = app.seed(load_voice_id).await?;
    info!(session_id = %session_id, mode = ?mode, "Starting demo call");

    let mut report = app.engine.start(session_id, seed).await?;
    app.print_report(&report);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while report.outcome == TurnOutcome::Suspended {
        let Some(line) = lines.next_line().await? else {
            println!("[input closed; session {} left suspended]", session_id);
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        report = app.engine.step(session_id, line.trim()).await?;
        app.print_report(&report);
    }
    Ok(())
}

fn mix_files(
    foreground: &Path,
    background: &Path,
    out: &Path,
    params: &MixParams,
) -> anyhow::Result<()> {
    let read = |path: &Path| -> anyhow::Result<AudioTrack> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        AudioTrack::from_wav(&bytes).with_context(|| format!("decoding {}", path.display()))
    };
    let fg = read(foreground)?;
    let bg = read(background)?.resample(fg.sample_rate);

    let mixed = mix(&fg, &bg, params)?;
    std::fs::write(out, mixed.to_wav()?).with_context(|| format!("writing {}", out.display()))?;
    println!(
        "Wrote {} ({} ms at {} Hz)",
        out.display(),
        mixed.duration_ms(),
        mixed.sample_rate
    );
    Ok(())
}

/// `--config` if present, then `~/.crisislink/config.toml`, then defaults
/// filled from the environment.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home_config) = dirs_home().map(|h| h.join(".crisislink").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }
    eprintln!("Warning: No config file found. Using defaults; see crisislink.toml.example.");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.voice.api_key = std::env::var("ELEVENLABS_API_KEY").ok();
    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        config.llm.base_url = host;
    }
    if let Ok(model) = std::env::var("OLLAMA_MODEL") {
        config.llm.model = model;
    }
    config
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
