use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The trainee on the emergency line.
    Dispatcher,
    /// The simulated caller.
    Victim,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Dispatcher => write!(f, "dispatcher"),
            Role::Victim => write!(f, "victim"),
        }
    }
}

/// A single transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn dispatcher(content: impl Into<String>) -> Self {
        Self {
            role: Role::Dispatcher,
            content: content.into(),
        }
    }

    pub fn victim(content: impl Into<String>) -> Self {
        Self {
            role: Role::Victim,
            content: content.into(),
        }
    }
}

/// The emergency-call persona driving a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    /// Caller's first name, also used as the provisioned voice name.
    pub voice_name: String,
    /// Timbre description handed to voice design (no emotions).
    pub voice_prompt: String,
    /// System prompt telling the reply generator how the caller behaves.
    pub persona_text: String,
    /// A line the caller might say; voice design speaks it to shape the voice.
    #[serde(default)]
    pub sample_dialogue: String,
    /// What the caller's surroundings sound like, for generated ambience.
    #[serde(default)]
    pub sound_prompt: String,
}

/// Handle to a provisioned synthesis voice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceDefinition {
    pub voice_reference: String,
}

impl VoiceDefinition {
    pub fn new(voice_reference: impl Into<String>) -> Self {
        Self {
            voice_reference: voice_reference.into(),
        }
    }
}

/// Key of an audio artifact in a content store.
///
/// Keys produced by the pipeline are always prefixed with the owning session
/// id, so two sessions never address the same artifact.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(pub String);

impl AudioRef {
    /// Build a session-scoped artifact key: `<session>/<name>`.
    pub fn scoped(session: &SessionId, name: &str) -> Self {
        Self(format!("{}/{}", session.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AudioRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reusable scenario/voice pair, persisted across sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioRecord {
    pub voice_reference: String,
    pub voice_name: String,
    pub voice_prompt: String,
    pub persona_text: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ScenarioRecord {
    pub fn new(scenario: &Scenario, voice: &VoiceDefinition) -> Self {
        Self {
            voice_reference: voice.voice_reference.clone(),
            voice_name: scenario.voice_name.clone(),
            voice_prompt: scenario.voice_prompt.clone(),
            persona_text: scenario.persona_text.clone(),
            description: None,
        }
    }

    /// The scenario half of the record. The sample dialogue is not stored;
    /// it only matters for voice design, which a stored record already went through.
    pub fn scenario(&self) -> Scenario {
        Scenario {
            voice_name: self.voice_name.clone(),
            voice_prompt: self.voice_prompt.clone(),
            persona_text: self.persona_text.clone(),
            sample_dialogue: String::new(),
            sound_prompt: String::new(),
        }
    }

    pub fn voice(&self) -> VoiceDefinition {
        VoiceDefinition::new(self.voice_reference.clone())
    }
}
