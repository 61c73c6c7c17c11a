use thiserror::Error;

use crate::state::StateUpdate;
use crate::types::SessionId;

#[derive(Debug, Error)]
pub enum CrisisError {
    // Collaborator errors
    #[error("{service} call failed: {message}")]
    Collaborator { service: String, message: String },

    #[error("{service} returned malformed output: {message}")]
    MalformedOutput { service: String, message: String },

    // Pipeline errors
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<CrisisError>,
    },

    /// A stage failed after producing output that must still be merged.
    #[error("{source}")]
    Incomplete {
        update: Box<StateUpdate>,
        source: Box<CrisisError>,
    },

    #[error("Invalid route from {from}: {to} is not a declared target")]
    InvalidRoute { from: String, to: String },

    #[error("{stage} needs {what}, but the session has none")]
    MissingInput { stage: String, what: String },

    #[error("Mixer input missing: {0}")]
    MixerInputMissing(String),

    #[error("Audio processing failed: {0}")]
    Audio(String),

    #[error("Session {session}: {message}")]
    SessionState { session: SessionId, message: String },

    // Storage errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Artifact store error: {0}")]
    Artifact(String),

    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrisisError {
    /// Shorthand for a failed collaborator call.
    pub fn collaborator(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a collaborator that answered with something unusable.
    pub fn malformed(service: impl Into<String>, message: impl ToString) -> Self {
        Self::MalformedOutput {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Fail with `source`, keeping `update` for the session.
    pub fn incomplete(update: StateUpdate, source: CrisisError) -> Self {
        Self::Incomplete {
            update: Box::new(update),
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping stage wrappers.
    pub fn root_cause(&self) -> &CrisisError {
        match self {
            Self::Stage { source, .. } | Self::Incomplete { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrisisError>;
