use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::state::SessionState;
use crisislink_core::types::SessionId;

use crate::graph::StageId;

/// Where a session stands between engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "stage", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Never run.
    New,
    /// Waiting for dispatcher input; the edge out of `stage` runs on resume.
    Suspended(StageId),
    /// The last turn failed while running `stage`.
    Failed(StageId),
    /// A routing function produced an undeclared target after `stage`.
    Halted(StageId),
    /// Reached the terminal marker.
    Completed,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::New => "new",
            SessionStatus::Suspended(_) => "suspended",
            SessionStatus::Failed(_) => "failed",
            SessionStatus::Halted(_) => "halted",
            SessionStatus::Completed => "completed",
        }
    }
}

/// The persisted unit: a session's full state plus where to pick up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: SessionId,
    pub state: SessionState,
    pub status: SessionStatus,
    /// Turns started so far.
    pub turn: usize,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A fresh, never-run session.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: SessionState::default(),
            status: SessionStatus::New,
            turn: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Durable per-session state.
///
/// `commit` replaces the whole checkpoint atomically; there is no partial
/// write and no cross-session transaction.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Load a session, or a fresh [`SessionStatus::New`] checkpoint if unknown.
    fn load(&self, session_id: &SessionId) -> Result<Checkpoint>;

    fn commit(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Checkpoint store backed by SQLite, one row per session.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
         session_id TEXT PRIMARY KEY,
         status TEXT NOT NULL,
         turn INTEGER NOT NULL,
         blob TEXT NOT NULL,
         updated_at TEXT NOT NULL
     );";

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CrisisError::Checkpoint(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| CrisisError::Checkpoint(format!("Failed to open checkpoint store: {}", e)))?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             {}",
            SCHEMA
        ))
        .map_err(|e| {
            CrisisError::Checkpoint(format!("Failed to initialize checkpoint schema: {}", e))
        })?;

        debug!(path = %path.display(), "Checkpoint store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CrisisError::Checkpoint(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CrisisError::Checkpoint(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, session_id: &SessionId) -> Result<Checkpoint> {
        let conn = self.conn.lock().map_err(|e| CrisisError::Checkpoint(e.to_string()))?;
        let blob: Option<String> = conn
            .query_row(
                "SELECT blob FROM checkpoints WHERE session_id = ?1",
                params![session_id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CrisisError::Checkpoint(format!("Failed to load checkpoint: {}", e)))?;

        match blob {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                CrisisError::Checkpoint(format!("Corrupt checkpoint for {}: {}", session_id, e))
            }),
            None => Ok(Checkpoint::new(session_id.clone())),
        }
    }

    fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let blob = serde_json::to_string(checkpoint)
            .map_err(|e| CrisisError::Checkpoint(format!("Failed to serialize checkpoint: {}", e)))?;

        let conn = self.conn.lock().map_err(|e| CrisisError::Checkpoint(e.to_string()))?;
        conn.execute(
            "INSERT INTO checkpoints (session_id, status, turn, blob, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                 status = excluded.status,
                 turn = excluded.turn,
                 blob = excluded.blob,
                 updated_at = excluded.updated_at",
            params![
                checkpoint.session_id.0,
                checkpoint.status.label(),
                checkpoint.turn as i64,
                blob,
                checkpoint.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CrisisError::Checkpoint(format!("Failed to save checkpoint: {}", e)))?;

        Ok(())
    }
}

/// Process-local checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<HashMap<SessionId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, session_id: &SessionId) -> Result<Checkpoint> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|e| CrisisError::Checkpoint(e.to_string()))?;
        Ok(sessions
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Checkpoint::new(session_id.clone())))
    }

    fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| CrisisError::Checkpoint(e.to_string()))?;
        sessions.insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }
}

/// Memory store whose commits fail for matching statuses.
#[cfg(test)]
pub(crate) struct FailingCheckpointStore {
    inner: MemoryCheckpointStore,
    fails: fn(&SessionStatus) -> bool,
}

#[cfg(test)]
impl FailingCheckpointStore {
    pub(crate) fn new(fails: fn(&SessionStatus) -> bool) -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            fails,
        }
    }
}

#[cfg(test)]
impl CheckpointStore for FailingCheckpointStore {
    fn load(&self, session_id: &SessionId) -> Result<Checkpoint> {
        self.inner.load(session_id)
    }

    fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        if (self.fails)(&checkpoint.status) {
            return Err(CrisisError::Checkpoint(format!(
                "disk full writing {}",
                checkpoint.session_id
            )));
        }
        self.inner.commit(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisislink_core::types::{AudioRef, Message, Scenario, VoiceDefinition};

    fn temp_store() -> SqliteCheckpointStore {
        let dir = std::env::temp_dir()
            .join(format!("crisislink_checkpoint_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        SqliteCheckpointStore::open(&dir.join("checkpoints.db")).unwrap()
    }

    fn populated(session: &str) -> Checkpoint {
        let mut cp = Checkpoint::new(SessionId::from_str(session));
        cp.state = SessionState {
            scenario: Some(Scenario {
                voice_name: "Maria".into(),
                voice_prompt: "middle-aged woman, Spanish accent".into(),
                persona_text: "You are Maria. Your kitchen is on fire.".into(),
                sample_dialogue: "I just got home from work.".into(),
                sound_prompt: "smoke alarm beeping in a small kitchen".into(),
            }),
            voice_definition: Some(VoiceDefinition::new("v-42")),
            current_text: Some("The smoke is everywhere!".into()),
            audio_history: vec![AudioRef(format!("{}/utterance-0001.wav", session))],
            final_audio: Some(AudioRef(format!("{}/mix-0001.wav", session))),
            messages: vec![Message::victim("The smoke is everywhere!")],
        };
        cp.status = SessionStatus::Suspended(StageId::AudioPostprocess);
        cp.turn = 1;
        cp
    }

    #[test]
    fn test_load_unknown_session_is_fresh() {
        let store = temp_store();
        let cp = store.load(&SessionId::from_str("nonexistent")).unwrap();
        assert_eq!(cp.status, SessionStatus::New);
        assert_eq!(cp.state, SessionState::default());
        assert_eq!(cp.turn, 0);
    }

    #[test]
    fn test_commit_and_load_roundtrip_exactly() {
        let store = temp_store();
        let cp = populated("sess-1");
        store.commit(&cp).unwrap();

        let loaded = store.load(&SessionId::from_str("sess-1")).unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn test_commit_replaces_whole_checkpoint() {
        let store = temp_store();
        let mut cp = populated("sess-1");
        store.commit(&cp).unwrap();

        cp.state.messages.push(Message::dispatcher("I need to hang up now"));
        cp.status = SessionStatus::Completed;
        cp.turn = 2;
        store.commit(&cp).unwrap();

        let loaded = store.load(&SessionId::from_str("sess-1")).unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.state.messages.len(), 2);
        assert_eq!(loaded.turn, 2);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = temp_store();
        store.commit(&populated("a")).unwrap();

        let b = store.load(&SessionId::from_str("b")).unwrap();
        assert_eq!(b.status, SessionStatus::New);
        assert!(b.state.audio_history.is_empty());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        let cp = populated("mem");
        store.commit(&cp).unwrap();
        assert_eq!(store.load(&SessionId::from_str("mem")).unwrap(), cp);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::Failed(StageId::SpeechSynthesize)).unwrap();
        assert_eq!(json, r#"{"status":"failed","stage":"speech_synthesize"}"#);
    }
}
