use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::ScenarioStore;
use crisislink_core::types::ScenarioRecord;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS scenarios (
         voice_reference TEXT PRIMARY KEY,
         voice_name TEXT NOT NULL,
         voice_prompt TEXT NOT NULL,
         persona_text TEXT NOT NULL,
         description TEXT,
         saved_at TEXT NOT NULL
     );";

/// Saved scenario/voice pairs, keyed by voice reference.
pub struct SqliteScenarioStore {
    conn: Mutex<Connection>,
}

impl SqliteScenarioStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CrisisError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| CrisisError::Database(e.to_string()))?;
        conn.execute_batch(&format!("PRAGMA journal_mode=WAL; {}", SCHEMA))
            .map_err(|e| CrisisError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Scenario store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CrisisError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CrisisError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn save_sync(&self, record: &ScenarioRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| CrisisError::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO scenarios (voice_reference, voice_name, voice_prompt, persona_text, description, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(voice_reference) DO UPDATE SET
                 voice_name = excluded.voice_name,
                 voice_prompt = excluded.voice_prompt,
                 persona_text = excluded.persona_text,
                 description = excluded.description,
                 saved_at = excluded.saved_at",
            params![
                record.voice_reference,
                record.voice_name,
                record.voice_prompt,
                record.persona_text,
                record.description,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| CrisisError::Database(format!("Failed to save scenario: {}", e)))?;
        Ok(())
    }

    fn get_sync(&self, voice_reference: &str) -> Result<Option<ScenarioRecord>> {
        let conn = self.conn.lock().map_err(|e| CrisisError::Database(e.to_string()))?;
        conn.query_row(
            "SELECT voice_reference, voice_name, voice_prompt, persona_text, description
             FROM scenarios WHERE voice_reference = ?1",
            params![voice_reference],
            row_to_record,
        )
        .optional()
        .map_err(|e| CrisisError::Database(e.to_string()))
    }

    fn list_sync(&self) -> Result<Vec<ScenarioRecord>> {
        let conn = self.conn.lock().map_err(|e| CrisisError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT voice_reference, voice_name, voice_prompt, persona_text, description
                 FROM scenarios ORDER BY saved_at DESC, voice_reference",
            )
            .map_err(|e| CrisisError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| CrisisError::Database(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CrisisError::Database(e.to_string()))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScenarioRecord> {
    Ok(ScenarioRecord {
        voice_reference: row.get(0)?,
        voice_name: row.get(1)?,
        voice_prompt: row.get(2)?,
        persona_text: row.get(3)?,
        description: row.get(4)?,
    })
}

impl ScenarioStore for SqliteScenarioStore {
    fn save(&self, record: ScenarioRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.save_sync(&record) })
    }

    fn get<'a>(
        &'a self,
        voice_reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<ScenarioRecord>>> {
        Box::pin(async move { self.get_sync(voice_reference) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<ScenarioRecord>>> {
        Box::pin(async move { self.list_sync() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(voice: &str, name: &str) -> ScenarioRecord {
        ScenarioRecord {
            voice_reference: voice.into(),
            voice_name: name.into(),
            voice_prompt: "young male, anxious".into(),
            persona_text: format!("You are {}.", name),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = SqliteScenarioStore::in_memory().unwrap();
        store.save(record("v-1", "Tom")).await.unwrap();

        let got = store.get("v-1").await.unwrap().unwrap();
        assert_eq!(got, record("v-1", "Tom"));
        assert!(store.get("v-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_upserts_by_voice() {
        let store = SqliteScenarioStore::in_memory().unwrap();
        store.save(record("v-1", "Tom")).await.unwrap();
        let mut updated = record("v-1", "Tommy");
        updated.description = Some("car crash on the M8".into());
        store.save(updated.clone()).await.unwrap();

        assert_eq!(store.get("v-1").await.unwrap(), Some(updated));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scenarios.db");
        {
            let store = SqliteScenarioStore::open(&path).unwrap();
            store.save(record("v-9", "Ada")).await.unwrap();
        }
        let reopened = SqliteScenarioStore::open(&path).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
