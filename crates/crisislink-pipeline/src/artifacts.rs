use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::AudioStore;
use crisislink_core::types::AudioRef;

/// Audio artifacts as files under a root directory.
///
/// A key `<session>/<name>` maps to `<root>/<session>/<name>`.
pub struct FsAudioStore {
    root: PathBuf,
}

impl FsAudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key, refusing anything that would escape the root.
    pub fn path_for(&self, key: &AudioRef) -> Result<PathBuf> {
        let rel = Path::new(key.as_str());
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.as_str().is_empty() || !clean {
            return Err(CrisisError::Artifact(format!("invalid artifact key '{}'", key)));
        }
        Ok(self.root.join(rel))
    }
}

impl AudioStore for FsAudioStore {
    fn put(&self, key: AudioRef, bytes: Vec<u8>) -> BoxFuture<'_, Result<AudioRef>> {
        Box::pin(async move {
            let path = self.path_for(&key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CrisisError::Artifact(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
            tokio::fs::write(&path, &bytes).await.map_err(|e| {
                CrisisError::Artifact(format!("Failed to write {}: {}", path.display(), e))
            })?;
            debug!(key = %key, bytes = bytes.len(), "Stored audio artifact");
            Ok(key)
        })
    }

    fn get<'a>(&'a self, key: &'a AudioRef) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CrisisError::Artifact(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                ))),
            }
        })
    }
}
