//! JSON snapshots of per-document indexes.
//!
//! One file per document, named by the SHA-256 of its id. Writes go to a temporary file that is
//! renamed into place so readers never observe a partial snapshot.

use super::store::DocumentIndex;
use super::types::IndexError;
use crate::document::DocumentId;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub(crate) struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub(crate) async fn open(dir: PathBuf) -> Result<Self, IndexError> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|error| unavailable(&dir, "create snapshot directory", error))?;
        Ok(Self { dir })
    }

    fn path_for(&self, document_id: &DocumentId) -> PathBuf {
        let digest = Sha256::digest(document_id.as_str().as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    pub(crate) async fn save(&self, document: &DocumentIndex) -> Result<(), IndexError> {
        let path = self.path_for(&document.document_id);
        let bytes = serde_json::to_vec(document).map_err(|error| {
            IndexError::Unavailable(format!("failed to encode snapshot: {error}"))
        })?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|error| unavailable(&staging, "write snapshot", error))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|error| unavailable(&path, "publish snapshot", error))?;
        tracing::debug!(
            document_id = %document.document_id,
            path = %path.display(),
            "Persisted index snapshot"
        );
        Ok(())
    }

    pub(crate) async fn remove(&self, document_id: &DocumentId) -> Result<(), IndexError> {
        let path = self.path_for(document_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(unavailable(&path, "remove snapshot", error)),
        }
    }

    pub(crate) async fn load_all(&self) -> Result<Vec<DocumentIndex>, IndexError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|error| unavailable(&self.dir, "list snapshots", error))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| unavailable(&self.dir, "list snapshots", error))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|error| unavailable(&path, "read snapshot", error))?;
            let document: DocumentIndex = serde_json::from_slice(&bytes).map_err(|error| {
                IndexError::Unavailable(format!(
                    "corrupt snapshot {}: {error}",
                    path.display()
                ))
            })?;
            documents.push(document);
        }
        tracing::info!(
            dir = %self.dir.display(),
            documents = documents.len(),
            "Loaded index snapshots"
        );
        Ok(documents)
    }
}

fn unavailable(path: &Path, action: &str, error: std::io::Error) -> IndexError {
    IndexError::Unavailable(format!("failed to {action} at {}: {error}", path.display()))
}
