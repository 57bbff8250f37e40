use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::model::DocumentHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredDocument {
    pub filename: String,
    pub file_id: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&DocumentHandle> for RegisteredDocument {
    fn from(handle: &DocumentHandle) -> Self {
        Self {
            filename: handle.display_name.clone(),
            file_id: handle.id.clone(),
            uploaded_at: handle.upload_time,
        }
    }
}

/// On-disk record of uploaded documents and the remote ids built from them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub documents: Vec<RegisteredDocument>,
    #[serde(default)]
    pub vector_store_id: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            vector_store_id: None,
            assistant_id: None,
            created_at: Utc::now(),
        }
    }
}

impl RegistrySnapshot {
    /// Adds or refreshes the entry for `handle`. Returns `false` if it was already present.
    pub fn record_document(&mut self, handle: &DocumentHandle) -> bool {
        let entry = RegisteredDocument::from(handle);
        match self
            .documents
            .iter_mut()
            .find(|doc| doc.file_id == entry.file_id)
        {
            Some(existing) => {
                *existing = entry;
                false
            }
            None => {
                self.documents.push(entry);
                true
            }
        }
    }

    pub fn remove_document(&mut self, file_id: &str) -> Option<RegisteredDocument> {
        let position = self.documents.iter().position(|doc| doc.file_id == file_id)?;
        Some(self.documents.remove(position))
    }

    pub fn file_ids(&self) -> Vec<String> {
        self.documents.iter().map(|doc| doc.file_id.clone()).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("registry serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON file holding a [`RegistrySnapshot`].
///
/// The file is read whole and rewritten whole. Writes go to a temporary sibling
/// and are renamed into place. Concurrent writers are unsupported; the last one wins.
#[derive(Debug, Clone)]
pub struct LocalRegistryStore {
    path: PathBuf,
}

impl LocalRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing, unreadable or corrupt file yields an empty registry.
    pub fn load(&self) -> RegistrySnapshot {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return RegistrySnapshot::default();
            }
            Err(err) => {
                log::warn!(
                    "Could not read registry {}: {err}. Starting with no documents.",
                    self.path.display()
                );
                return RegistrySnapshot::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(
                    "Registry {} is corrupt ({err}). Starting with no documents.",
                    self.path.display()
                );
                RegistrySnapshot::default()
            }
        }
    }

    pub fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let content = serde_json::to_vec_pretty(snapshot)?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry.json".to_string());
        let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let write_tmp = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            Ok(())
        };
        if let Err(err) = write_tmp().and_then(|()| std::fs::rename(&tmp_path, &self.path)) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err(err));
        }

        log::debug!(
            "Saved registry {} ({} documents)",
            self.path.display(),
            snapshot.documents.len()
        );
        Ok(())
    }
}
