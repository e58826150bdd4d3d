//! File-based instruction backend: one versioned JSON snapshot.
//!
//! The whole record set is rewritten on every save. Writes go to a sibling
//! temp file first and are renamed into place, so a crash mid-write leaves
//! the previous snapshot intact.
//!
//! Storage location: `~/.qalam/instructions.json`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use qalam_core::error::StorageError;
use qalam_core::instruction::{InstructionBackend, InstructionRecord, InstructionSnapshot};
use tracing::debug;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default path: `~/.qalam/instructions.json`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".qalam").join("instructions.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "instructions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl InstructionBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Vec<InstructionRecord>, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            // Nothing saved yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let snapshot: InstructionSnapshot = serde_json::from_str(&content).map_err(|e| {
            StorageError::Corrupt(format!("{}: {e}", self.path.display()))
        })?;
        if snapshot.version != InstructionSnapshot::CURRENT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "{}: unsupported snapshot version {}",
                self.path.display(),
                snapshot.version
            )));
        }

        debug!(path = %self.path.display(), count = snapshot.records.len(), "Instruction snapshot loaded");
        Ok(snapshot.records)
    }

    async fn save(&self, records: &[InstructionRecord]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StorageError::Io(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
        }

        let snapshot = InstructionSnapshot::new(records.to_vec());
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StorageError::Io(format!("Failed to replace {}: {e}", self.path.display()))
        })?;

        debug!(path = %self.path.display(), count = records.len(), "Instruction snapshot saved");
        Ok(())
    }
}
