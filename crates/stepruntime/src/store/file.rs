use super::StateStore;
use async_trait::async_trait;
use stepcore::{RunId, RunState, StoreError};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Stores each run as `<dir>/<run_id>.json`.
///
/// Writes go to a temporary file that is then renamed over the document,
/// so a reader never sees a half-written run. Every write has its own
/// temporary file; concurrent saves of one run never share one.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        tracing::info!("File state store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !run_id.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidRunId(run_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", run_id)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save_state(&self, run_id: &str, state: &RunState) -> Result<(), StoreError> {
        let path = self.document_path(run_id)?;
        let tmp = self
            .dir
            .join(format!("{}.{}.json.tmp", run_id, uuid::Uuid::new_v4().simple()));
        let document = serde_json::to_vec_pretty(state)?;

        fs::write(&tmp, document).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get_state(&self, run_id: &str) -> Result<Option<RunState>, StoreError> {
        let path = self.document_path(run_id)?;
        let document = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&document)
            .map(Some)
            .map_err(|_| StoreError::Corrupt(run_id.to_string()))
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
