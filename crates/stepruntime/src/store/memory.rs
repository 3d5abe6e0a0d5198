use super::StateStore;
use async_trait::async_trait;
use stepcore::{RunId, RunState, StoreError};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps one serialized document per run in process memory.
///
/// Documents are stored as JSON text so reads hand back an independent
/// copy, the same way a remote key-value backend would.
#[derive(Default)]
pub struct InMemoryStateStore {
    documents: RwLock<HashMap<RunId, String>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_state(&self, run_id: &str, state: &RunState) -> Result<(), StoreError> {
        let document = serde_json::to_string(state)?;
        self.documents.write().await.insert(run_id.to_string(), document);
        Ok(())
    }

    async fn get_state(&self, run_id: &str) -> Result<Option<RunState>, StoreError> {
        let documents = self.documents.read().await;
        match documents.get(run_id) {
            Some(document) => {
                let state = serde_json::from_str(document)
                    .map_err(|_| StoreError::Corrupt(run_id.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids: Vec<RunId> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
