//! Persistence boundary for run state.
//!
//! Each run is one JSON document keyed by run id. Callers read the whole
//! document, change it, and write the whole document back.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;

use async_trait::async_trait;
use stepcore::{Payload, RunId, RunState, StoreError};

/// Trait for run state persistence.
///
/// Implementations must keep runs independent of each other; no
/// cross-run transactions are required.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create and persist the PENDING document for a run, returning it.
    ///
    /// An existing document for `run_id` is overwritten.
    async fn initialize_state(
        &self,
        run_id: &str,
        workflow_id: &str,
        payload: Payload,
    ) -> Result<RunState, StoreError> {
        let state = RunState::pending(run_id, workflow_id, payload);
        self.save_state(run_id, &state).await?;
        Ok(state)
    }

    /// Overwrite the full document for `run_id`
    async fn save_state(&self, run_id: &str, state: &RunState) -> Result<(), StoreError>;

    /// Full-document read; `None` when the run is unknown
    async fn get_state(&self, run_id: &str) -> Result<Option<RunState>, StoreError>;

    /// Ids of every stored run
    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError>;
}
