use crate::executor::ExecutionEngine;
use crate::registry::NodeRegistry;
use crate::store::{FileStateStore, InMemoryStateStore, StateStore};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use stepcore::{EngineError, EventBus, Payload, RunEvent, RunState};
use tokio::task::JoinHandle;

/// Worker pool driving an [`ExecutionEngine`]
pub struct StepRuntime {
    engine: Arc<ExecutionEngine>,
    workers: Vec<JoinHandle<()>>,
}

impl StepRuntime {
    /// Build the store and engine described by `config`, then start workers
    pub async fn from_config(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Result<Self, EngineError> {
        let store: Arc<dyn StateStore> = match &config.state_dir {
            Some(dir) => Arc::new(FileStateStore::open(dir.clone()).await?),
            None => Arc::new(InMemoryStateStore::new()),
        };
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let engine = Arc::new(ExecutionEngine::with_event_bus(registry, store, event_bus));

        Ok(Self::start(engine, config.workers))
    }

    /// Spawn `workers` worker loops (at least one) against `engine`
    pub fn start(engine: Arc<ExecutionEngine>, workers: usize) -> Self {
        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.worker(worker_id).await })
            })
            .collect::<Vec<_>>();

        tracing::info!("Started {} worker(s)", workers.len());
        Self { engine, workers }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Subscribe to run events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.engine.event_bus().subscribe()
    }

    /// Wait until every queued step has been executed
    pub async fn wait_idle(&self) {
        self.engine.queue().join().await
    }

    /// Start a run and wait for the queue to drain, then return its final state
    pub async fn run_to_completion(
        &self,
        workflow_id: &str,
        run_id: &str,
        payload: Payload,
    ) -> Result<Option<RunState>, EngineError> {
        self.engine.start_workflow(workflow_id, run_id, payload).await?;
        self.wait_idle().await;
        self.engine.get_run(run_id).await
    }

    /// Stop every worker. Steps already running see their cancellation
    /// token fire; queued entries are abandoned.
    pub async fn shutdown(self) {
        self.engine.cancellation().cancel();
        self.engine.queue().close();

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }
        tracing::info!("All workers stopped");
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub event_buffer_size: usize,
    /// Persist runs as JSON files here; in-memory when unset
    pub state_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            event_buffer_size: 1000,
            state_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Read `STEPFLOW_WORKERS`, `STEPFLOW_EVENT_BUFFER` and `STEPFLOW_STATE_DIR`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let number = |key: &str, default: usize| match lookup(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
                    default
                }
            },
        };

        Self {
            workers: number("STEPFLOW_WORKERS", defaults.workers),
            event_buffer_size: number("STEPFLOW_EVENT_BUFFER", defaults.event_buffer_size),
            state_dir: lookup("STEPFLOW_STATE_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}
