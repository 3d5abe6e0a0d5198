use crate::compile::CompiledWorkflow;
use crate::queue::RunQueue;
use crate::registry::NodeRegistry;
use crate::store::StateStore;
use chrono::Utc;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use stepcore::{
    EngineError, EventBus, NodeContext, NodeError, NodeId, NodeKind, NodeOutcome, Payload, RunEvent,
    RunState, RunStatus, WorkflowDefinition, WorkflowError,
};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single call to [`ExecutionEngine::execute_step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A node ran and the run was left in this status
    Executed(RunStatus),
    /// The run was absent or no longer RUNNING
    Skipped,
    /// Another worker holds this run; the entry was dropped
    Duplicate,
    /// The worker shut down mid-step; nothing was persisted
    Interrupted,
}

/// Advances runs one node at a time.
///
/// Owns the catalog of compiled workflows, the run queue, and a handle to
/// the state store. Each run records which workflow it belongs to, so
/// runs of different workflows can progress side by side.
pub struct ExecutionEngine {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn StateStore>,
    queue: Arc<RunQueue>,
    event_bus: Arc<EventBus>,
    workflows: RwLock<HashMap<String, Arc<CompiledWorkflow>>>,
    leases: RunLeases,
    cancellation: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self::with_event_bus(registry, store, Arc::new(EventBus::new(1000)))
    }

    pub fn with_event_bus(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn StateStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            queue: Arc::new(RunQueue::new()),
            event_bus,
            workflows: RwLock::new(HashMap::new()),
            leases: RunLeases::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<RunQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Token handed to every node; cancelled when the worker pool stops
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Compile a definition and store it under a generated `wf_xxxxxxxx` id
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> Result<String, WorkflowError> {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        let workflow_id = format!("wf_{}", &simple[..8]);
        self.register_workflow_as(workflow_id.clone(), definition).await?;
        Ok(workflow_id)
    }

    /// Compile a definition and store it under `workflow_id`.
    ///
    /// Ids are write-once: a run resolves its workflow on every step, so
    /// swapping the graph under a live run is refused.
    pub async fn register_workflow_as(
        &self,
        workflow_id: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> Result<Arc<CompiledWorkflow>, WorkflowError> {
        let workflow_id = workflow_id.into();
        let compiled = Arc::new(self.registry.compile(definition)?);

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow_id) {
            return Err(WorkflowError::Invalid(format!(
                "workflow id '{}' is already registered",
                workflow_id
            )));
        }
        workflows.insert(workflow_id.clone(), compiled.clone());

        info!(workflow_id = %workflow_id, name = %compiled.name(), "Registered workflow");
        Ok(compiled)
    }

    pub async fn workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Ids of every registered workflow, sorted
    pub async fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Begin a new run of `workflow_id`.
    ///
    /// Writes the initial document, moves it straight to RUNNING at the
    /// start node, and queues the run. Reusing a run id reinitializes it;
    /// a step of that run still in flight is waited out first so its save
    /// cannot land on top of the new document.
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        run_id: &str,
        initial_payload: Payload,
    ) -> Result<(), EngineError> {
        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        {
            let _lease = self.leases.acquire(run_id).await;
            let mut state = self
                .store
                .initialize_state(run_id, workflow_id, initial_payload)
                .await?;
            state.current_step = Some(workflow.start_at().to_string());
            state.status = RunStatus::Running;
            self.store.save_state(run_id, &state).await?;
        }

        self.event_bus.emit(RunEvent::RunStarted {
            run_id: run_id.to_string(),
            workflow_id: workflow_id.to_string(),
            timestamp: Utc::now(),
        });

        self.queue.enqueue(run_id)?;
        info!(run_id, workflow_id, "Workflow started, initial step queued");
        Ok(())
    }

    /// Read the current document of a run
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunState>, EngineError> {
        Ok(self.store.get_state(run_id).await?)
    }

    /// Take one step of `run_id` and re-queue it if it is still RUNNING.
    ///
    /// Node failures are recorded on the run, not returned; `Err` only
    /// comes from the state store or the queue.
    pub async fn execute_step(&self, run_id: &str) -> Result<StepResult, EngineError> {
        let result = {
            let Some(_lease) = self.leases.try_acquire(run_id) else {
                warn!(run_id, "Run already has a step in flight, dropping duplicate entry");
                return Ok(StepResult::Duplicate);
            };
            self.advance(run_id).await?
        };

        // the lease is released before re-queueing so the next step can claim it
        if result == StepResult::Executed(RunStatus::Running) {
            self.queue.enqueue(run_id)?;
        }
        Ok(result)
    }

    async fn advance(&self, run_id: &str) -> Result<StepResult, EngineError> {
        let state = match self.store.get_state(run_id).await? {
            Some(state) => state,
            None => {
                warn!(run_id, "Halting execution: run not found");
                return Ok(StepResult::Skipped);
            }
        };

        if state.status != RunStatus::Running {
            warn!(run_id, status = %state.status, "Halting execution: run is not RUNNING");
            return Ok(StepResult::Skipped);
        }

        let resolved = match state.current_step.clone() {
            None => Err(format!("Run {} is RUNNING without a current step", run_id)),
            Some(current) => match self.workflow(&state.workflow_id).await {
                None => Err(WorkflowError::NotFound(state.workflow_id.clone()).to_string()),
                Some(workflow) => Ok((current, workflow)),
            },
        };
        let (current, workflow) = match resolved {
            Ok(resolved) => resolved,
            Err(message) => return self.record_failure(state, None, message).await,
        };

        let Some(node) = workflow.node(&current).cloned() else {
            let message = WorkflowError::NodeNotFound(current.clone()).to_string();
            return self.record_failure(state, Some(current), message).await;
        };

        debug!(run_id, node = ?node, "Executing node");
        self.event_bus.emit(RunEvent::StepStarted {
            run_id: run_id.to_string(),
            node_id: current.clone(),
            node_kind: node.kind(),
            timestamp: Utc::now(),
        });

        let config = workflow
            .definition()
            .find_node(&current)
            .map(|spec| spec.config.clone())
            .unwrap_or_default();
        let ctx = NodeContext {
            run_id: run_id.to_string(),
            node_id: current.clone(),
            config,
            events: self.event_bus.create_emitter(run_id, &current),
            cancellation: self.cancellation.clone(),
        };

        let snapshot = state.clone();
        let started = Instant::now();
        let executed = AssertUnwindSafe(node.execute(ctx, state)).catch_unwind().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match executed {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(NodeError::Cancelled)) if self.cancellation.is_cancelled() => {
                warn!(run_id, node_id = %current, "Step interrupted by shutdown; run left RUNNING");
                return Ok(StepResult::Interrupted);
            }
            Ok(Err(e)) => return self.record_failure(snapshot, Some(current), e.to_string()).await,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                return self.record_failure(snapshot, Some(current), message).await;
            }
        };

        let state = transition(&workflow, node.kind(), &current, outcome);

        self.store.save_state(run_id, &state).await?;

        self.event_bus.emit(RunEvent::StepCompleted {
            run_id: run_id.to_string(),
            node_id: current.clone(),
            next_node: match state.status {
                RunStatus::Running => state.current_step.clone(),
                _ => None,
            },
            duration_ms,
            timestamp: Utc::now(),
        });

        if state.status.is_terminal() {
            self.finish(&state);
        } else {
            debug!(run_id, next = ?state.current_step, "Step complete");
        }

        Ok(StepResult::Executed(state.status))
    }

    /// Mark the run FAILED with `message`, persist it, and stop it there
    async fn record_failure(
        &self,
        mut state: RunState,
        node_id: Option<NodeId>,
        message: String,
    ) -> Result<StepResult, EngineError> {
        error!(run_id = %state.run_id, node_id = ?node_id, "Error executing step: {}", message);

        if let Some(node_id) = node_id {
            self.event_bus.emit(RunEvent::StepFailed {
                run_id: state.run_id.clone(),
                node_id,
                error: message.clone(),
                timestamp: Utc::now(),
            });
        }

        state.fail(message);
        self.store.save_state(&state.run_id, &state).await?;
        self.finish(&state);
        Ok(StepResult::Executed(RunStatus::Failed))
    }

    fn finish(&self, state: &RunState) {
        info!(
            run_id = %state.run_id,
            status = %state.status,
            steps = state.history.len(),
            "Run finished"
        );
        self.event_bus.emit(RunEvent::RunFinished {
            run_id: state.run_id.clone(),
            status: state.status,
            timestamp: Utc::now(),
        });
    }

    /// Pull run ids off the queue until it closes or the engine is cancelled
    pub async fn worker(&self, worker_id: usize) {
        info!(worker_id, "Worker started, waiting for tasks");

        loop {
            let run_id = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break,
                next = self.queue.dequeue() => match next {
                    Some(run_id) => run_id,
                    None => break,
                },
            };

            if let Err(e) = self.execute_step(&run_id).await {
                error!(worker_id, run_id = %run_id, "Step aborted: {}", e);
            }
            self.queue.task_done();
        }

        info!(worker_id, "Worker stopped");
    }
}

/// Apply a node's outcome to the run: pick the successor, or end the run
/// as STUCK when there is none and the node did not complete it.
///
/// Agents choose their own successor; every other kind follows the
/// definition. A chosen successor that is not part of the workflow fails
/// the run.
pub fn transition(workflow: &CompiledWorkflow, kind: NodeKind, current: &str, outcome: NodeOutcome) -> RunState {
    let (mut state, chosen) = outcome.into_parts();

    let next = match kind {
        NodeKind::Agent => chosen,
        _ => {
            if let Some(ignored) = chosen {
                debug!(node_id = current, ignored = %ignored, "Non-agent node returned a branch; using declared successor");
            }
            workflow.next_node_of(current).cloned()
        }
    };

    match next {
        Some(next) if !workflow.contains(&next) => {
            state.fail(WorkflowError::DanglingReference {
                from: current.to_string(),
                to: next,
            }
            .to_string());
        }
        Some(next) => state.current_step = Some(next),
        None => {
            if state.status != RunStatus::Completed {
                state.status = RunStatus::Stuck;
            }
        }
    }

    state
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Node panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Node panicked: {}", s)
    } else {
        "Node panicked".to_string()
    }
}

/// Run ids currently claimed by a step or a restart
#[derive(Default)]
struct RunLeases {
    held: Mutex<HashSet<String>>,
    released: Notify,
}

impl RunLeases {
    fn try_acquire(&self, run_id: &str) -> Option<RunLease<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(run_id.to_string()) {
            return None;
        }
        Some(RunLease {
            leases: self,
            run_id: run_id.to_string(),
        })
    }

    /// Wait until `run_id` is free, then claim it
    async fn acquire(&self, run_id: &str) -> RunLease<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(lease) = self.try_acquire(run_id) {
                return lease;
            }
            released.await;
        }
    }
}

/// Exclusive claim on a run id, released on drop
struct RunLease<'a> {
    leases: &'a RunLeases,
    run_id: String,
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        let mut held = self.leases.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.run_id);
        drop(held);
        self.leases.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stepcore::{Node, NodeSpec};

    struct Stub {
        id: String,
        kind: NodeKind,
    }

    #[async_trait]
    impl Node for Stub {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> NodeKind {
            self.kind
        }

        fn node_type(&self) -> &str {
            "Stub"
        }

        async fn execute(&self, _ctx: NodeContext, state: RunState) -> Result<NodeOutcome, NodeError> {
            Ok(NodeOutcome::Continue(state))
        }
    }

    fn compiled() -> CompiledWorkflow {
        let mut registry = NodeRegistry::new();
        for (name, kind) in [("Task", NodeKind::Task), ("Agent", NodeKind::Agent)] {
            registry.register_fn(name, kind, move |id, _| {
                Ok(Arc::new(Stub {
                    id: id.to_string(),
                    kind,
                }) as Arc<dyn stepcore::Node>)
            });
        }
        let def = WorkflowDefinition::new("t", "a")
            .with_node("a", NodeSpec::new("Task").with_next("b"))
            .with_node("b", NodeSpec::new("Task"))
            .with_node("route", NodeSpec::new("Agent"));
        registry.compile(def).unwrap()
    }

    fn running_at(step: &str) -> RunState {
        let mut state = RunState::pending("run", "wf", Payload::new());
        state.status = RunStatus::Running;
        state.current_step = Some(step.to_string());
        state
    }

    #[test]
    fn task_follows_declared_successor() {
        let wf = compiled();
        let state = transition(&wf, NodeKind::Task, "a", NodeOutcome::Continue(running_at("a")));
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.current_step.as_deref(), Some("b"));
    }

    #[test]
    fn task_branch_is_ignored() {
        let wf = compiled();
        let outcome = NodeOutcome::Branch(running_at("a"), "route".to_string());
        let state = transition(&wf, NodeKind::Task, "a", outcome);
        assert_eq!(state.current_step.as_deref(), Some("b"));
    }

    #[test]
    fn missing_successor_without_completion_is_stuck() {
        let wf = compiled();
        let state = transition(&wf, NodeKind::Task, "b", NodeOutcome::Continue(running_at("b")));
        assert_eq!(state.status, RunStatus::Stuck);
        assert_eq!(state.current_step.as_deref(), Some("b"));
        assert!(state.error.is_none());
    }

    #[test]
    fn completed_run_without_successor_stays_completed() {
        let wf = compiled();
        let mut done = running_at("b");
        done.complete();
        let state = transition(&wf, NodeKind::End, "b", NodeOutcome::Continue(done));
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[test]
    fn agent_uses_its_own_choice() {
        let wf = compiled();
        let outcome = NodeOutcome::Branch(running_at("route"), "b".to_string());
        let state = transition(&wf, NodeKind::Agent, "route", outcome);
        assert_eq!(state.current_step.as_deref(), Some("b"));
        assert_eq!(state.status, RunStatus::Running);
    }

    #[test]
    fn agent_without_choice_is_stuck() {
        let wf = compiled();
        let state = transition(&wf, NodeKind::Agent, "route", NodeOutcome::Continue(running_at("route")));
        assert_eq!(state.status, RunStatus::Stuck);
    }

    #[test]
    fn agent_choosing_unknown_node_fails() {
        let wf = compiled();
        let outcome = NodeOutcome::Branch(running_at("route"), "ghost".to_string());
        let state = transition(&wf, NodeKind::Agent, "route", outcome);
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.error.unwrap().contains("ghost"));
    }

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let leases = RunLeases::default();
        let lease = leases.try_acquire("run").unwrap();
        assert!(leases.try_acquire("run").is_none());
        assert!(leases.try_acquire("other").is_some());
        drop(lease);
        assert!(leases.try_acquire("run").is_some());
    }

    #[tokio::test]
    async fn waiting_acquire_resumes_when_lease_is_released() {
        let leases = Arc::new(RunLeases::default());
        let held = leases.try_acquire("run").unwrap();

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move {
                let _lease = leases.acquire("run").await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(leases.try_acquire("run").is_some());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "Node panicked: boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "Node panicked: bang");
    }
}
