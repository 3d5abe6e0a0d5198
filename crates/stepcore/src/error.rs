use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Run queue closed")]
    QueueClosed,
}

/// Failure raised by a node while executing a step.
///
/// The `Display` text is what ends up in `RunState::error` once the
/// engine marks the run FAILED.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing payload field: {0}")]
    MissingPayload(String),

    #[error("Invalid payload type for '{field}': expected {expected}, got {actual}")]
    InvalidPayloadType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Configuration defects, detected before any run is enqueued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Dangling reference from '{from}' to '{to}'")]
    DanglingReference { from: String, to: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt state document for run {0}")]
    Corrupt(String),

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),
}
