mod base;

pub use base::{EventBus, EventEmitter, NodeMessage, RunEvent};
