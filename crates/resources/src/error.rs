use crate::task::TaskId;
use thiserror::Error;

/// Fatal loader errors. Transient "has to wait" outcomes are never errors,
/// and per-request failures are reported through `LoadResourceStatus`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Resource load type '{0}' is not supported")]
    LoadTypeUnsupported(u8),
    #[error("Consistency error: {0}")]
    Consistency(String),
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),
    #[error("Agent {0} not found")]
    AgentNotFound(usize),
    #[error("Failed to parse configuration: {0}")]
    Config(String),
}

/// Status handed to the failure callback of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadResourceStatus {
    NotExist,
    NotReady,
    DependencyError,
    TypeError,
    AssetError,
}

impl std::fmt::Display for LoadResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadResourceStatus::NotExist => write!(f, "NotExist"),
            LoadResourceStatus::NotReady => write!(f, "NotReady"),
            LoadResourceStatus::DependencyError => write!(f, "DependencyError"),
            LoadResourceStatus::TypeError => write!(f, "TypeError"),
            LoadResourceStatus::AssetError => write!(f, "AssetError"),
        }
    }
}

/// Stage reported alongside progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadProgress {
    ReadResource,
    LoadResource,
    LoadAsset,
    LoadScene,
}
