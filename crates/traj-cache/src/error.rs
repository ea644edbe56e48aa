use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Opaque failure reported by a simulation engine.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("storage conflict: {} exists and cannot be used", .0.display())]
    StorageConflict(PathBuf),
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CacheError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        CacheError::Configuration(message.into())
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        CacheError::Format(message.into())
    }

    /// Stable machine-readable code, used by the CLI's JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Configuration(_) => "configuration_error",
            CacheError::Format(_) => "format_error",
            CacheError::StorageConflict(_) => "storage_conflict",
            CacheError::Engine(_) => "engine_error",
            CacheError::Io(_) => "io_error",
            CacheError::Json(_) => "json_error",
            CacheError::Yaml(_) => "yaml_error",
        }
    }
}
