use std::fmt;
use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a caller can observe, grouped by category.
///
/// Configuration and validation errors are returned synchronously from
/// [`GenerationOrchestrator::generate`](crate::GenerationOrchestrator::generate).
/// Engine, resource and dependency errors raised on the worker arrive through the
/// task handle instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("A generation task is already in progress. Wait for it to finish before starting another.")]
    TaskInProgress,
    #[error("Task {task} was cancelled before it started")]
    Cancelled { task: u64 },
}

/// Coarse grouping of [`Error`] for callers that only need to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Resource,
    Validation,
    Dependency,
    Concurrency,
    Engine,
}

impl Error {
    /// The category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) => ErrorCategory::Configuration,
            Error::Resource(_) => ErrorCategory::Resource,
            Error::Validation(_) => ErrorCategory::Validation,
            Error::Dependency(_) => ErrorCategory::Dependency,
            Error::Engine(_) => ErrorCategory::Engine,
            Error::TaskInProgress | Error::Cancelled { .. } => ErrorCategory::Concurrency,
        }
    }
}

/// Bad input from the caller: ids, parameters, options, config files.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown engine: '{id}'. Available engines: {available:?}")]
    UnknownEngine { id: String, available: Vec<String> },
    #[error("Unknown parameter '{key}'")]
    UnknownParameter { key: String },
    #[error("Parameter '{key}' = {value} is outside the allowed range [{min}, {max}]")]
    ParameterOutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Parameter '{key}' = '{value}' is not one of {allowed:?}")]
    InvalidOption {
        key: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("Parameter '{key}' expects a {expected} value")]
    InvalidParameterType { key: String, expected: &'static str },
    #[error("Request targets engine '{requested}' but this orchestrator runs '{active}'")]
    EngineMismatch { requested: String, active: String },
    #[error("Missing required field '{0}'")]
    MissingField(String),
    #[error("Invalid config file {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },
    #[error("Playback speed must be a positive number, got {0}")]
    InvalidSpeed(f32),
}

/// Files and threads the library could not use.
#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("Speaker reference file not found: {}", .0.display())]
    MissingReference(PathBuf),
    #[error("I/O failure on {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid audio file {}: {message}", path.display())]
    InvalidAudio { path: PathBuf, message: String },
    #[error("Failed to start the synthesis worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl ResourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResourceError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// Text or language rejected before generation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Text cannot be empty")]
    EmptyText,
    #[error("{0}")]
    TextRejected(String),
    #[error("Language '{language}' is not supported. Supported: {supported:?}")]
    UnsupportedLanguage {
        language: String,
        supported: Vec<String>,
    },
}

/// A runtime or device the library relies on is missing or broken.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DependencyError {
    #[error("Inference runtime '{runtime}' is not available: {message}")]
    RuntimeUnavailable { runtime: String, message: String },
    #[error("Inference runtime '{runtime}' failed to load its model: {message}")]
    LoadFailed { runtime: String, message: String },
    #[error("Audio playback is not available: {0}")]
    PlaybackUnavailable(String),
}

/// Failures during generation itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Synthesis worker panicked: {0}")]
    Panicked(String),
    #[error("Synthesis worker stopped before delivering a result")]
    WorkerGone,
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        ConfigurationError::MissingField(e.field_name().to_string()).into()
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Concurrency => "concurrency",
            ErrorCategory::Engine => "engine",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_engine_message_lists_ids() {
        let err: Error = ConfigurationError::UnknownEngine {
            id: "nope".into(),
            available: vec!["a".into(), "b".into()],
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(
            err.to_string(),
            r#"Unknown engine: 'nope'. Available engines: ["a", "b"]"#
        );
    }

    #[test]
    fn concurrency_errors_share_a_category() {
        assert_eq!(Error::TaskInProgress.category(), ErrorCategory::Concurrency);
        assert_eq!(
            Error::Cancelled { task: 3 }.category(),
            ErrorCategory::Concurrency
        );
    }
}
