// src/error.rs

use thiserror::Error;

/// Core error types for Strata
///
/// Every orchestration failure is classified here before it is raised, so
/// callers can branch on the variant instead of inspecting message text.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad spec syntax, conflicting flags, non-numeric revision
    #[error("{0}")]
    InvalidArgument(String),

    /// Target or source environment does not exist
    #[error("{0}")]
    EnvironmentNotFound(String),

    /// Environment cannot be created under the requested prefix
    #[error("{0}")]
    EnvironmentAlreadyExists(String),

    /// One or more requested (or transitively required) names have no candidate
    #[error("{message}")]
    MissingPackages { names: Vec<String>, message: String },

    /// No combination of candidates satisfies the constraints
    #[error("{0}")]
    Unsatisfiable(String),

    /// An optional collaborator needed for this request is unavailable
    #[error("{capability} is not available: {remedy}")]
    MissingOptionalCapability { capability: String, remedy: String },

    /// Another process holds the environment lock
    #[error(
        "LOCKERROR: another process is already operating on this environment.\n\
         The lock {0} was found. Wait for it to finish before continuing.\n\
         If you are sure nothing else is running, remove it and try again."
    )]
    AlreadyLocked(String),

    /// The instruction interpreter failed while executing a plan
    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    /// Operating system failure outside the tolerated history case
    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Environment state contradicts itself
    #[error("Internal consistency error: {0}")]
    Internal(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Package archive could not be read
    #[error("Archive error: {0}")]
    Archive(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Package metadata (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build an `Os` error with a description of what was being attempted
    pub fn os(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Os {
            context: context.into(),
            source,
        }
    }

    /// Stable tag reported as `error_type` in structured output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::EnvironmentNotFound(_) => "EnvironmentNotFound",
            Error::EnvironmentAlreadyExists(_) => "EnvironmentAlreadyExists",
            Error::MissingPackages { .. } => "MissingPackages",
            Error::Unsatisfiable(_) => "Unsatisfiable",
            Error::MissingOptionalCapability { .. } => "MissingOptionalCapability",
            Error::AlreadyLocked(_) => "AlreadyLocked",
            Error::ExecutionFailure(_) => "ExecutionFailure",
            Error::Os { .. } => "OSFailure",
            Error::Internal(_) => "InternalError",
            Error::Config(_) => "ConfigError",
            Error::Archive(_) => "ArchiveError",
            Error::Io(_) => "OSFailure",
            Error::Json(_) => "JSONError",
        }
    }
}

/// Result type alias using Strata's Error type
pub type Result<T> = std::result::Result<T, Error>;
