//! Error types for Strata
//!
//! All modules use `StrataResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors that can occur in Strata
#[derive(Error, Debug)]
pub enum StrataError {
    // Process errors
    #[error("Command failed with exit code {code}: {command}")]
    CommandFailure {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to launch command: {command}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Cache / backend errors
    #[error("Layer cache {operation} failed: {reason}")]
    CacheBackend { operation: String, reason: String },

    #[error("{backend} is not reachable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Failed to acquire {resource}: {reason}")]
    ResourceAcquisition { resource: String, reason: String },

    #[error("{backend} must run with elevated privileges")]
    PrivilegeEscalationRequired { backend: String, program: String, args: Vec<String> },

    // Pipeline errors
    #[error("{action}: {reason}")]
    ActionLogic { action: String, reason: String },

    #[error("{target}: step {index} ({step}) failed: {source}")]
    StepFailed {
        target: String,
        step: String,
        index: usize,
        #[source]
        source: Box<StrataError>,
    },

    #[error("{failed} of {total} parallel branches failed")]
    ParallelFailed { failed: usize, total: usize },

    // Buildfile errors
    #[error("Invalid buildfile {path}: {reason}")]
    BuildfileInvalid { path: PathBuf, reason: String },

    #[error("No strata.toml found in {0} or any parent directory")]
    BuildfileNotFound(PathBuf),

    #[error("Unknown build: {0}")]
    UnknownBuild(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StrataError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command spawn error
    pub fn command_spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandSpawn {
            command: command.into(),
            source,
        }
    }

    /// Create a fatal cache backend error
    pub fn cache_backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheBackend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a resource acquisition error
    pub fn acquisition(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceAcquisition {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create an action logic error
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActionLogic {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error (or the step error it wraps) is a command exiting nonzero.
    ///
    /// Such errors carry the command's captured output.
    pub fn is_command_failure(&self) -> bool {
        match self {
            Self::CommandFailure { .. } => true,
            Self::StepFailed { source, .. } => source.is_command_failure(),
            _ => false,
        }
    }

    /// Innermost error of a chain of step failures
    pub fn root_cause(&self) -> &StrataError {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Process exit status the CLI reports for this error
    pub fn exit_code(&self) -> u8 {
        match self.root_cause() {
            Self::CommandFailure { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(1),
            Self::User(_) => 2,
            _ => 1,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.root_cause() {
            Self::BackendUnavailable { .. } => Some("Install buildah or use --dry-run"),
            Self::PrivilegeEscalationRequired { .. } => Some("Run under: buildah unshare"),
            Self::BuildfileNotFound(_) => Some("Create a strata.toml or pass --file"),
            Self::CacheBackend { .. } => Some("Check `buildah images` works, then retry"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_failure() -> StrataError {
        StrataError::CommandFailure {
            command: "sh -euc false".to_string(),
            code: 1,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn error_display() {
        let err = command_failure();
        assert_eq!(
            err.to_string(),
            "Command failed with exit code 1: sh -euc false"
        );
    }

    #[test]
    fn step_failure_names_the_action() {
        let err = StrataError::StepFailed {
            target: "app".to_string(),
            step: "Run(false)".to_string(),
            index: 2,
            source: Box::new(command_failure()),
        };
        let msg = err.to_string();
        assert!(msg.contains("app"));
        assert!(msg.contains("step 2"));
        assert!(msg.contains("Run(false)"));
        assert!(err.is_command_failure());
    }

    #[test]
    fn root_cause_unwraps_nested_steps() {
        let err = StrataError::StepFailed {
            target: "outer".to_string(),
            step: "Build(app)".to_string(),
            index: 0,
            source: Box::new(StrataError::StepFailed {
                target: "app".to_string(),
                step: "Run(x)".to_string(),
                index: 1,
                source: Box::new(StrataError::cache_backend("listing", "boom")),
            }),
        };
        assert!(matches!(err.root_cause(), StrataError::CacheBackend { .. }));
        assert_eq!(err.hint(), Some("Check `buildah images` works, then retry"));
    }

    #[test]
    fn unavailable_backend_is_not_a_command_failure() {
        let err = StrataError::BackendUnavailable {
            backend: "buildah".to_string(),
            reason: "not installed".to_string(),
        };
        assert!(!err.is_command_failure());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.hint(), Some("Install buildah or use --dry-run"));
    }

    #[test]
    fn exit_code_follows_failed_command() {
        let err = StrataError::StepFailed {
            target: "app".to_string(),
            step: "Run(x)".to_string(),
            index: 0,
            source: Box::new(StrataError::CommandFailure {
                command: "sh -euc x".to_string(),
                code: 3,
                stdout: String::new(),
                stderr: String::new(),
            }),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(StrataError::ParallelFailed { failed: 1, total: 2 }.exit_code(), 1);
    }
}
