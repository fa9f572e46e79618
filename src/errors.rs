//! Typed error hierarchy for app-foundry.
//!
//! Four top-level enums cover the four subsystems:
//! - `SandboxError`: path containment and command execution failures
//! - `ProjectError`: registry lookups, input validation and event streaming
//! - `CollaboratorError`: AI generator failures (always recovered by fallback)
//! - `ToolError`: malformed calls into the sandboxed tool layer

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from the path and command sandboxes.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path '{path}' is not allowed: {reason}")]
    PathValidation { path: String, reason: String },

    #[error("Command '{command}' is not allowed")]
    CommandValidation { command: String },

    #[error("Command '{command}' timed out after {} seconds", timeout.as_secs_f64())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Command '{command}' was cancelled")]
    CommandCancelled { command: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub(crate) fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the project registry and event bus.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project '{id}' was not found")]
    NotFound { id: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProjectError {
    pub(crate) fn not_found(id: &str) -> Self {
        Self::NotFound { id: id.to_string() }
    }
}

/// Errors reported by the AI generation backend.
///
/// Both variants route the run to the fallback scaffolder; the distinction
/// only changes what gets logged.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("AI generator unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Errors from the sandboxed tool dispatcher.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_error_timeout_mentions_seconds() {
        let err = SandboxError::CommandTimeout {
            command: "pnpm".into(),
            timeout: Duration::from_secs(900),
        };
        assert_eq!(err.to_string(), "Command 'pnpm' timed out after 900 seconds");
    }

    #[test]
    fn sandbox_error_path_validation_carries_path() {
        let err = SandboxError::path("../etc/passwd", "escapes sandbox root");
        match &err {
            SandboxError::PathValidation { path, reason } => {
                assert_eq!(path, "../etc/passwd");
                assert_eq!(reason, "escapes sandbox root");
            }
            _ => panic!("Expected PathValidation"),
        }
    }

    #[test]
    fn project_error_converts_from_sandbox_error() {
        let inner = SandboxError::CommandValidation {
            command: "rm".into(),
        };
        let err: ProjectError = inner.into();
        assert!(matches!(
            err,
            ProjectError::Sandbox(SandboxError::CommandValidation { .. })
        ));
    }

    #[test]
    fn project_error_not_found_carries_id() {
        let err = ProjectError::not_found("abc123");
        assert!(matches!(&err, ProjectError::NotFound { id } if id == "abc123"));
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn collaborator_error_from_anyhow_is_failed() {
        let err: CollaboratorError = anyhow::anyhow!("model overloaded").into();
        assert!(matches!(err, CollaboratorError::Failed(_)));
        assert_eq!(err.to_string(), "model overloaded");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SandboxError::CommandCancelled {
            command: "x".into(),
        });
        assert_std_error(&ProjectError::Validation("x".into()));
        assert_std_error(&CollaboratorError::Unavailable("x".into()));
        assert_std_error(&ToolError::UnknownTool("x".into()));
    }
}
