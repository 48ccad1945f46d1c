use std::time::Duration;

use thiserror::Error;

/// A child process could not be started.
#[derive(Debug, Error)]
#[error("failed to spawn `{command}`: {source}")]
pub struct SpawnError {
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

impl SpawnError {
    pub fn new(command: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            command: command.into(),
            source,
        }
    }

    /// True when the binary itself is absent (or not executable), as opposed
    /// to a failure after the OS accepted the command.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.source.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
        )
    }
}

/// Errors produced while bringing the stack up.
#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("{component} did not become ready after {attempts} attempts ({elapsed:?})")]
    ReadinessTimeout {
        component: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("{component} skipped: `{tool}` not found on PATH")]
    DependencyMissing { component: String, tool: String },

    #[error("contract deployment failed: {0}")]
    Deploy(String),

    #[error("deployment record {path}: {message}")]
    Record { path: String, message: String },

    #[error("phase `{phase}` failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<StackError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StackError {
    /// Whether an optional step may swallow this error with a warning instead
    /// of failing its phase.
    pub fn is_skippable(&self) -> bool {
        match self {
            StackError::DependencyMissing { .. } => true,
            StackError::Spawn(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Name of the phase that failed, when this error came out of the runner.
    pub fn phase(&self) -> Option<&str> {
        match self {
            StackError::Phase { phase, .. } => Some(phase),
            _ => None,
        }
    }
}

/// Failures during teardown. These are reported and then dropped; they never
/// stop the rest of the teardown or change the exit code.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("terminating `{name}`: {message}")]
    Terminate { name: String, message: String },

    #[error("stop hook `{name}`: {message}")]
    Hook { name: String, message: String },
}
