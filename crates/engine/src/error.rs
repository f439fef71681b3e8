//! Error types for the wizard engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the wizard and the run orchestrator.
///
/// Discovery failures are deliberately absent: a failed background scan
/// leaves the step's cached data partial and its finished flag unset, so the
/// scan is retried on the next visit. Back navigation and cancellation are
/// control flow ([`pcapsift_types::PickOutcome`]), not errors.
#[derive(Debug, Error)]
pub enum WizardError {
    /// The step configuration is empty. Fatal, raised before the state
    /// machine starts.
    #[error("no filter steps configured; check the filterSteps configuration")]
    NoStepsConfigured,

    /// Output path equals the input path. Recoverable; the caller should
    /// prompt for a different destination and retry.
    #[error("cannot filter {path:?} into itself; choose a different destination")]
    SameFile { path: PathBuf },

    /// The filtering process exited non-zero and was not cancelled.
    #[error("filtering process failed with exit code {code}")]
    RunFailure { code: i32 },

    /// An adapter failed to launch its underlying work.
    #[error("failed to start {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },
}

impl WizardError {
    /// Convenience constructor for adapter startup failures.
    pub fn spawn(what: impl Into<String>, source: std::io::Error) -> Self {
        WizardError::Spawn { what: what.into(), source }
    }
}
