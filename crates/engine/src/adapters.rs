//! Contracts to the wizard's external collaborators.
//!
//! The engine drives three kinds of outside work: a picker that collects the
//! user's selection for one step, a discovery provider that scans the source
//! capture in the background, and the process runner that performs the final
//! filtering. Implementations own their resources; dropping a session or
//! task must terminate any underlying work.

use async_trait::async_trait;

use pcapsift_types::{DiscoveryEvent, DiscoveryRequest, PickOutcome, PickerRequest, PickerUpdate, RunSpec};

use crate::WizardError;

/// Presents candidate lists and returns the user's selection per step.
pub trait Picker {
    type Session: PickerSession;

    /// Open a picker for one step. The session starts empty; the engine
    /// pushes items and the initial selection through [`PickerSession::apply`].
    fn open(&mut self, request: PickerRequest) -> Result<Self::Session, WizardError>;
}

/// One open picker. The engine applies live updates while awaiting the
/// user's resolution; both happen on the same logical step session.
#[async_trait]
pub trait PickerSession: Send {
    /// Apply a non-blocking update to the visible list, selection, or busy
    /// indicator.
    fn apply(&mut self, update: PickerUpdate);

    /// Snapshot of the currently selected candidate keys.
    fn selected_keys(&self) -> Vec<String>;

    /// Wait for the user to confirm, go back, or cancel.
    ///
    /// Must be cancel-safe: the engine polls this concurrently with the
    /// discovery event stream and will re-await after applying updates.
    async fn resolve(&mut self) -> PickOutcome;
}

/// Starts background scans that discover candidate values.
pub trait DiscoveryProvider {
    type Task: DiscoveryTask;

    fn start(&self, request: DiscoveryRequest) -> Result<Self::Task, WizardError>;
}

/// A running discovery scan.
#[async_trait]
pub trait DiscoveryTask: Send {
    /// Next event from the scan, `None` once the stream is exhausted after
    /// [`DiscoveryEvent::Finished`]. Must be cancel-safe.
    async fn next_event(&mut self) -> Option<DiscoveryEvent>;
}

/// Executes the external filtering tool for the final run.
pub trait ProcessRunner {
    type Task: RunTask;

    fn start(&self, spec: RunSpec) -> Result<Self::Task, WizardError>;
}

/// Events emitted by a running filtering process.
#[derive(Debug, Clone, PartialEq)]
pub enum RunTaskEvent {
    /// One diagnostic output line.
    Output(String),
    /// Process exit. Terminal.
    Exited(i32),
}

/// A running filtering process.
#[async_trait]
pub trait RunTask: Send {
    /// Next event from the process. Must be cancel-safe; after
    /// [`RunTaskEvent::Exited`] the behavior is unspecified.
    async fn next_event(&mut self) -> RunTaskEvent;

    /// Request cooperative termination. The eventual [`RunTaskEvent::Exited`]
    /// code is still delivered.
    fn cancel(&mut self);
}
