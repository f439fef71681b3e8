//! Per-step mutable state, owned exclusively by the wizard for one run.

use pcapsift_types::{ListData, StepSelection};

/// Lifecycle of a step's background discovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryStatus {
    /// Never ran, failed, or was invalidated by an upstream change.
    #[default]
    NotStarted,
    /// A scan is currently feeding the open picker.
    InProgress,
    /// A scan completed with exit code 0 under the current upstream filter
    /// history; `discovered` holds everything it emitted.
    Finished,
}

/// Mutable companion to one [`pcapsift_types::FilterStep`], living for the
/// duration of a single wizard run.
#[derive(Debug, Default)]
pub struct StepRuntimeState {
    /// Everything discovery has emitted so far, key to record, last write
    /// wins. Kept across revisits so a re-opened step can seed its list
    /// before a (re-)scan delivers anything.
    pub discovered: ListData,
    /// See [`DiscoveryStatus`]. Only `Finished` suppresses a re-scan.
    pub discovery: DiscoveryStatus,
    /// The confirmed selection, unset until the step completes in this pass.
    pub selection: Option<StepSelection>,
}

impl StepRuntimeState {
    /// Mark the cached discovery stale because an upstream step's resolved
    /// filter changed. The data itself is kept for display seeding; the next
    /// visit re-runs the scan and overwrites it key by key.
    pub fn invalidate_discovery(&mut self) {
        self.discovery = DiscoveryStatus::NotStarted;
    }
}
