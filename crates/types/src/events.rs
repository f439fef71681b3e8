//! Request, event, and control types exchanged across the adapter seams.

use std::path::PathBuf;

use crate::{ArgumentGroup, ListData, PickItem, StepSelection};

/// Parameters for opening one step's picker.
#[derive(Debug, Clone)]
pub struct PickerRequest {
    /// Step prompt.
    pub title: String,
    /// 1-based position shown to the user.
    pub step_index: usize,
    /// Total count shown to the user (includes the final save step).
    pub total_steps: usize,
}

/// Incremental updates pushed into an open picker session.
#[derive(Debug, Clone)]
pub enum PickerUpdate {
    /// Replace the full candidate list.
    Items(Vec<PickItem>),
    /// Replace the selected set, expressed in candidate keys.
    Selected(Vec<String>),
    /// Toggle the busy indicator while discovery is running.
    Busy(bool),
}

/// Terminal outcome of one picker session.
#[derive(Debug, Clone, PartialEq)]
pub enum PickOutcome {
    /// The user confirmed a selection.
    Selected(StepSelection),
    /// The user asked to revisit the previous step.
    Back,
    /// The user abandoned the wizard.
    Cancelled,
}

/// Parameters for starting a background discovery scan.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// Path of the external filtering tool.
    pub tool_path: String,
    /// Resolved argument history of all prior steps followed by this step's
    /// own query groups, in step order.
    pub argument_groups: Vec<ArgumentGroup>,
    /// Field names for tab-separated output columns after the key column.
    pub columns: Vec<String>,
    /// Capture file being scanned.
    pub input_path: PathBuf,
}

/// Events emitted by a running discovery task.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Newly seen or re-seen candidates; last write wins per key.
    Update(ListData),
    /// The underlying scan exited with the given code. Terminal.
    Finished(i32),
}

/// Parameters for the final filtering run.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub tool_path: String,
    pub argument_groups: Vec<ArgumentGroup>,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Control commands accepted by the run driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Cancel,
}

/// Lifecycle events emitted while the filtering run is in flight.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started {
        /// Number of argument groups being applied.
        filter_count: usize,
    },
    /// Periodic output-size sample.
    Progress {
        generated_bytes: u64,
    },
    /// One diagnostic line from the tool.
    OutputLine(String),
    Completed {
        outcome: RunOutcome,
    },
}

/// Terminal result of the filtering run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Exit code 0; carries the collected diagnostic lines.
    Succeeded { diagnostics: Vec<String> },
    /// Non-zero exit that was not caused by cancellation.
    Failed { code: i32 },
    /// Cancelled on request; not a failure.
    Cancelled,
}
