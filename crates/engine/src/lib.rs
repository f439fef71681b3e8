//! Step-wizard engine for progressively narrowing a capture file.
//!
//! The engine walks an ordered list of configured filter steps, materializes
//! each step's candidate list (static items plus incrementally discovered
//! ones), collects a selection through a picker adapter, and finally
//! assembles the per-step argument groups that drive the external filtering
//! tool. Pickers, discovery scans, and the filtering process itself live
//! behind the traits in [`adapters`].

pub mod adapters;
mod error;
pub mod expr;
pub mod merge;
pub mod orchestrate;
pub mod wizard;

pub use error::WizardError;
pub use orchestrate::{build_argument_groups, drive_filter_run, ensure_distinct_paths};
pub use wizard::{Wizard, WizardOutcome};
