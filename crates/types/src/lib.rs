//! Shared type definitions for the pcapsift filter wizard.
//!
//! The configuration types mirror the JSON shape of a `filterSteps` settings
//! array (camelCase field names), so existing step configurations load
//! without translation. Runtime types (events, selections, argument groups)
//! are shared between the engine, the adapter implementations, and the CLI.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value};

mod events;

pub use events::{
    DiscoveryEvent, DiscoveryRequest, PickOutcome, PickerRequest, PickerUpdate, RunControl, RunEvent, RunOutcome,
    RunSpec,
};

/// A single discovered or statically-configured candidate, kept as loose
/// JSON so step configurations can attach arbitrary metadata (`icon`,
/// `filterField`, description columns, occurrence counts, ...).
pub type CandidateRecord = JsonMap<String, Value>;

/// Incremental discovery output: candidate key to record, in emission order.
/// Repeated deliveries for the same key replace the record in place.
pub type ListData = IndexMap<String, CandidateRecord>;

/// Immutable configuration for one wizard step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStep {
    /// Prompt shown while the step's picker is open.
    pub title: String,
    /// Field name used for `field==key` equality clauses. A candidate record
    /// may override it per item via its `filterField` entry.
    #[serde(default)]
    pub filter_field: String,
    /// Wrap the step's joined clause in `!(...)`.
    #[serde(default)]
    pub filter_negate: bool,
    /// Candidates known up front. Each record must carry a `key` entry; they
    /// are pre-selected when the step opens.
    #[serde(default)]
    pub static_items: Vec<CandidateRecord>,
    /// Background discovery query. When absent the step offers only its
    /// static candidates.
    #[serde(default)]
    pub list_provider: Option<DiscoveryQuery>,
    /// Default icon applied to newly discovered candidates.
    #[serde(default)]
    pub list_icon: Option<String>,
    /// Record fields concatenated into each candidate's description.
    #[serde(default)]
    pub list_description: Option<Vec<String>>,
    /// Fixed tool arguments contributed to this step's argument group,
    /// ahead of the derived filter argument.
    #[serde(default)]
    pub filter_args: Vec<String>,
}

impl FilterStep {
    /// Key of a static candidate record. Empty keys are legal; they stand
    /// for "match everything" entries and are skipped by the expression
    /// builder.
    pub fn static_key(record: &CandidateRecord) -> String {
        record.get("key").and_then(Value::as_str).unwrap_or_default().to_string()
    }
}

/// Discovery query configuration: the tool argument groups that scan the
/// capture, plus an optional mapping of tab-separated output columns into
/// record fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuery {
    /// Argument groups appended after the resolved filters of prior steps.
    pub args: Vec<Vec<String>>,
    /// Field names for output columns after the first (the first column is
    /// always the candidate key).
    #[serde(default)]
    pub columns: Vec<String>,
}

/// One selectable candidate as presented by a picker.
///
/// Identity is the `name` (the candidate key), never the list position or
/// object identity: candidate lists are rebuilt on every incremental merge.
#[derive(Debug, Clone, PartialEq)]
pub struct PickItem {
    /// Candidate key, also the display name.
    pub name: String,
    /// Display icon, from the record's `icon` entry when present.
    pub icon: Option<String>,
    /// Concatenation of the step's configured description fields.
    pub description: String,
    /// The underlying record, kept for per-item field overrides.
    pub record: CandidateRecord,
}

impl PickItem {
    /// Derive an item from a candidate record. Pure transform: name is the
    /// key, icon comes from the record, the description concatenates the
    /// configured record fields in order (empty when none are configured).
    pub fn from_record(record: CandidateRecord, key: String, description_fields: Option<&[String]>) -> Self {
        let mut item = PickItem {
            name: key,
            icon: None,
            description: String::new(),
            record: CandidateRecord::new(),
        };
        item.update_from(record, description_fields);
        item
    }

    /// Refresh the item from a newer record for the same key, preserving the
    /// previous icon when the new record does not carry one.
    pub fn update_from(&mut self, record: CandidateRecord, description_fields: Option<&[String]>) {
        if let Some(icon) = record.get("icon").and_then(Value::as_str) {
            self.icon = Some(icon.to_string());
        }
        self.description = describe(&record, description_fields);
        self.record = record;
    }
}

fn describe(record: &CandidateRecord, description_fields: Option<&[String]>) -> String {
    let Some(fields) = description_fields else {
        return String::new();
    };
    let mut out = String::new();
    for field in fields {
        match record.get(field) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
    }
    out
}

/// The user's confirmed selection for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSelection {
    /// Ordered picked candidates.
    Items(Vec<PickItem>),
    /// Manually entered filter expression, passed through verbatim.
    Raw(String),
}

impl StepSelection {
    /// Keys of the picked candidates; empty for raw overrides.
    pub fn keys(&self) -> Vec<String> {
        match self {
            StepSelection::Items(items) => items.iter().map(|item| item.name.clone()).collect(),
            StepSelection::Raw(_) => Vec::new(),
        }
    }
}

/// Quote wrapped around filter expressions when rendering an invocation for
/// display: `cmd` quoting on Windows, `sh` quoting elsewhere.
pub const FILTER_EXPR_QUOTE: char = if cfg!(windows) { '"' } else { '\'' };

/// The ordered tool arguments contributed by one wizard step.
///
/// Tokens are plain argv entries; nothing is shell-quoted because execution
/// never goes through a shell. [`ArgumentGroup::render_for_shell`] exists for
/// logs and progress messages only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentGroup {
    pub args: Vec<String>,
}

impl ArgumentGroup {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Render the group the way it would be typed into a shell, wrapping the
    /// token following `-Y` in the platform quote.
    pub fn render_for_shell(&self) -> String {
        let mut out = String::new();
        let mut quote_next = false;
        for arg in &self.args {
            if !out.is_empty() {
                out.push(' ');
            }
            if quote_next {
                out.push(FILTER_EXPR_QUOTE);
                out.push_str(arg);
                out.push(FILTER_EXPR_QUOTE);
            } else {
                out.push_str(arg);
            }
            quote_next = arg == "-Y";
        }
        out
    }
}
