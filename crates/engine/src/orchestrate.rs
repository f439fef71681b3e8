//! Final-run orchestration: argument assembly and driving the external
//! filtering process with progress reporting and cancellation.

use std::{
    path::Path,
    time::Duration,
};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use pcapsift_types::{ArgumentGroup, FilterStep, RunControl, RunEvent, RunOutcome, RunSpec};

use crate::{
    WizardError,
    adapters::{ProcessRunner, RunTask, RunTaskEvent},
    expr::build_expression_opt,
    wizard::StepRuntimeState,
};

/// How often the output file size is sampled for progress reporting.
const PROGRESS_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Assemble the ordered argument groups across all steps.
///
/// Each step contributes its fixed `filterArgs` followed by `-Y <expr>` when
/// its built expression is non-empty; steps contributing nothing are
/// skipped. Order is preserved: each step's filter is scoped to the data
/// already narrowed by the steps before it.
pub fn build_argument_groups(steps: &[FilterStep], runtime: &[StepRuntimeState]) -> Vec<ArgumentGroup> {
    let mut groups = Vec::new();
    for (index, (step, state)) in steps.iter().zip(runtime).enumerate() {
        let mut args = step.filter_args.clone();
        let expr = build_expression_opt(step, state.selection.as_ref());
        if !expr.is_empty() {
            args.push("-Y".to_string());
            args.push(expr);
        }
        if args.is_empty() {
            continue;
        }
        let group = ArgumentGroup::new(args);
        debug!(step = index, group = %group.render_for_shell(), "assembled argument group");
        groups.push(group);
    }
    groups
}

/// Refuse to filter a capture into itself. Callers check this before
/// invoking the runner and prompt for a different destination on failure.
pub fn ensure_distinct_paths(input: &Path, output: &Path) -> Result<(), WizardError> {
    if input == output {
        return Err(WizardError::SameFile {
            path: output.to_path_buf(),
        });
    }
    Ok(())
}

/// Drive the filtering process to completion.
///
/// Emits [`RunEvent`]s over `event_tx` (start, once-per-second output-size
/// samples, diagnostic lines, completion) and consumes [`RunControl`]
/// commands from `control_rx`. Cancellation is forwarded to the runner and
/// the resulting non-zero exit is reported as [`RunOutcome::Cancelled`],
/// never as a failure. A non-cancelled non-zero exit is returned as
/// [`WizardError::RunFailure`] after the completion event is emitted.
pub async fn drive_filter_run<R: ProcessRunner>(
    spec: RunSpec,
    runner: &R,
    mut control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<RunOutcome, WizardError> {
    ensure_distinct_paths(&spec.input_path, &spec.output_path)?;

    let filter_count = spec.argument_groups.len();
    let output_path = spec.output_path.clone();
    info!(filters = filter_count, output = ?output_path, "starting filter run");

    let mut task = runner.start(spec)?;
    let _ = event_tx.send(RunEvent::Started { filter_count });

    let mut sampler = tokio::time::interval(PROGRESS_SAMPLE_PERIOD);
    sampler.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut cancelled = false;
    let mut diagnostics = Vec::new();

    let outcome = loop {
        tokio::select! {
            event = task.next_event() => match event {
                RunTaskEvent::Output(line) => {
                    let _ = event_tx.send(RunEvent::OutputLine(line.clone()));
                    diagnostics.push(line);
                }
                RunTaskEvent::Exited(code) => {
                    break if cancelled {
                        info!(code, "filter run cancelled");
                        RunOutcome::Cancelled
                    } else if code == 0 {
                        info!(lines = diagnostics.len(), "filter run succeeded");
                        RunOutcome::Succeeded { diagnostics: std::mem::take(&mut diagnostics) }
                    } else {
                        warn!(code, "filter run failed");
                        RunOutcome::Failed { code }
                    };
                }
            },
            _ = sampler.tick() => {
                if let Ok(meta) = tokio::fs::metadata(&output_path).await {
                    let _ = event_tx.send(RunEvent::Progress { generated_bytes: meta.len() });
                }
            }
            Some(RunControl::Cancel) = control_rx.recv() => {
                if !cancelled {
                    info!("cancellation requested; stopping the filtering process");
                    cancelled = true;
                    task.cancel();
                }
            }
        }
    };

    let _ = event_tx.send(RunEvent::Completed { outcome: outcome.clone() });
    match outcome {
        RunOutcome::Failed { code } => Err(WizardError::RunFailure { code }),
        other => Ok(other),
    }
}
