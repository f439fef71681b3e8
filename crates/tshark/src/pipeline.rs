//! Chained tshark process spawning.

use std::{
    path::Path,
    process::Stdio,
};

use tokio::process::{Child, Command};
use tracing::debug;

use pcapsift_engine::WizardError;
use pcapsift_types::ArgumentGroup;

/// The spawned pipeline: intermediate stages plus the final one, whose
/// stdout/stderr carry the query output and diagnostics.
pub(crate) struct Pipeline {
    pub upstream: Vec<Child>,
    pub last: Child,
}

/// Argv for every stage of a pipeline, tool path excluded.
///
/// The first stage reads `input`, later stages read stdin; every stage but
/// the last writes a capture stream to stdout. The last stage writes to
/// `output` when given one, otherwise its stdout is left to the group's own
/// output arguments (field queries).
pub(crate) fn stage_argv(groups: &[ArgumentGroup], input: &Path, output: Option<&Path>) -> Vec<Vec<String>> {
    let stages: Vec<&[String]> = if groups.is_empty() {
        // a run with no constraints still copies input to output
        vec![&[] as &[String]]
    } else {
        groups.iter().map(|group| group.args.as_slice()).collect()
    };

    let last = stages.len() - 1;
    stages
        .iter()
        .enumerate()
        .map(|(index, args)| {
            let mut argv: Vec<String> = vec!["-r".into()];
            if index == 0 {
                argv.push(input.display().to_string());
            } else {
                argv.push("-".into());
            }
            if index != last {
                argv.push("-w".into());
                argv.push("-".into());
            } else if let Some(path) = output {
                argv.push("-w".into());
                argv.push(path.display().to_string());
            }
            argv.extend(args.iter().cloned());
            argv
        })
        .collect()
}

/// Spawn the pipeline, wiring each stage's stdout into the next stage's
/// stdin. Children are killed when dropped, so dropping the returned
/// [`Pipeline`] terminates the whole chain.
pub(crate) fn spawn_pipeline(
    tool_path: &str,
    groups: &[ArgumentGroup],
    input: &Path,
    output: Option<&Path>,
) -> Result<Pipeline, WizardError> {
    let stages = stage_argv(groups, input, output);
    let last_index = stages.len() - 1;

    let mut children: Vec<Child> = Vec::with_capacity(stages.len());
    for (index, argv) in stages.iter().enumerate() {
        let mut cmd = Command::new(tool_path);
        cmd.args(argv);
        cmd.kill_on_drop(true);

        if index == 0 {
            cmd.stdin(Stdio::null());
        } else {
            let upstream = children
                .last_mut()
                .and_then(|child| child.stdout.take())
                .ok_or_else(|| {
                    WizardError::spawn(
                        tool_path.to_string(),
                        std::io::Error::other("upstream pipeline stage has no stdout"),
                    )
                })?;
            let stdin: Stdio =
                upstream.try_into().map_err(|err| WizardError::spawn(tool_path.to_string(), err))?;
            cmd.stdin(stdin);
        }

        // Intermediate captures stream over stdout. The final stage's stdout
        // carries the field query for discovery runs; when writing to a file
        // it stays closed so an unread pipe can never stall the stage. Its
        // stderr carries tshark's diagnostics.
        if index != last_index || output.is_none() {
            cmd.stdout(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
        }
        cmd.stderr(if index == last_index { Stdio::piped() } else { Stdio::null() });

        debug!(stage = index, args = ?argv, "spawning tshark stage");
        let child = cmd
            .spawn()
            .map_err(|err| WizardError::spawn(tool_path.to_string(), err))?;
        children.push(child);
    }

    let last = children.pop().expect("pipeline has at least one stage");
    Ok(Pipeline {
        upstream: children,
        last,
    })
}

impl Pipeline {
    /// Ask every stage to terminate. Exit codes are still reaped by the
    /// owning task.
    pub(crate) fn kill_all(&mut self) {
        for child in &mut self.upstream {
            let _ = child.start_kill();
        }
        let _ = self.last.start_kill();
    }

    /// Reap the upstream stages after the final one exited; they die on
    /// their own once the downstream pipe closes.
    pub(crate) async fn reap_upstream(&mut self) {
        for child in &mut self.upstream {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
