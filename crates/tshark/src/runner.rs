//! The final filtering run as a supervised tshark pipeline.

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, warn};

use pcapsift_engine::{
    WizardError,
    adapters::{ProcessRunner, RunTask, RunTaskEvent},
};
use pcapsift_types::RunSpec;

use crate::pipeline::{Pipeline, spawn_pipeline};

/// Runs the assembled argument groups as a tshark pipeline writing the
/// filtered capture to the requested output path.
#[derive(Debug, Default, Clone)]
pub struct TsharkRunner;

/// A running filtering pipeline. `cancel` kills every stage; the exit event
/// is still delivered afterwards. Dropping the task aborts the supervisor,
/// which kills the stages.
pub struct TsharkRunTask {
    events_rx: UnboundedReceiver<RunTaskEvent>,
    cancel_tx: UnboundedSender<()>,
    worker: JoinHandle<()>,
}

impl ProcessRunner for TsharkRunner {
    type Task = TsharkRunTask;

    fn start(&self, spec: RunSpec) -> Result<TsharkRunTask, WizardError> {
        let mut pipeline = spawn_pipeline(
            &spec.tool_path,
            &spec.argument_groups,
            &spec.input_path,
            Some(&spec.output_path),
        )?;
        let stderr = pipeline.last.stderr.take().ok_or_else(|| {
            WizardError::spawn(
                spec.tool_path.clone(),
                std::io::Error::other("final stage has no stderr"),
            )
        })?;

        let (events_tx, events_rx) = unbounded_channel();
        let (cancel_tx, cancel_rx) = unbounded_channel();
        let worker = tokio::spawn(supervise(pipeline, stderr, cancel_rx, events_tx));
        Ok(TsharkRunTask {
            events_rx,
            cancel_tx,
            worker,
        })
    }
}

#[async_trait]
impl RunTask for TsharkRunTask {
    async fn next_event(&mut self) -> RunTaskEvent {
        self.events_rx.recv().await.unwrap_or(RunTaskEvent::Exited(-1))
    }

    fn cancel(&mut self) {
        let _ = self.cancel_tx.send(());
    }
}

impl Drop for TsharkRunTask {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn supervise(
    mut pipeline: Pipeline,
    stderr: tokio::process::ChildStderr,
    mut cancel_rx: UnboundedReceiver<()>,
    events_tx: UnboundedSender<RunTaskEvent>,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;

    let code = loop {
        tokio::select! {
            line = lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    let _ = events_tx.send(RunTaskEvent::Output(line));
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
            status = pipeline.last.wait() => {
                match status {
                    Ok(status) => break status.code().unwrap_or(-1),
                    Err(err) => {
                        warn!(error = %err, "failed to reap filtering pipeline");
                        break -1;
                    }
                }
            }
            Some(()) = cancel_rx.recv() => {
                debug!("killing filtering pipeline on cancel request");
                pipeline.kill_all();
            }
        }
    };

    // drain remaining diagnostics before reporting the exit
    while stderr_open {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let _ = events_tx.send(RunTaskEvent::Output(line));
            }
            Ok(None) | Err(_) => stderr_open = false,
        }
    }
    pipeline.reap_upstream().await;
    let _ = events_tx.send(RunTaskEvent::Exited(code));
}
