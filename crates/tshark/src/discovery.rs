//! Background candidate discovery over a tshark field query.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, warn};

use pcapsift_engine::{
    WizardError,
    adapters::{DiscoveryProvider, DiscoveryTask},
};
use pcapsift_types::{CandidateRecord, DiscoveryEvent, DiscoveryRequest, ListData};

use crate::pipeline::{Pipeline, spawn_pipeline};

/// Starts tshark pipelines whose final stage emits one candidate per output
/// line: the first tab-separated column is the key, further columns map to
/// the request's configured field names. Occurrences are counted into the
/// record's `count` field.
#[derive(Debug, Default, Clone)]
pub struct TsharkDiscovery;

/// A running discovery scan. Dropping the task aborts the reader and kills
/// the underlying tshark stages.
pub struct TsharkDiscoveryTask {
    events_rx: UnboundedReceiver<DiscoveryEvent>,
    worker: JoinHandle<()>,
}

impl DiscoveryProvider for TsharkDiscovery {
    type Task = TsharkDiscoveryTask;

    fn start(&self, request: DiscoveryRequest) -> Result<TsharkDiscoveryTask, WizardError> {
        let mut pipeline = spawn_pipeline(&request.tool_path, &request.argument_groups, &request.input_path, None)?;
        let stdout = pipeline.last.stdout.take().ok_or_else(|| {
            WizardError::spawn(
                request.tool_path.clone(),
                std::io::Error::other("discovery stage has no stdout"),
            )
        })?;

        let (events_tx, events_rx) = unbounded_channel();
        let worker = tokio::spawn(pump(pipeline, stdout, request.columns, events_tx));
        Ok(TsharkDiscoveryTask { events_rx, worker })
    }
}

#[async_trait]
impl DiscoveryTask for TsharkDiscoveryTask {
    async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        self.events_rx.recv().await
    }
}

impl Drop for TsharkDiscoveryTask {
    fn drop(&mut self) {
        // aborting drops the pipeline, whose children are killed on drop
        self.worker.abort();
    }
}

async fn pump(
    mut pipeline: Pipeline,
    stdout: tokio::process::ChildStdout,
    columns: Vec<String>,
    events_tx: UnboundedSender<DiscoveryEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut counts: HashMap<String, u64> = HashMap::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let key = parts.next().unwrap_or_default().to_string();
        if key.is_empty() {
            continue;
        }

        let count = counts.entry(key.clone()).and_modify(|c| *c += 1).or_insert(1);
        let mut record = CandidateRecord::new();
        for (name, value) in columns.iter().zip(parts) {
            record.insert(name.clone(), Value::String(value.to_string()));
        }
        record.insert("count".to_string(), Value::from(*count));

        let mut update = ListData::new();
        update.insert(key, record);
        if events_tx.send(DiscoveryEvent::Update(update)).is_err() {
            // consumer went away; stop scanning
            pipeline.kill_all();
            break;
        }
    }

    let code = match pipeline.last.wait().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(err) => {
            warn!(error = %err, "failed to reap discovery pipeline");
            -1
        }
    };
    pipeline.reap_upstream().await;
    debug!(code, keys = counts.len(), "discovery scan finished");
    let _ = events_tx.send(DiscoveryEvent::Finished(code));
}
