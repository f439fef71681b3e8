//! Interactive tshark-based capture filtering wizard.
//!
//! Walks the configured filter steps, then pipes the capture through one
//! tshark invocation per step into the chosen output file.

mod picker;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::unbounded_channel,
};
use tracing::debug;

use pcapsift_engine::{Wizard, WizardError, WizardOutcome, drive_filter_run, ensure_distinct_paths};
use pcapsift_tshark::{TsharkDiscovery, TsharkRunner};
use pcapsift_types::{FilterStep, RunControl, RunEvent, RunOutcome, RunSpec};

use crate::picker::StdioPicker;

#[derive(Debug, Parser)]
#[command(name = "pcapsift", about = "Interactively narrow a capture file with tshark filters")]
struct Cli {
    /// Capture file to filter.
    input: PathBuf,
    /// Step configuration: a JSON array of filter steps.
    #[arg(long, short)]
    config: PathBuf,
    /// Path of the tshark executable.
    #[arg(long, default_value = "tshark")]
    tshark: String,
    /// Destination file; prompted for when omitted.
    #[arg(long, short)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let steps = load_steps(&cli.config)?;
    debug!(steps = steps.len(), input = ?cli.input, "starting wizard");

    let mut wizard = Wizard::new(
        steps,
        StdioPicker,
        TsharkDiscovery,
        cli.tshark.clone(),
        cli.input.clone(),
    )?;
    match wizard.run().await? {
        WizardOutcome::Cancelled => {
            println!("cancelled; no file written");
            return Ok(());
        }
        WizardOutcome::Completed => {}
    }

    let groups = wizard.argument_groups();
    if groups.is_empty() {
        println!("no filters selected; nothing to do");
        return Ok(());
    }

    let Some(output) = resolve_output_path(&cli.input, cli.out.clone()).await? else {
        println!("no destination chosen; no file written");
        return Ok(());
    };

    run_filter(&cli, groups, output).await
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_steps(path: &Path) -> Result<Vec<FilterStep>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading step configuration {path:?}"))?;
    parse_steps(&text).with_context(|| format!("parsing step configuration {path:?}"))
}

fn parse_steps(text: &str) -> Result<Vec<FilterStep>> {
    Ok(serde_json::from_str(text)?)
}

fn default_output_path(input: &Path) -> PathBuf {
    PathBuf::from(format!("{}_filtered.pcap", input.display()))
}

/// Pick the destination, re-prompting while it collides with the input.
/// `None` means the user gave up.
async fn resolve_output_path(input: &Path, preferred: Option<PathBuf>) -> Result<Option<PathBuf>> {
    let mut candidate = preferred.unwrap_or_else(|| default_output_path(input));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match ensure_distinct_paths(input, &candidate) {
            Ok(()) => return Ok(Some(candidate)),
            Err(err @ WizardError::SameFile { .. }) => {
                println!("{err}");
            }
            Err(err) => return Err(err.into()),
        }
        println!("save filtered capture as (empty to abort):");
        match lines.next_line().await? {
            Some(line) if !line.trim().is_empty() => candidate = PathBuf::from(line.trim()),
            _ => return Ok(None),
        }
    }
}

async fn run_filter(cli: &Cli, groups: Vec<pcapsift_types::ArgumentGroup>, output: PathBuf) -> Result<()> {
    for (index, group) in groups.iter().enumerate() {
        println!("filter {}: {}", index + 1, group.render_for_shell());
    }

    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, mut event_rx) = unbounded_channel();

    // ctrl-c cancels the run instead of tearing the process down
    tokio::spawn({
        let control_tx = control_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = control_tx.send(RunControl::Cancel);
            }
        }
    });

    let spec = RunSpec {
        tool_path: cli.tshark.clone(),
        argument_groups: groups,
        input_path: cli.input.clone(),
        output_path: output.clone(),
    };
    let runner = TsharkRunner;
    let drive = drive_filter_run(spec, &runner, control_rx, event_tx);

    let printer = async {
        while let Some(event) = event_rx.recv().await {
            match event {
                RunEvent::Started { filter_count } => {
                    println!("applying {filter_count} filter(s) to {}...", cli.input.display());
                }
                RunEvent::Progress { generated_bytes } => {
                    println!("... generated {}MB", generated_bytes.div_ceil(1_000_000));
                }
                // diagnostic lines are replayed after a successful run
                RunEvent::OutputLine(_) | RunEvent::Completed { .. } => {}
            }
        }
    };

    let (result, ()) = tokio::join!(drive, printer);
    match result {
        Ok(RunOutcome::Succeeded { diagnostics }) => {
            println!("successfully filtered into '{}'", output.display());
            for line in diagnostics {
                println!("{line}");
            }
            Ok(())
        }
        Ok(RunOutcome::Cancelled) => {
            println!("filtering cancelled");
            Ok(())
        }
        Ok(RunOutcome::Failed { code }) => Err(WizardError::RunFailure { code }.into()),
        Err(err) => Err(err).context("filtering failed"),
    }
}
