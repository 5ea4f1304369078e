//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::scenario::Scenario;
use super::{PolicyArg, StrategyArg};
use crate::api::{Capabilities, InMemoryServer};
use crate::config::{StrategyKind, SyncSettings};
use crate::orchestrator::{ModelEvent, SaveAndUploadOrchestrator, Summary};
use crate::outcome::OutcomeKind;
use crate::upload::{
    FixedDecision, OverflowChoice, OverflowDecisionSource, UploadStrategy,
    UploadStrategySpecification,
};

/// Asks on the terminal what to do with a full changeset
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptDecision;

impl OverflowDecisionSource for PromptDecision {
    fn resolve_capacity_overflow(&self, remaining: usize) -> OverflowChoice {
        eprintln!(
            "The changeset is full, {} object(s) are still waiting for upload.",
            remaining
        );
        eprint!("[r]eopen a new changeset and continue, [a]bort, or [s]top and return? ");
        let _ = io::stderr().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => parse_choice(&line),
            Err(_) => OverflowChoice::Abort,
        }
    }
}

fn parse_choice(input: &str) -> OverflowChoice {
    match input.trim().to_ascii_lowercase().as_str() {
        "r" | "reopen" => OverflowChoice::ReopenAndContinue,
        "s" | "stop" | "return" => OverflowChoice::ReturnToCaller,
        _ => OverflowChoice::Abort,
    }
}

/// Options of the `run` command
#[derive(Debug, Clone, Default)]
pub struct RunOptions<'a> {
    pub config: Option<&'a Path>,
    pub policy: Option<PolicyArg>,
    pub interactive: bool,
    pub chunk_size: Option<usize>,
    pub report: Option<&'a Path>,
}

/// Replay a scenario against the simulated server.
pub fn run_scenario(path: &Path, options: RunOptions<'_>) -> Result<()> {
    info!("Running scenario: {}", path.display());

    let mut settings = match options.config {
        Some(config) => SyncSettings::load(config)?,
        None => SyncSettings::default(),
    };
    if let Some(chunk_size) = options.chunk_size {
        settings.upload.strategy = StrategyKind::Chunked;
        settings.upload.chunk_size = chunk_size;
    }
    if let Some(policy) = options.policy {
        settings.upload.overflow_policy = Some(policy.into());
    }

    let scenario = Scenario::load(path)?;
    let server = Arc::new(scenario.server.build());
    let actions = scenario.actions(&settings)?;

    let mut orchestrator = if options.interactive {
        SaveAndUploadOrchestrator::with_settings(server.clone(), &settings, PromptDecision)?
    } else {
        SaveAndUploadOrchestrator::with_settings(
            server.clone(),
            &settings,
            FixedDecision(OverflowChoice::Abort),
        )?
    };

    let events = orchestrator.subscribe();
    let printer = thread::spawn(move || {
        for event in events {
            if let ModelEvent::Progress { layer, message } = event {
                println!("  [{}] {}", layer, message);
            }
        }
    });

    let summary = orchestrator.run(actions)?;
    // Dropping the orchestrator closes the event channel.
    drop(orchestrator);
    let _ = printer.join();

    print_summary(&summary, &server);

    if let Some(report) = options.report {
        let file = File::create(report)
            .with_context(|| format!("Failed to create report {}", report.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summary)?;
        println!("Report written: {}", report.display());
    }

    if summary.has_unsaved_data() {
        bail!(
            "{} action(s) did not complete; unsaved changes remain",
            summary.num_problems()
        );
    }
    Ok(())
}

fn outcome_label(outcome: Option<OutcomeKind>) -> &'static str {
    match outcome {
        None => "-",
        Some(OutcomeKind::Ok) => "ok",
        Some(OutcomeKind::Failed) => "FAILED",
        Some(OutcomeKind::Canceled) => "canceled",
    }
}

fn print_summary(summary: &Summary, server: &InMemoryServer) {
    println!();
    println!("Session {}", summary.session_id);
    println!("{:-<72}", "");
    println!(
        "{:<20} {:>8} {:>8} {:>9} {:>9} {:>10}",
        "Layer", "Upload", "Save", "Uploaded", "Residual", "Changeset"
    );
    for layer in &summary.layers {
        println!(
            "{:<20} {:>8} {:>8} {:>9} {:>9} {:>10}",
            layer.name,
            outcome_label(layer.upload),
            outcome_label(layer.save),
            layer.uploaded,
            layer.residual,
            layer.changeset_id
        );
        for error in [&layer.upload_error, &layer.save_error].into_iter().flatten() {
            println!("    {}", error);
        }
        if layer.upload_error.is_some() || layer.save_error.is_some() {
            if layer.resumable {
                println!("    (can be resumed later)");
            }
            for hint in &layer.suggestions {
                println!("    hint: {}", hint);
            }
        }
    }
    println!("{:-<72}", "");
    println!(
        "ok: {}  failed: {}  canceled: {}",
        summary.ok, summary.failed, summary.canceled
    );
    println!(
        "server requests: {} open, {} upload, {} close",
        server.open_calls().len(),
        server.upload_calls().len(),
        server.close_calls().len()
    );
}

/// Print how `objects` objects would be split into requests.
pub fn plan(
    objects: usize,
    strategy: StrategyArg,
    chunk_size: usize,
    max_changeset_size: Option<usize>,
) -> Result<()> {
    let strategy = match strategy {
        StrategyArg::Single => UploadStrategy::SingleRequest,
        StrategyArg::Chunked => UploadStrategy::Chunked { chunk_size },
        StrategyArg::PerObject => UploadStrategy::PerObject,
    };
    let spec = UploadStrategySpecification::new(strategy, true);
    spec.validate(objects, Capabilities { max_changeset_size })?;

    let batches = strategy.num_requests(objects);
    println!("{} object(s), {}: {} request(s)", objects, strategy, batches);

    let mut remaining = objects;
    let mut index = 0;
    while remaining > 0 {
        let len = strategy.batch_len(remaining);
        index += 1;
        if index <= 10 || remaining == len {
            println!("  request {:>5}: {} object(s)", index, len);
        } else if index == 11 {
            println!("  ...");
        }
        remaining -= len;
    }

    if let Some(max) = max_changeset_size {
        let changesets = objects.div_ceil(max.max(1));
        if changesets > 1 {
            println!(
                "At least {} changesets are needed with a server limit of {}",
                changesets, max
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("r", OverflowChoice::ReopenAndContinue ; "short reopen")]
    #[test_case("Reopen\n", OverflowChoice::ReopenAndContinue ; "long reopen")]
    #[test_case("s", OverflowChoice::ReturnToCaller ; "stop")]
    #[test_case("a", OverflowChoice::Abort ; "abort")]
    #[test_case("", OverflowChoice::Abort ; "empty defaults to abort")]
    fn test_parse_choice(input: &str, expected: OverflowChoice) {
        assert_eq!(parse_choice(input), expected);
    }

    #[test]
    fn test_plan_rejects_oversized_single_request() {
        assert!(plan(200, StrategyArg::Single, 1, Some(100)).is_err());
        assert!(plan(200, StrategyArg::Chunked, 50, Some(100)).is_ok());
    }
}
