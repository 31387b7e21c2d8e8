//! Run handler: executes one document and prints its transcript.

use std::time::{Duration, Instant};

use anyhow::Result;
use plainmark::{Engine, ExecutionStatus, Transcript};

use crate::printer::{TextPrinter, TranscriptPrinter};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub html: bool,
    pub vars: bool,
    pub dom: bool,
    /// How long to keep firing deferred callbacks; `None` skips them.
    pub deferred_budget: Option<Duration>,
}

pub async fn run(engine: &mut Engine, source: &str, opts: &RunOptions) -> Result<ExecutionStatus> {
    let report = engine.run(source)?;
    let printer = TranscriptPrinter { html: opts.html };
    printer.print_report(&report);

    if let Some(budget) = opts.deferred_budget {
        let deferred = pump_deferred(engine, budget).await;
        print_deferred(&printer, &deferred);
    }

    if opts.vars {
        println!("{}", serde_json::to_string_pretty(&engine.variables().to_json())?);
    }
    if opts.dom {
        TextPrinter { color: Some("cyan") }.print("document.body:");
        println!("{}", engine.document_html());
    }
    Ok(report.status)
}

/// Fires deferred callbacks as they come due, until none are left or the
/// next one lies beyond `budget`.
pub async fn pump_deferred(engine: &Engine, budget: Duration) -> Transcript {
    let limit = Instant::now() + budget;
    let mut out = Transcript::new();
    while let Some(next) = engine.next_deadline() {
        if next > limit {
            tracing::debug!(pending = engine.pending_tasks(), "deferred budget exhausted");
            break;
        }
        tokio::time::sleep_until(tokio::time::Instant::from_std(next)).await;
        out.extend(engine.run_due(Instant::now()));
    }
    out
}

pub fn print_deferred(printer: &TranscriptPrinter, deferred: &Transcript) {
    if deferred.is_empty() {
        return;
    }
    TextPrinter { color: Some("magenta") }.print("deferred:");
    printer.print(deferred);
}

/// Exit code for a finished run.
pub fn exit_code(status: ExecutionStatus) -> i32 {
    match status {
        ExecutionStatus::CompilationFailed | ExecutionStatus::CompletedWithErrors => 1,
        ExecutionStatus::NoBlocks | ExecutionStatus::Succeeded => 0,
    }
}
