//! `--watch`: re-runs a document after it changes, debounced.

use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use plainmark::Engine;

use crate::handlers::run::{self as runner, RunOptions};
use crate::printer::{TextPrinter, TranscriptPrinter};
use crate::utils::read_single_document;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fires once no change was seen for `delay`.
#[derive(Debug)]
struct Debounce {
    delay: Duration,
    changed_at: Option<Instant>,
}

impl Debounce {
    fn new(delay: Duration) -> Self {
        Self { delay, changed_at: None }
    }

    fn touch(&mut self, now: Instant) {
        self.changed_at = Some(now);
    }

    fn ready(&mut self, now: Instant) -> bool {
        match self.changed_at {
            Some(at) if now.duration_since(at) >= self.delay => {
                self.changed_at = None;
                true
            }
            _ => false,
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn run_once(engine: &mut Engine, path: &Path, opts: &RunOptions) -> Result<()> {
    match read_single_document(path) {
        Ok(source) => {
            runner::run(engine, &source, opts).await?;
        }
        // Editors may briefly remove the file while saving.
        Err(e) => tracing::warn!(error = %e, "could not read watched document"),
    }
    Ok(())
}

/// Runs the document again; callbacks left by the previous run are dropped
/// so intervals do not pile up across edits.
async fn rerun(engine: &mut Engine, path: &Path, opts: &RunOptions) -> Result<()> {
    engine.cancel_pending();
    run_once(engine, path, opts).await
}

pub async fn run(engine: &mut Engine, path: &Path, opts: &RunOptions, delay: Duration) -> Result<()> {
    let opts = RunOptions { deferred_budget: None, ..opts.clone() };
    let printer = TranscriptPrinter { html: opts.html };
    let banner = TextPrinter { color: Some("cyan") };

    banner.print(&format!("Watching {} (Ctrl-C to stop)", path.display()));
    let mut seen = modified(path).await;
    run_once(engine, path, &opts).await?;

    let mut debounce = Debounce::new(delay);
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let now = Instant::now();
        runner::print_deferred(&printer, &engine.run_due(now));

        let current = modified(path).await;
        if current != seen {
            seen = current;
            debounce.touch(now);
        } else if debounce.ready(now) {
            tracing::info!(path = %path.display(), "document changed");
            banner.print(&format!("--- {} changed, running again ---", path.display()));
            rerun(engine, path, &opts).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_waits_for_quiet_period() {
        let start = Instant::now();
        let mut d = Debounce::new(Duration::from_millis(1000));
        assert!(!d.ready(start));

        d.touch(start);
        assert!(!d.ready(start + Duration::from_millis(500)));
        d.touch(start + Duration::from_millis(600));
        assert!(!d.ready(start + Duration::from_millis(1200)));
        assert!(d.ready(start + Duration::from_millis(1600)));
        // Fires once per burst.
        assert!(!d.ready(start + Duration::from_millis(3000)));
    }

    #[tokio::test]
    async fn rerun_replaces_pending_callbacks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tick.md");
        std::fs::write(&path, "```plainmark\nsetInterval(function() print('tick') end, 50)\n```\n")?;
        let mut engine = Engine::headless()?;
        let opts = RunOptions::default();

        run_once(&mut engine, &path, &opts).await?;
        assert_eq!(engine.pending_tasks(), 1);
        for _ in 0..3 {
            rerun(&mut engine, &path, &opts).await?;
            assert_eq!(engine.pending_tasks(), 1);
        }
        Ok(())
    }
}
