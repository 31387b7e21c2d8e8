use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "plainmark", about = "Run Lua code blocks embedded in Markdown documents", version)]
#[command(group(ArgGroup::new("mode").args(["render", "show", "repl", "example", "watch"]).multiple(false)))]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
pub struct Cli {
    /// Markdown document to run. Read from stdin when omitted and input is piped.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Print the HTML preview of the document instead of running it.
    #[arg(long)]
    pub render: bool,

    /// Show the document in the terminal instead of running it.
    #[arg(long)]
    pub show: bool,

    /// Prettify Markdown for --show (default from PRETTIFY_MARKDOWN).
    #[arg(long)]
    pub md: bool,
    /// Print the raw Markdown for --show.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Print the transcript as HTML markup instead of colored text.
    #[arg(long)]
    pub html: bool,

    /// Print the variables left by the run as JSON.
    #[arg(long)]
    pub vars: bool,

    /// Print the elements the scripts appended to `document.body`.
    #[arg(long)]
    pub dom: bool,

    /// Print a header line before each executed block.
    #[arg(long = "block-headers")]
    pub block_headers: bool,

    /// Exit without waiting for timers and simulated file callbacks.
    ///
    /// By default deferred callbacks are pumped for up to DEFERRED_BUDGET_MS
    /// and their output is printed after the transcript.
    #[arg(long = "no-deferred")]
    pub no_deferred: bool,

    /// Keep localStorage in memory for this process only.
    #[arg(long = "memory-storage")]
    pub memory_storage: bool,

    /// Start a REPL that collects Markdown lines and runs them on demand.
    #[arg(long)]
    pub repl: bool,

    /// Write an example document to FILE (default example.md).
    #[arg(long)]
    pub example: bool,

    /// Re-run FILE whenever it changes.
    #[arg(long)]
    pub watch: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
