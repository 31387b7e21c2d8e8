//! Line-based REPL: collect Markdown, run it on demand.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use plainmark::{render, Engine};

use crate::handlers::run::{self, RunOptions};
use crate::printer::{MarkdownPrinter, TextPrinter};

/// Storage key the REPL saves its buffer under.
pub const SAVED_CODE_KEY: &str = "plainmarkCode";

const HELP: &str = "Commands:
  exit          Exit REPL
  help          Show this help
  run           Execute current markdown
  clear         Clear current markdown and pending callbacks
  show          Show current markdown
  render        Print the HTML preview of the current markdown
  vars          Print the variables left by the last run
  save          Save current markdown to localStorage
  load          Replace current markdown with the saved one
Any other line is appended to the current markdown.";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Exit,
    Help,
    Run,
    Clear,
    Show,
    Render,
    Vars,
    Save,
    Load,
    Line,
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "exit" | "quit" => Command::Exit,
            "help" => Command::Help,
            "run" => Command::Run,
            "clear" => Command::Clear,
            "show" => Command::Show,
            "render" => Command::Render,
            "vars" => Command::Vars,
            "save" => Command::Save,
            "load" => Command::Load,
            _ => Command::Line,
        }
    }
}

pub async fn run(engine: &mut Engine, markdown: bool, deferred_budget: Duration) -> Result<()> {
    let title = TextPrinter { color: Some("cyan") };
    title.print("Plainmark REPL (Interactive Mode)");
    println!("Type 'exit' to quit, 'help' for help");

    let opts = RunOptions { deferred_budget: Some(deferred_budget), ..Default::default() };
    let mut lines: Vec<String> = Vec::new();
    loop {
        print!(">>> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        match Command::parse(line) {
            Command::Exit => break,
            Command::Help => println!("{}", HELP),
            Command::Run => {
                title.print("\nResult:");
                run::run(engine, &lines.join("\n"), &opts).await?;
            }
            Command::Clear => {
                lines.clear();
                engine.cancel_pending();
                println!("Markdown cleared");
            }
            Command::Show => {
                title.print("\nCurrent Markdown:");
                if markdown {
                    MarkdownPrinter::default().print(&lines.join("\n"));
                } else {
                    println!("{}", lines.join("\n"));
                }
            }
            Command::Render => println!("{}", render::render(&lines.join("\n"))),
            Command::Vars => println!("{}", serde_json::to_string_pretty(&engine.variables().to_json())?),
            Command::Save => {
                engine.host().storage.set(SAVED_CODE_KEY, &lines.join("\n"))?;
                println!("Markdown saved");
            }
            Command::Load => match engine.host().storage.get(SAVED_CODE_KEY)? {
                Some(saved) => {
                    lines = saved.lines().map(str::to_string).collect();
                    println!("Markdown loaded ({} lines)", lines.len());
                }
                None => TextPrinter { color: Some("yellow") }.print("No saved markdown"),
            },
            Command::Line => lines.push(line.to_string()),
        }
    }
    println!("Exiting...");
    Ok(())
}
