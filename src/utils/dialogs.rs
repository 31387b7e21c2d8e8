//! Dialogs answered on the controlling terminal.

use std::io::{self, Write};

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use plainmark::Dialogs;

/// Asks on stderr/stdin. When stdin is not a terminal (piped document) it
/// answers like a headless host: confirmations are declined and prompts
/// take their default.
#[derive(Debug, Default)]
pub struct TerminalDialogs;

impl TerminalDialogs {
    fn ask(&self, question: &str) -> Option<String> {
        if !io::stdin().is_terminal() {
            return None;
        }
        eprint!("{} ", question.cyan());
        io::stderr().flush().ok();
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Dialogs for TerminalDialogs {
    fn alert(&self, message: &str) {
        eprintln!("{} {}", "[alert]".yellow(), message);
    }

    fn confirm(&self, message: &str) -> bool {
        match self.ask(&format!("{} [y/N]", message)) {
            Some(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            None => false,
        }
    }

    fn prompt(&self, message: &str, default: Option<&str>) -> Option<String> {
        let question = match default {
            Some(d) => format!("{} [{}]", message, d),
            None => message.to_string(),
        };
        match self.ask(&question) {
            Some(answer) if answer.is_empty() => default.map(str::to_string),
            Some(answer) => Some(answer),
            None => default.map(str::to_string),
        }
    }
}
