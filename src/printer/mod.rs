//! Printers: text, markdown (termimad) and transcripts.

use owo_colors::OwoColorize;
use plainmark::{ExecutionReport, ExecutionStatus, Fragment, Transcript, NO_OUTPUT_MESSAGE};
use termimad::MadSkin;

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        if let Some(c) = self.color {
            match c {
                "green" => println!("{}", text.green()),
                "cyan" => println!("{}", text.cyan()),
                "magenta" => println!("{}", text.magenta()),
                "yellow" => println!("{}", text.yellow()),
                "red" => println!("{}", text.red()),
                _ => println!("{}", text),
            }
        } else {
            println!("{}", text);
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// Prints transcripts either as colored terminal text or as the HTML markup.
pub struct TranscriptPrinter {
    pub html: bool,
}

impl TranscriptPrinter {
    pub fn print(&self, transcript: &Transcript) {
        if self.html {
            print!("{}", transcript.to_html());
            return;
        }
        for fragment in transcript.fragments() {
            match fragment {
                Fragment::Text(t) => println!("{}", t),
                Fragment::Error(e) => println!("{}", format!("Error: {}", e).red()),
            }
        }
    }

    pub fn print_report(&self, report: &ExecutionReport) {
        match report.status {
            ExecutionStatus::NoBlocks => TextPrinter { color: Some("yellow") }.print(&report.output),
            _ if self.html => println!("{}", report.output),
            ExecutionStatus::Succeeded if report.transcript.is_empty() => {
                TextPrinter { color: Some("green") }.print(NO_OUTPUT_MESSAGE)
            }
            _ => self.print(&report.transcript),
        }
    }
}
