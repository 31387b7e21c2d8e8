//! Append-only output of one execution call.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    fragments: Vec<Fragment>,
    error_count: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.fragments.push(Fragment::Text(text.into()));
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.fragments.push(Fragment::Error(message.into()));
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Copies fragments from `start` onward, e.g. output produced after a checkpoint.
    pub fn since(&self, start: usize) -> Transcript {
        let mut out = Transcript::new();
        for fragment in self.fragments.iter().skip(start) {
            match fragment {
                Fragment::Text(t) => out.push_text(t.clone()),
                Fragment::Error(e) => out.push_error(e.clone()),
            }
        }
        out
    }

    pub fn extend(&mut self, other: Transcript) {
        self.error_count += other.error_count;
        self.fragments.extend(other.fragments);
    }

    /// Flattens to HTML-safe text; error lines carry an `error` class.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(t) => {
                    out.push_str(&escape_html(t));
                    out.push('\n');
                }
                Fragment::Error(e) => {
                    let _ = writeln!(out, "{}", error_span(&format!("Error: {}", e)));
                }
            }
        }
        out
    }

    /// Flattens to plain text for terminals, with `Error:` prefixes.
    pub fn to_plain(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(t) => {
                    let _ = writeln!(out, "{}", t);
                }
                Fragment::Error(e) => {
                    let _ = writeln!(out, "Error: {}", e);
                }
            }
        }
        out
    }
}

pub fn error_span(message: &str) -> String {
    format!("<span class=\"error\">{}</span>", escape_html(message))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_marks_errors_and_escapes_text() {
        let mut t = Transcript::new();
        t.push_text("a < b");
        t.push_error("boom");
        assert_eq!(t.error_count(), 1);
        assert_eq!(t.to_html(), "a &lt; b\n<span class=\"error\">Error: boom</span>\n");
        assert_eq!(t.to_plain(), "a < b\nError: boom\n");
    }

    #[test]
    fn since_copies_tail_with_error_count() {
        let mut t = Transcript::new();
        t.push_text("before");
        let mark = t.len();
        t.push_error("late");
        t.push_text("after");
        let tail = t.since(mark);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.error_count(), 1);
    }
}
