//! Block extraction: finds executable `plainmark` fences in Markdown text.
//!
//! Two fence forms are recognized, each on its own line:
//!
//! ```text
//! ```plainmark            plain tag
//! ```js plainmark         dual tag (aux label + embedded tag)
//! ```
//!
//! Each form is scanned independently over the whole text; the matches are
//! merged by start offset so the result always follows document order.

use std::{ops::Range, sync::OnceLock};

use regex::Regex;

/// Tag of the embedded execution language.
pub const EMBEDDED_TAG: &str = "plainmark";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub code: String,
    pub language_tag: String,
    pub aux_language_tag: Option<String>,
    /// Byte range of the whole fence, opening marker through closing marker.
    pub source_span: Range<usize>,
}

impl CodeBlock {
    /// Label used in block headers and error messages, e.g. `js+plainmark`.
    pub fn label(&self) -> String {
        match &self.aux_language_tag {
            Some(aux) => format!("{}+{}", aux, self.language_tag),
            None => self.language_tag.clone(),
        }
    }
}

fn plain_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^```plainmark[ \t]*\r?\n(?P<code>[\s\S]*?)^```").expect("valid plain fence regex")
    })
}

fn dual_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^```(?P<aux>\w+)[ \t]+plainmark[ \t]*\r?\n(?P<code>[\s\S]*?)^```")
            .expect("valid dual fence regex")
    })
}

/// Locates every executable fence in `text`.
///
/// This is the single fence-detection routine; [`extract`] and the HTML
/// renderer both build on it so they always agree on what is executable.
pub fn fence_spans(text: &str) -> Vec<CodeBlock> {
    let mut found: Vec<CodeBlock> = Vec::new();

    for caps in plain_fence().captures_iter(text) {
        let (Some(whole), Some(code)) = (caps.get(0), caps.name("code")) else { continue };
        found.push(CodeBlock {
            code: trim_trailing_newline(code.as_str()).to_string(),
            language_tag: EMBEDDED_TAG.to_string(),
            aux_language_tag: None,
            source_span: whole.range(),
        });
    }

    for caps in dual_fence().captures_iter(text) {
        let (Some(whole), Some(aux), Some(code)) = (caps.get(0), caps.name("aux"), caps.name("code")) else {
            continue;
        };
        found.push(CodeBlock {
            code: trim_trailing_newline(code.as_str()).to_string(),
            language_tag: EMBEDDED_TAG.to_string(),
            aux_language_tag: Some(aux.as_str().to_string()),
            source_span: whole.range(),
        });
    }

    found.sort_by_key(|b| b.source_span.start);

    // A closing marker can double as the opening line of the other form;
    // the earlier fence owns those bytes.
    let mut merged: Vec<CodeBlock> = Vec::with_capacity(found.len());
    for block in found {
        if let Some(prev) = merged.last() {
            if block.source_span.start < prev.source_span.end {
                continue;
            }
        }
        merged.push(block);
    }
    merged
}

/// Returns the executable blocks of `text` in document order.
/// An empty result is a normal outcome, never an error.
pub fn extract(text: &str) -> Vec<CodeBlock> {
    let blocks = fence_spans(text);
    tracing::debug!(count = blocks.len(), "extracted plainmark blocks");
    blocks
}

fn trim_trailing_newline(code: &str) -> &str {
    code.strip_suffix("\r\n")
        .or_else(|| code.strip_suffix('\n'))
        .unwrap_or(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_blocks_is_empty() {
        assert!(extract("# Title\n\nJust prose.\n").is_empty());
        assert!(extract("```python\nprint(1)\n```\n").is_empty());
    }

    #[test]
    fn plain_block_code_is_trimmed_by_one_newline() {
        let doc = "intro\n```plainmark\nprint(\"x\")\n\n```\n";
        let blocks = extract(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "print(\"x\")\n");
        assert_eq!(blocks[0].language_tag, "plainmark");
        assert_eq!(blocks[0].aux_language_tag, None);
        assert_eq!(&doc[blocks[0].source_span.clone()], "```plainmark\nprint(\"x\")\n\n```");
    }

    #[test]
    fn dual_tag_records_aux_language() {
        let blocks = extract("```js plainmark\nprint(1)\n```\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].aux_language_tag.as_deref(), Some("js"));
        assert_eq!(blocks[0].code, "print(1)");
        assert_eq!(blocks[0].label(), "js+plainmark");
    }

    #[test]
    fn mixed_forms_keep_document_order() {
        let doc = "```python plainmark\nprint(1)\n```\n\ntext\n\n```plainmark\nprint(2)\n```\n\n```lua plainmark\nprint(3)\n```\n";
        let codes: Vec<_> = extract(doc).into_iter().map(|b| b.code).collect();
        assert_eq!(codes, vec!["print(1)", "print(2)", "print(3)"]);
    }

    #[test]
    fn empty_block_is_extracted() {
        let blocks = extract("```plainmark\n```\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "");
    }

    #[test]
    fn other_fences_are_not_executable() {
        let doc = "```rust\nfn main() {}\n```\n```plainmark\nprint(1)\n```\n";
        let blocks = extract(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "print(1)");
    }

    #[test]
    fn closing_marker_is_shared_by_one_block_only() {
        let doc = "```plainmark\nprint(1)\n```js plainmark\nprint(2)\n```\n";
        let blocks = extract(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "print(1)");
    }
}
