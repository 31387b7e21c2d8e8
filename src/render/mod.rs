//! Markdown to HTML for the preview view.
//!
//! Deliberately small: three heading levels, bold, italic and line breaks.
//! Executable fences come from [`crate::extract::fence_spans`], so the blocks
//! marked in the preview are exactly the blocks the engine runs.

use std::sync::OnceLock;

use regex::Regex;

use crate::{extract::fence_spans, transcript::escape_html};

pub const EMPTY_DOCUMENT: &str = "No text to render.";

fn heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,3}) (.*)$").expect("valid heading regex"))
}

fn strong() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*\n]+?)\*\*").expect("valid strong regex"))
}

fn emphasis() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*\n]+?)\*").expect("valid emphasis regex"))
}

/// Renders `text` to an HTML fragment. Pure; equal input gives equal output.
pub fn render(text: &str) -> String {
    if text.trim().is_empty() {
        return EMPTY_DOCUMENT.to_string();
    }

    let mut html = String::with_capacity(text.len() * 2);
    let mut cursor = 0;
    for (index, block) in fence_spans(text).iter().enumerate() {
        html.push_str(&render_prose(&text[cursor..block.source_span.start]));
        html.push_str(&format!("<pre class=\"plainmark\" data-block=\"{}\">", index));
        if let Some(aux) = &block.aux_language_tag {
            html.push_str(&format!(
                "<div class=\"plainmark-lang\">Language: {} + {}</div>",
                escape_html(aux),
                escape_html(&block.language_tag)
            ));
        }
        html.push_str(&format!("<code>{}</code></pre>", escape_html(&block.code)));
        cursor = block.source_span.end;
    }
    html.push_str(&render_prose(&text[cursor..]));
    html
}

fn render_prose(prose: &str) -> String {
    if prose.is_empty() {
        return String::new();
    }
    let escaped = escape_html(prose);
    let with_headings = heading().replace_all(&escaped, |caps: &regex::Captures<'_>| {
        let level = caps[1].len();
        format!("<h{level}>{}</h{level}>", &caps[2])
    });
    let with_strong = strong().replace_all(&with_headings, "<strong>$1</strong>");
    let with_em = emphasis().replace_all(&with_strong, "<em>$1</em>");
    with_em.replace('\n', "<br>")
}
