use anyhow::Result;
use plainmark::transcript::escape_html;
use plainmark::{extract, render};
use regex::Regex;

const DOCUMENTS: &[&str] = &[
    "",
    "# Only prose\n\nNothing to run here.",
    "```plainmark\nprint(1)\n```\n",
    "# Mixed\n\n```lua\nprint('not run')\n```\n\n```plainmark\nlocal a = 1\n```\n\nbetween *words*\n\n```js plainmark\nprint(a < 2)\n```\n",
    "```plainmark\n```\n```python plainmark\nprint(\"<tag>\")\n```",
    "```plainmark\nunterminated block\n",
];

/// (block index, code) pairs as they appear in rendered HTML.
fn rendered_blocks(html: &str) -> Result<Vec<(usize, String)>> {
    let re = Regex::new(r#"(?s)<pre class="plainmark" data-block="(\d+)">(?:<div class="plainmark-lang">.*?</div>)?<code>(.*?)</code></pre>"#)?;
    re.captures_iter(html)
        .map(|c| -> Result<(usize, String)> { Ok((c[1].parse()?, c[2].to_string())) })
        .collect()
}

#[test]
fn rendered_blocks_match_extracted_blocks() -> Result<()> {
    for doc in DOCUMENTS {
        let html = render(doc);
        let rendered = rendered_blocks(&html)?;
        let extracted = extract(doc);
        assert_eq!(rendered.len(), extracted.len(), "block count differs for {:?}", doc);
        for (i, ((index, code), block)) in rendered.iter().zip(&extracted).enumerate() {
            assert_eq!(*index, i);
            assert_eq!(code, &escape_html(&block.code));
        }
    }
    Ok(())
}

#[test]
fn dual_tag_blocks_show_their_language() -> Result<()> {
    let html = render("```js plainmark\nprint(1)\n```\n");
    assert!(html.contains("<div class=\"plainmark-lang\">Language: js + plainmark</div>"));
    let blocks = extract("```js plainmark\nprint(1)\n```\n");
    assert_eq!(blocks[0].aux_language_tag.as_deref(), Some("js"));
    Ok(())
}

#[test]
fn render_is_idempotent() -> Result<()> {
    for doc in DOCUMENTS {
        assert_eq!(render(doc), render(doc));
    }
    Ok(())
}
