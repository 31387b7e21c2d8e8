//! Declaration rewriting: turns top-level `local` declarations of a block
//! into assignments on the shared scope table.
//!
//! Every block is compiled as its own chunk, so a `local` at the chunk's top
//! level would vanish when the chunk returns. Rewriting `local x = 1` to
//! `x = 1` stores the binding in the chunk's `_ENV`, which is the scope table
//! shared by all blocks of one document run.
//!
//! Only declarations at nesting depth zero are touched. Depth is tracked with
//! a minimal Lua token scan that understands strings, long brackets, comments
//! and the block keywords; it is not a parser.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Symbol,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    start: usize,
    end: usize,
}

/// Splits `src` into words and symbols, skipping whitespace, comments and
/// string literals.
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    /// Length of a long bracket opener (`[[`, `[==[`) at the cursor, and its level.
    fn long_bracket_at(&self, at: usize) -> Option<(usize, usize)> {
        let bytes = self.src.as_bytes();
        if bytes.get(at) != Some(&b'[') {
            return None;
        }
        let mut level = 0;
        while bytes.get(at + 1 + level) == Some(&b'=') {
            level += 1;
        }
        if bytes.get(at + 1 + level) == Some(&b'[') {
            Some((level + 2, level))
        } else {
            None
        }
    }

    fn skip_long_bracket(&mut self, opener_len: usize, level: usize) {
        let close = format!("]{}]", "=".repeat(level));
        let body_start = self.pos + opener_len;
        self.pos = match self.src[body_start..].find(&close) {
            Some(i) => body_start + i + close.len(),
            None => self.src.len(),
        };
    }

    fn skip_quoted(&mut self, quote: u8) {
        let bytes = self.src.as_bytes();
        self.pos += 1;
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'\n' => return,
                b if b == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(bytes.len());
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            let b = self.peek_byte(0)?;
            if b.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            if b == b'-' && self.peek_byte(1) == Some(b'-') {
                if let Some((len, level)) = self.long_bracket_at(self.pos + 2) {
                    self.pos += 2;
                    self.skip_long_bracket(len, level);
                } else {
                    self.pos = match self.src[self.pos..].find('\n') {
                        Some(i) => self.pos + i + 1,
                        None => self.src.len(),
                    };
                }
                continue;
            }
            if b == b'"' || b == b'\'' {
                self.skip_quoted(b);
                continue;
            }
            if let Some((len, level)) = self.long_bracket_at(self.pos) {
                self.skip_long_bracket(len, level);
                continue;
            }

            let start = self.pos;
            if b.is_ascii_alphabetic() || b == b'_' {
                let bytes = self.src.as_bytes();
                while self.pos < bytes.len() && (bytes[self.pos].is_ascii_alphanumeric() || bytes[self.pos] == b'_') {
                    self.pos += 1;
                }
                return Some(Token { kind: TokenKind::Word, text: &self.src[start..self.pos], start, end: self.pos });
            }
            // Multi-byte characters outside strings are not valid Lua; step over them whole.
            let width = self.src[start..].chars().next().map(char::len_utf8).unwrap_or(1);
            self.pos += width;
            return Some(Token { kind: TokenKind::Symbol, text: &self.src[start..self.pos], start, end: self.pos });
        }
    }
}

/// One textual edit: replace `range` of the source with `with`.
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    with: &'static str,
}

/// Rewrites top-level `local` declarations so they bind on the scope table.
///
/// - `local a, b = 1, 2` becomes `a, b = 1, 2`
/// - `local a` becomes `a = nil`
/// - `local x <const> = 5` becomes `x = 5`
/// - `local function f()` becomes `function f()`
///
/// `local x <close>` keeps its `local`; dropping it would lose the close call.
pub fn rewrite(code: &str) -> String {
    let tokens: Vec<Token<'_>> = Scanner::new(code).collect();
    let mut edits: Vec<Edit> = Vec::new();
    let mut block_depth: usize = 0;
    let mut bracket_depth: usize = 0;
    let mut i = 0;

    while i < tokens.len() {
        let tok = tokens[i];
        match (tok.kind, tok.text) {
            (TokenKind::Word, "function" | "if" | "do" | "repeat") => block_depth += 1,
            (TokenKind::Word, "end" | "until") => block_depth = block_depth.saturating_sub(1),
            (TokenKind::Symbol, "(" | "{" | "[") => bracket_depth += 1,
            (TokenKind::Symbol, ")" | "}" | "]") => bracket_depth = bracket_depth.saturating_sub(1),
            (TokenKind::Word, "local") if block_depth == 0 && bracket_depth == 0 => {
                if let Some(consumed) = plan_local(&tokens, i, &mut edits) {
                    // `local function` opens a body; count it here since the
                    // `function` token was consumed by the plan.
                    if tokens.get(i + 1).map(|t| t.text) == Some("function") {
                        block_depth += 1;
                    }
                    i += consumed;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }

    apply_edits(code, edits)
}

/// Plans the edits for the `local` statement starting at `tokens[at]`.
/// Returns how many tokens were consumed, or `None` to leave it untouched.
fn plan_local(tokens: &[Token<'_>], at: usize, edits: &mut Vec<Edit>) -> Option<usize> {
    let local = tokens[at];
    let next = tokens.get(at + 1)?;

    if next.kind == TokenKind::Word && next.text == "function" {
        edits.push(Edit { start: local.start, end: next.start, with: "" });
        return Some(2);
    }

    // Walk the name list: NAME [<attrib>] {, NAME [<attrib>]}
    let mut j = at + 1;
    let mut attrib_edits: Vec<Edit> = Vec::new();
    let mut last_end;
    loop {
        let name = tokens.get(j)?;
        if name.kind != TokenKind::Word {
            return None;
        }
        last_end = name.end;
        j += 1;
        if tokens.get(j).map(|t| t.text) == Some("<") {
            let attrib = tokens.get(j + 1)?;
            let close = tokens.get(j + 2)?;
            if close.text != ">" {
                return None;
            }
            if attrib.text != "const" {
                return None;
            }
            attrib_edits.push(Edit { start: name.end, end: close.end, with: "" });
            j += 3;
        }
        if tokens.get(j).map(|t| t.text) == Some(",") {
            j += 1;
            continue;
        }
        break;
    }

    edits.push(Edit { start: local.start, end: tokens[at + 1].start, with: "" });
    edits.extend(attrib_edits);

    let has_initializer = tokens.get(j).map(|t| t.text) == Some("=")
        && tokens.get(j + 1).map(|t| t.text) != Some("=");
    if !has_initializer {
        edits.push(Edit { start: last_end, end: last_end, with: " = nil" });
    }
    Some(j - at)
}

fn apply_edits(code: &str, mut edits: Vec<Edit>) -> String {
    if edits.is_empty() {
        return code.to_string();
    }
    edits.sort_by_key(|e| e.start);
    let mut out = String::with_capacity(code.len() + edits.len() * 6);
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&code[cursor..edit.start]);
        out.push_str(edit.with);
        cursor = edit.end;
    }
    out.push_str(&code[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::rewrite;

    #[test]
    fn top_level_locals_become_assignments() {
        assert_eq!(rewrite("local a = 1\nprint(a)"), "a = 1\nprint(a)");
        assert_eq!(rewrite("local a, b = 1, 2"), "a, b = 1, 2");
        assert_eq!(rewrite("local x <const> = 5"), "x = 5");
        assert_eq!(rewrite("local a"), "a = nil");
        assert_eq!(rewrite("local a; print(a)"), "a = nil; print(a)");
    }

    #[test]
    fn local_function_becomes_scope_function() {
        assert_eq!(
            rewrite("local function add(a, b)\n  local s = a + b\n  return s\nend"),
            "function add(a, b)\n  local s = a + b\n  return s\nend"
        );
    }

    #[test]
    fn nested_declarations_are_untouched() {
        let src = "function f()\n  local inner = 1\n  return inner\nend\nfor i = 1, 3 do\n  local y = i\nend\nif true then local z = 2 end\nwhile false do local w = 1 end\nrepeat local r = 1 until r == 1\nlocal after = 3";
        let out = rewrite(src);
        assert!(out.contains("local inner = 1"));
        assert!(out.contains("local y = i"));
        assert!(out.contains("local z = 2"));
        assert!(out.contains("local w = 1"));
        assert!(out.contains("local r = 1"));
        assert!(out.ends_with("\nafter = 3"));
    }

    #[test]
    fn anonymous_function_bodies_are_nested() {
        let src = "local cb = function()\n  local hidden = 1\nend\nlocal t = { f = function() local q = 1 end }";
        assert_eq!(
            rewrite(src),
            "cb = function()\n  local hidden = 1\nend\nt = { f = function() local q = 1 end }"
        );
    }

    #[test]
    fn strings_and_comments_are_skipped() {
        let src = "print(\"local x = 1\")\n-- local y = 2\n--[[ local z\nend ]]\nlocal s = [[ function ]]\nprint('do')";
        let out = rewrite(src);
        assert!(out.contains("print(\"local x = 1\")"));
        assert!(out.contains("-- local y = 2"));
        assert!(out.contains("--[[ local z\nend ]]"));
        assert!(out.contains("\ns = [[ function ]]"));
    }

    #[test]
    fn close_attribute_keeps_local() {
        let src = "local h <close> = setmetatable({}, {__close = function() end})";
        assert_eq!(rewrite(src), src);
    }

    #[test]
    fn code_without_declarations_is_unchanged() {
        let src = "print(a + 1)";
        assert_eq!(rewrite(src), src);
    }
}
