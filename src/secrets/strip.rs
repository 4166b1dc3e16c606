// schemarestore/src/secrets/strip.rs
//! T-SQL comment stripping that keeps byte offsets intact.
//!
//! Stripped regions are overwritten with spaces (newlines kept), so the
//! output has exactly the same length and line structure as the input and
//! any match offset found in stripped text is valid in the original.

enum State {
    Normal,
    LineComment,
    /// T-SQL block comments nest; the depth tracks `/*` minus `*/`.
    BlockComment(u32),
    SingleQuote,
    DoubleQuote,
    Bracket,
}

/// Blanks `--` line comments and `/* */` block comments (nested) while
/// leaving string literals (`'it''s'`), quoted identifiers (`"a""b"`) and
/// bracketed identifiers (`[a]]b]`) untouched.
pub fn strip_sql_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut state = State::Normal;
    let mut chars = sql.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        match state {
            State::Normal => match ch {
                '-' if matches!(chars.peek(), Some(&(_, '-'))) => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if matches!(chars.peek(), Some(&(_, '*'))) => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment(1);
                }
                '\'' => {
                    out.push(ch);
                    state = State::SingleQuote;
                }
                '"' => {
                    out.push(ch);
                    state = State::DoubleQuote;
                }
                '[' => {
                    out.push(ch);
                    state = State::Bracket;
                }
                _ => out.push(ch),
            },
            State::LineComment => {
                if ch == '\n' || ch == '\r' {
                    out.push(ch);
                    state = State::Normal;
                } else {
                    push_blank(&mut out, ch);
                }
            }
            State::BlockComment(depth) => {
                if ch == '*' && matches!(chars.peek(), Some(&(_, '/'))) {
                    chars.next();
                    out.push_str("  ");
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                } else if ch == '/' && matches!(chars.peek(), Some(&(_, '*'))) {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment(depth + 1);
                } else if ch == '\n' || ch == '\r' {
                    out.push(ch);
                } else {
                    push_blank(&mut out, ch);
                }
            }
            State::SingleQuote => {
                out.push(ch);
                if ch == '\'' {
                    if matches!(chars.peek(), Some(&(_, '\''))) {
                        chars.next();
                        out.push('\'');
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuote => {
                out.push(ch);
                if ch == '"' {
                    if matches!(chars.peek(), Some(&(_, '"'))) {
                        chars.next();
                        out.push('"');
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Bracket => {
                out.push(ch);
                if ch == ']' {
                    if matches!(chars.peek(), Some(&(_, ']'))) {
                        chars.next();
                        out.push(']');
                    } else {
                        state = State::Normal;
                    }
                }
            }
        }
    }
    out
}

fn push_blank(out: &mut String, ch: char) {
    for _ in 0..ch.len_utf8() {
        out.push(' ');
    }
}

/// Returns the text inside the balanced parenthesized block whose opening
/// `(` sits at byte `open_idx`, skipping parens inside string literals and
/// quoted/bracketed identifiers. `None` when `open_idx` is not a `(` or the
/// block never closes.
pub fn paren_block(text: &str, open_idx: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(open_idx) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut i = open_idx;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open_idx + 1..i]);
                }
            }
            b'\'' => {
                i = skip_delimited(bytes, i, b'\'');
                continue;
            }
            b'"' => {
                i = skip_delimited(bytes, i, b'"');
                continue;
            }
            b'[' => {
                i = skip_delimited(bytes, i, b']');
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// First occurrence of ASCII `needle` at or after `from` that sits outside
/// string literals and quoted/bracketed identifiers.
pub(crate) fn find_unquoted(text: &str, from: usize, needle: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        if b == needle {
            return Some(i);
        }
        match b {
            b'\'' => {
                i = skip_delimited(bytes, i, b'\'');
                continue;
            }
            b'"' => {
                i = skip_delimited(bytes, i, b'"');
                continue;
            }
            b'[' => {
                i = skip_delimited(bytes, i, b']');
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index just past the closing delimiter, honoring the doubled-delimiter
/// escape (`''`, `""`, `]]`).
fn skip_delimited(bytes: &[u8], start: usize, closer: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == closer {
            if bytes.get(i + 1) == Some(&closer) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}
