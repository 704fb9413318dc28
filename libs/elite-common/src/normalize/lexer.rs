//! String-literal aware tokenizer shared by the text passes.
//!
//! Passes only ever rewrite string literals as whole tokens, or the text
//! between them, so they never match inside a literal.

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StrLit<'a> {
    /// Source text including both quotes.
    pub raw: &'a str,
    /// Decoded contents.
    pub value: String,
    pub quote: char,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    Text(&'a str),
    Str(StrLit<'a>),
}

pub(crate) fn tokenize(src: &str) -> Vec<Token<'_>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let opens = b == b'"' || (b == b'\'' && opens_single_quoted(src, i));
        if opens {
            // Unterminated literal: the remainder stays plain text.
            let Some((end, value)) = scan_string(src, i) else {
                break;
            };
            if text_start < i {
                tokens.push(Token::Text(&src[text_start..i]));
            }
            tokens.push(Token::Str(StrLit {
                raw: &src[i..end],
                value,
                quote: b as char,
            }));
            i = end;
            text_start = end;
            continue;
        }
        i += 1;
    }

    if text_start < src.len() {
        tokens.push(Token::Text(&src[text_start..]));
    }
    tokens
}

/// Encode `value` as a double-quoted JSON string literal.
pub(crate) fn encode(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// An apostrophe only opens a literal in value position, so prose such as
/// `don't` is left alone.
fn opens_single_quoted(src: &str, idx: usize) -> bool {
    match src[..idx].trim_end().chars().last() {
        None => true,
        Some(c) => matches!(c, '[' | '{' | ',' | ':' | '(' | '+'),
    }
}

/// Scan the literal opening at `start`. Returns the byte offset just past the
/// closing quote and the decoded value.
fn scan_string(src: &str, start: usize) -> Option<(usize, String)> {
    let quote = src.as_bytes()[start] as char;
    let body_start = start + 1;
    let mut value = String::new();
    let mut chars = src[body_start..].char_indices();

    while let Some((offset, c)) = chars.next() {
        if c == quote {
            return Some((body_start + offset + 1, value));
        }
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next()? {
            (_, 'n') => value.push('\n'),
            (_, 't') => value.push('\t'),
            (_, 'r') => value.push('\r'),
            (_, 'b') => value.push('\u{8}'),
            (_, 'f') => value.push('\u{c}'),
            (_, 'u') => {
                let code = read_hex4(&mut chars);
                match code {
                    Some(high @ 0xD800..=0xDBFF) => {
                        let mut look = chars.clone();
                        let low = match (look.next(), look.next()) {
                            (Some((_, '\\')), Some((_, 'u'))) => read_hex4(&mut look),
                            _ => None,
                        };
                        match low {
                            Some(low @ 0xDC00..=0xDFFF) => {
                                let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                                value.push(char::from_u32(combined).unwrap_or('\u{FFFD}'));
                                chars = look;
                            }
                            _ => value.push('\u{FFFD}'),
                        }
                    }
                    Some(code) => value.push(char::from_u32(code).unwrap_or('\u{FFFD}')),
                    None => value.push('\u{FFFD}'),
                }
            }
            // \" \\ \' \/ and anything unknown: keep the escaped char.
            (_, other) => value.push(other),
        }
    }
    None
}

fn read_hex4(chars: &mut std::str::CharIndices<'_>) -> Option<u32> {
    let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok()
}
