use super::lexer::{tokenize, Token};
use lazy_static::lazy_static;
use regex::Regex;

const FENCE: &str = "```";

lazy_static! {
    static ref OPEN_FENCE: Regex = Regex::new(r"^```[A-Za-z]*[ \t]*\r?\n?").expect("valid regex");
    static ref CONTENT_PREFIX: Regex = Regex::new(r"^\s*content:\s*'?").expect("valid regex");
}

/// Stage 1: strip narrative and code fencing around the array-like payload.
///
/// Returns `None` when nothing that could hold test cases remains.
pub fn isolate_payload(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    let fences = fence_positions(text);
    if let Some(first) = fences.iter().position(|&at| opens_line(text, at)) {
        let open = fences[first];
        let body = open + OPEN_FENCE.find(&text[open..]).map_or(FENCE.len(), |m| m.end());
        text = match fences[first + 1..].iter().find(|&&at| at >= body) {
            Some(&close) => text[body..close].trim(),
            // Fence opened but never closed: the reply was cut off.
            None => text[body..].trim(),
        };
    }

    if let Some(prefix) = CONTENT_PREFIX.find(text) {
        text = text[prefix.end()..].trim();
    }

    let start = text.find(['[', '{'])?;
    let text = &text[start..];

    // Drop trailing prose after the last closing bracket. A payload that was
    // cut off mid-record keeps its tail for truncation repair.
    let end = text.rfind([']', '}']).map(|i| i + 1).unwrap_or(text.len());
    let tail = &text[end..];
    let payload = if tail.trim_start().starts_with(['"', ',', '\'']) {
        text
    } else {
        &text[..end]
    };

    let payload = payload.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

/// Byte offsets of every fence that sits outside a string literal.
fn fence_positions(text: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut offset = 0;
    for token in tokenize(text) {
        match token {
            Token::Text(chunk) => {
                positions.extend(chunk.match_indices(FENCE).map(|(i, _)| offset + i));
                offset += chunk.len();
            }
            Token::Str(lit) => offset += lit.raw.len(),
        }
    }
    positions
}

/// Only whitespace precedes `at` on its line.
fn opens_line(text: &str, at: usize) -> bool {
    let line_start = text[..at].rfind('\n').map_or(0, |i| i + 1);
    text[line_start..at].trim().is_empty()
}
