use super::lexer::{encode, tokenize, Token};
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

/// Repetition count above which `"x".repeat(n)` / `"x" * n` is clamped.
pub const MAX_REPEAT: u64 = 500;
/// Maximum length, in characters, of a string produced by expansion.
pub const MAX_EXPANDED_CHARS: usize = 800;

lazy_static! {
    static ref REPEAT_SUFFIX: Regex =
        Regex::new(r"^\s*(?:\.repeat\(\s*(\d+)\s*\)|\*\s*(\d+))").expect("valid regex");
    static ref PLUS_ONLY: Regex = Regex::new(r"^\s*\+\s*$").expect("valid regex");
}

/// Stage 2: rewrite repeat and concatenation shorthand into string literals.
///
/// Handles `"x".repeat(n)`, `"x" * n` and chains joined with `+`, e.g.
/// `"100 " + "a".repeat(1000)`. Text that contains no shorthand is returned
/// borrowed and unchanged.
pub fn expand_shorthand(src: &str) -> Cow<'_, str> {
    let tokens = tokenize(src);
    let mut out = String::with_capacity(src.len());
    let mut changed = false;
    let mut i = 0;

    while i < tokens.len() {
        let first = match &tokens[i] {
            Token::Text(text) => {
                out.push_str(text);
                i += 1;
                continue;
            }
            Token::Str(lit) => lit,
        };

        let mut value = String::new();
        let mut rewritten = false;
        let mut j = i;
        let mut last = i;
        let tail;

        loop {
            let Token::Str(lit) = &tokens[j] else {
                tail = "";
                break;
            };
            let next_text = match tokens.get(j + 1) {
                Some(Token::Text(text)) => *text,
                _ => "",
            };

            let rest = match repeat_suffix(next_text) {
                Some((count, consumed)) => {
                    value.push_str(&repeat_capped(&lit.value, count));
                    rewritten = true;
                    &next_text[consumed..]
                }
                None => {
                    value.push_str(&lit.value);
                    next_text
                }
            };
            last = if next_text.is_empty() { j } else { j + 1 };

            if PLUS_ONLY.is_match(rest) && matches!(tokens.get(j + 2), Some(Token::Str(_))) {
                rewritten = true;
                j += 2;
                continue;
            }
            tail = rest;
            break;
        }

        if rewritten {
            out.push_str(&encode(&capped(&value)));
            changed = true;
        } else {
            out.push_str(first.raw);
        }
        out.push_str(tail);
        i = last + 1;
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(src)
    }
}

/// Parse a repeat suffix at the start of `text`: `(count, bytes consumed)`.
fn repeat_suffix(text: &str) -> Option<(u64, usize)> {
    let caps = REPEAT_SUFFIX.captures(text)?;
    let digits = caps.get(1).or_else(|| caps.get(2))?;
    // Absurdly long digit strings saturate and are clamped below.
    let count = digits.as_str().parse::<u64>().unwrap_or(u64::MAX);
    Some((count, caps.get(0)?.end()))
}

fn repeat_capped(unit: &str, count: u64) -> String {
    let count = count.min(MAX_REPEAT) as usize;
    let len = unit.chars().count().saturating_mul(count).min(MAX_EXPANDED_CHARS);
    unit.chars().cycle().take(len).collect()
}

fn capped(value: &str) -> String {
    value.chars().take(MAX_EXPANDED_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_string(src: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(src).expect("expanded text is JSON");
        value[0].as_str().unwrap().to_string()
    }

    #[test]
    fn test_no_shorthand_is_borrowed() {
        let src = r#"[{"input":["1 2"],"expected":"3"}]"#;
        assert!(matches!(expand_shorthand(src), Cow::Borrowed(_)));
    }

    #[test]
    fn test_js_repeat() {
        let out = expand_shorthand(r#"["ab".repeat(3)]"#);
        assert_eq!(out, r#"["ababab"]"#);
    }

    #[test]
    fn test_python_multiply() {
        let out = expand_shorthand(r#"["x" * 4, "y"]"#);
        assert_eq!(out, r#"["xxxx", "y"]"#);
    }

    #[test]
    fn test_concatenation_chain() {
        let out = expand_shorthand(r#"["100 " + "a".repeat(3) + "!"]"#);
        assert_eq!(first_string(&out), "100 aaa!");
    }

    #[test]
    fn test_repeat_count_is_capped() {
        let out = expand_shorthand(r#"["a".repeat(2000) + "b"]"#);
        let s = first_string(&out);
        // 500 repetitions, then the concatenated "b".
        assert_eq!(s.len(), 501);
        assert!(s.starts_with("aaaa"));
        assert!(s.ends_with('b'));
    }

    #[test]
    fn test_expanded_length_is_capped() {
        let out = expand_shorthand(r#"["abcd".repeat(400)]"#);
        assert_eq!(first_string(&out).chars().count(), MAX_EXPANDED_CHARS);

        let out = expand_shorthand(r#"["a".repeat(500) + "b".repeat(500)]"#);
        assert_eq!(first_string(&out).chars().count(), MAX_EXPANDED_CHARS);
    }

    #[test]
    fn test_huge_count_does_not_overflow() {
        let out = expand_shorthand(r#"["z".repeat(99999999999999999999999)]"#);
        assert_eq!(first_string(&out).len(), MAX_REPEAT as usize);
    }

    #[test]
    fn test_plus_inside_literal_untouched() {
        let src = r#"["a\" + \"b"]"#;
        assert_eq!(expand_shorthand(src), src);
    }

    #[test]
    fn test_single_quoted_repeat() {
        let out = expand_shorthand("['q'.repeat(2)]");
        assert_eq!(out, r#"["qq"]"#);
    }

    #[test]
    fn test_keys_and_values_in_objects() {
        let out = expand_shorthand(r#"[{"input": ["n" * 2], "expected": "ok"}]"#);
        assert_eq!(out, r#"[{"input": ["nn"], "expected": "ok"}]"#);
    }
}
