use super::lexer::{encode, tokenize, Token};
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref TRAILING_COMMA: Regex = Regex::new(r",(\s*[\]}])").expect("valid regex");
    static ref BARE_KEY: Regex = Regex::new(r"([{,]\s*)([A-Za-z_]\w*)\s*:").expect("valid regex");
    static ref PY_LITERAL: Regex = Regex::new(r"\b(None|True|False)\b").expect("valid regex");
}

/// Stage 3: single quotes become double quotes, bare keys get quoted, trailing
/// separators are removed and Python literals become their JSON spelling.
pub fn fix_quoting(src: &str) -> Cow<'_, str> {
    let mut out = String::with_capacity(src.len() + 16);
    let mut changed = false;

    for token in tokenize(src) {
        match token {
            Token::Str(lit) if lit.quote == '\'' => {
                out.push_str(&encode(&lit.value));
                changed = true;
            }
            Token::Str(lit) => out.push_str(lit.raw),
            Token::Text(text) => {
                let fixed = fix_text(text);
                changed |= matches!(fixed, Cow::Owned(_));
                out.push_str(&fixed);
            }
        }
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(src)
    }
}

fn fix_text(text: &str) -> Cow<'_, str> {
    let text = TRAILING_COMMA.replace_all(text, "$1");

    let keyed = match BARE_KEY.replace_all(&text, "$1\"$2\":") {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    };
    let text = keyed.map(Cow::Owned).unwrap_or(text);

    let literals = match PY_LITERAL.replace_all(&text, |caps: &regex::Captures<'_>| match &caps[1] {
        "None" => "null",
        "True" => "true",
        _ => "false",
    }) {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    };
    literals.map(Cow::Owned).unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(src: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(src).is_ok()
    }

    #[test]
    fn test_valid_json_is_borrowed() {
        let src = r#"[{"input": ["1 2"], "expected": "3"}]"#;
        assert!(matches!(fix_quoting(src), Cow::Borrowed(_)));
    }

    #[test]
    fn test_single_quotes_converted() {
        let out = fix_quoting("[{'input': ['it\\'s'], 'expected': 'say \"hi\"'}]");
        assert_eq!(out, r#"[{"input": ["it's"], "expected": "say \"hi\""}]"#);
        assert!(parses(&out));
    }

    #[test]
    fn test_bare_keys_quoted() {
        let out = fix_quoting(r#"[{input: ["5"], expected: "5"}, { input : ["6"],expected:"6"}]"#);
        assert!(parses(&out), "{out}");
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[1]["expected"], "6");
    }

    #[test]
    fn test_trailing_commas_removed() {
        let out = fix_quoting("[{\"input\": [\"1\",], \"expected\": \"1\",},\n]");
        assert!(parses(&out), "{out}");
    }

    #[test]
    fn test_text_inside_strings_untouched() {
        let src = r#"[{"input": ["{a: 1,}"], "expected": "True"}]"#;
        assert_eq!(fix_quoting(src), src);
    }

    #[test]
    fn test_python_literals() {
        let out = fix_quoting(r#"[{"input": [True, None], "expected": False}]"#);
        assert_eq!(out, r#"[{"input": [true, null], "expected": false}]"#);
    }
}
