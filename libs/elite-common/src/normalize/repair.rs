use serde_json::Value;

/// Byte offsets and values of every bracket outside string literals.
fn structural(src: &str) -> Vec<(usize, u8)> {
    let mut marks = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in src.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b']' | b'{' | b'}' => marks.push((i, b)),
            _ => {}
        }
    }
    marks
}

/// Stage 4a: cut a truncated payload back to its last complete record and
/// close every collection still open at that point.
///
/// A record counts as complete when its closing `}` returns to an enclosing
/// array. Returns `None` if no record was ever completed.
pub fn close_truncated(src: &str) -> Option<String> {
    let mut stack: Vec<u8> = Vec::new();
    let mut cut: Option<(usize, Vec<u8>)> = None;

    for (i, b) in structural(src) {
        match b {
            b'[' | b'{' => stack.push(b),
            b']' | b'}' => {
                let opener = if b == b']' { b'[' } else { b'{' };
                if stack.pop() != Some(opener) {
                    // Mismatched nesting is corruption, not truncation.
                    return None;
                }
                if b == b'}' && stack.last() == Some(&b'[') {
                    cut = Some((i + 1, stack.clone()));
                }
            }
            _ => {}
        }
    }

    let (end, open) = cut?;
    let mut repaired = src[..end].to_string();
    for opener in open.iter().rev() {
        repaired.push(if *opener == b'[' { ']' } else { '}' });
    }
    Some(repaired)
}

/// A record that could not be parsed on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub index: usize,
    pub reason: String,
}

/// Stage 4b: pull out every innermost `{...}` object and parse each one on
/// its own, keeping the ones that parse.
pub fn extract_records(src: &str) -> (Vec<Value>, Vec<Rejected>) {
    // (start offset, contains a nested object)
    let mut open: Vec<(usize, bool)> = Vec::new();
    let mut candidates: Vec<&str> = Vec::new();

    for (i, b) in structural(src) {
        match b {
            b'{' => {
                if let Some(parent) = open.last_mut() {
                    parent.1 = true;
                }
                open.push((i, false));
            }
            b'}' => {
                if let Some((start, nested)) = open.pop() {
                    if !nested {
                        candidates.push(&src[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => records.push(value),
            Err(e) => rejected.push(Rejected {
                index,
                reason: e.to_string(),
            }),
        }
    }
    (records, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_after_last_complete_record() {
        let src = r#"[{"input":["1"],"expected":"1"},{"input":["2"],"expected":"2"},{"input":["3"],"exp"#;
        let repaired = close_truncated(src).unwrap();
        assert_eq!(
            repaired,
            r#"[{"input":["1"],"expected":"1"},{"input":["2"],"expected":"2"}]"#
        );
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_close_inside_wrapper_object() {
        let src = r#"{"testCases":[{"input":["1"],"expected":"1"},{"inp"#;
        let repaired = close_truncated(src).unwrap();
        assert_eq!(repaired, r#"{"testCases":[{"input":["1"],"expected":"1"}]}"#);
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let src = r#"[{"input":["}]"],"expected":"{"},{"input":["#;
        let repaired = close_truncated(src).unwrap();
        assert_eq!(repaired, r#"[{"input":["}]"],"expected":"{"}]"#);
    }

    #[test]
    fn test_nothing_complete() {
        assert_eq!(close_truncated(r#"[{"input":["1"],"#), None);
        assert_eq!(close_truncated("no structure"), None);
    }

    #[test]
    fn test_extract_keeps_parseable_records() {
        let src = r#"[{"input":["1"],"expected":"1"} {"input":["2"] "expected":"2"}, junk {"input":["3"],"expected":"3"}"#;
        let (records, rejected) = extract_records(src);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["expected"], "3");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 1);
    }

    #[test]
    fn test_extract_prefers_innermost_objects() {
        let src = r#"{"tests": [{"input":["a"],"expected":"b"}], broken"#;
        let (records, rejected) = extract_records(src);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["input"][0], "a");
        assert!(rejected.is_empty());
    }
}
