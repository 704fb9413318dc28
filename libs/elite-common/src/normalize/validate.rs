use crate::types::TestCase;
use serde_json::Value;

/// Any value longer than this rejects the whole record.
pub const MAX_RAW_CHARS: usize = 2000;

/// Stage 5: turn one parsed record into a bounded [`TestCase`].
///
/// The `Err` string says why the record was skipped.
pub fn validate_record(record: &Value) -> Result<TestCase, String> {
    let obj = record
        .as_object()
        .ok_or_else(|| format!("record is not an object: {}", kind_of(record)))?;

    let input = match obj.get("input") {
        None | Some(Value::Null) => return Err("missing input".to_string()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| stringify(item).ok_or_else(|| "null inside input".to_string()))
            .collect::<Result<Vec<_>, _>>()?,
        Some(scalar) => vec![stringify(scalar).ok_or_else(|| "missing input".to_string())?],
    };

    let expected = match obj.get("expected") {
        None | Some(Value::Null) => return Err("missing expected".to_string()),
        Some(value) => stringify(value).ok_or_else(|| "missing expected".to_string())?,
    };

    for value in input.iter().chain(std::iter::once(&expected)) {
        if value.contains(['\n', '\r']) {
            return Err("value contains a line break".to_string());
        }
        let len = value.chars().count();
        if len > MAX_RAW_CHARS {
            return Err(format!("value is {} characters long (limit {})", len, MAX_RAW_CHARS));
        }
    }

    Ok(TestCase::new(input, expected).bounded())
}

/// Strings pass through, other scalars use their JSON spelling and nested
/// structures become compact JSON. `null` has no string form.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_FIELD_CHARS;
    use serde_json::json;

    #[test]
    fn test_well_formed_record() {
        let tc = validate_record(&json!({"input": ["2 3"], "expected": "5"})).unwrap();
        assert_eq!(tc, TestCase::new(vec!["2 3".into()], "5"));
    }

    #[test]
    fn test_scalar_input_promoted() {
        let tc = validate_record(&json!({"input": "hello", "expected": "olleh"})).unwrap();
        assert_eq!(tc.input, vec!["hello"]);

        let tc = validate_record(&json!({"input": 42, "expected": 43})).unwrap();
        assert_eq!(tc.input, vec!["42"]);
        assert_eq!(tc.expected, "43");
    }

    #[test]
    fn test_non_string_values_stringified() {
        let tc = validate_record(&json!({"input": [1, true, [1, 2]], "expected": [3, 4]})).unwrap();
        assert_eq!(tc.input, vec!["1", "true", "[1,2]"]);
        assert_eq!(tc.expected, "[3,4]");
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(validate_record(&json!({"expected": "1"})).is_err());
        assert!(validate_record(&json!({"input": ["1"]})).is_err());
        assert!(validate_record(&json!({"input": ["1"], "expected": null})).is_err());
        assert!(validate_record(&json!(["1", "2"])).is_err());
    }

    #[test]
    fn test_line_breaks_rejected() {
        let err = validate_record(&json!({"input": ["1\n2"], "expected": "3"})).unwrap_err();
        assert!(err.contains("line break"));
        assert!(validate_record(&json!({"input": ["1"], "expected": "3\r"})).is_err());
    }

    #[test]
    fn test_length_limits() {
        let too_long = "x".repeat(MAX_RAW_CHARS + 1);
        assert!(validate_record(&json!({"input": [too_long], "expected": "1"})).is_err());

        let long = "y".repeat(1500);
        let tc = validate_record(&json!({"input": [long.clone()], "expected": long})).unwrap();
        assert_eq!(tc.input[0].chars().count(), MAX_FIELD_CHARS);
        assert_eq!(tc.expected.chars().count(), MAX_FIELD_CHARS);
    }
}
