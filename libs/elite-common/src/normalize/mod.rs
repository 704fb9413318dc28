//! Test case normalizer.
//!
//! **Responsibility:** Turn loosely structured test-case text (typically an
//! LLM reply: fenced, single-quoted, using `"x".repeat(n)`, cut off mid-way)
//! into the canonical ordered `Vec<TestCase>`.
//!
//! Input that already parses as a case list is taken as is. Otherwise stages
//! run in order and each one is only tried when the previous ones did not
//! yield parseable structure:
//!
//! 1. [`isolate_payload`] strips narrative and code fences
//! 2. [`expand_shorthand`] rewrites repeat / concatenation shorthand
//! 3. [`fix_quoting`] fixes quotes, bare keys and trailing commas
//! 4. parse, then [`close_truncated`], then [`extract_records`]
//! 5. [`validate_record`] on every candidate
//!
//! The normalizer never panics past this boundary: it returns a non-empty
//! list or a [`NormalizeError`].
mod extract;
mod lexer;
mod quoting;
mod repair;
mod shorthand;
mod validate;

pub use extract::isolate_payload;
pub use quoting::fix_quoting;
pub use repair::{close_truncated, extract_records};
pub use shorthand::{expand_shorthand, MAX_EXPANDED_CHARS, MAX_REPEAT};
pub use validate::{validate_record, MAX_RAW_CHARS};

use crate::types::{ErrorKind, SystemError, TestCase};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Keys under which a wrapper object may hold the case array.
const WRAPPER_KEYS: [&str; 3] = ["testCases", "testCase", "tests"];

/// Which stage first produced parseable structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Direct,
    Shorthand,
    Quoting,
    TruncationRepair,
    RecordExtraction,
}

/// Why a record was skipped. `index` is the record's position among the
/// candidates of the winning stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub index: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    fn record(index: usize, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "record {}: {}", index, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized {
    pub cases: Vec<TestCase>,
    pub diagnostics: Vec<Diagnostic>,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("test case text is empty")]
    Empty,
    #[error("no test case structure found: {0}")]
    Unparseable(String),
    #[error("no valid test cases ({} skipped)", .0.len())]
    NoValidCases(Vec<Diagnostic>),
}

impl NormalizeError {
    pub fn to_system_error(&self) -> SystemError {
        let mut message = self.to_string();
        if let NormalizeError::NoValidCases(diagnostics) = self {
            for diagnostic in diagnostics.iter().take(5) {
                message.push_str("; ");
                message.push_str(&diagnostic.to_string());
            }
        }
        SystemError::new(ErrorKind::Normalization, message)
    }
}

/// Run every stage over `raw`.
pub fn normalize(raw: &str) -> Result<Normalized, NormalizeError> {
    if raw.trim().is_empty() {
        return Err(NormalizeError::Empty);
    }
    if let Some(records) = parse_records(raw.trim()) {
        return finish(records, Vec::new(), Stage::Direct);
    }

    let payload = isolate_payload(raw)
        .ok_or_else(|| NormalizeError::Unparseable("no array or object in input".to_string()))?;

    if let Some(records) = parse_records(&payload) {
        return finish(records, Vec::new(), Stage::Direct);
    }

    let expanded = expand_shorthand(&payload);
    if let Some(records) = parse_records(&expanded) {
        return finish(records, Vec::new(), Stage::Shorthand);
    }

    let fixed = fix_quoting(&expanded);
    if let Some(records) = parse_records(&fixed) {
        return finish(records, Vec::new(), Stage::Quoting);
    }

    if let Some(records) = close_truncated(&fixed).and_then(|closed| parse_records(&closed)) {
        return finish(records, Vec::new(), Stage::TruncationRepair);
    }

    let (records, rejected) = extract_records(&fixed);
    if records.is_empty() && rejected.is_empty() {
        return Err(NormalizeError::Unparseable(
            "payload is neither a list nor a sequence of records".to_string(),
        ));
    }
    let diagnostics = rejected
        .into_iter()
        .map(|r| Diagnostic::record(r.index, format!("unparseable record: {}", r.reason)))
        .collect();
    finish(records, diagnostics, Stage::RecordExtraction)
}

/// Parse `text` and pull out the record list, if it has one.
fn parse_records(text: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Some(items);
                }
            }
            if map.contains_key("input") {
                Some(vec![Value::Object(map)])
            } else {
                None
            }
        }
        _ => None,
    }
}

fn finish(
    records: Vec<Value>,
    mut diagnostics: Vec<Diagnostic>,
    stage: Stage,
) -> Result<Normalized, NormalizeError> {
    let mut cases = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        match validate_record(record) {
            Ok(case) => cases.push(case),
            Err(reason) => {
                warn!(index, reason = %reason, "Skipping test case");
                diagnostics.push(Diagnostic::record(index, reason));
            }
        }
    }

    if cases.is_empty() {
        return Err(NormalizeError::NoValidCases(diagnostics));
    }

    debug!(stage = ?stage, cases = cases.len(), skipped = diagnostics.len(), "Normalized test cases");
    Ok(Normalized {
        cases,
        diagnostics,
        stage,
    })
}
