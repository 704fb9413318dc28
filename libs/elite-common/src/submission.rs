//! Client submission message and its translation into a queued [`Job`].
//!
//! Shared by every producer (the gateway's WebSocket and the CLI's job
//! files) so validation, defaults and bounding stay in one place.

use crate::types::{clamp_timeout, ErrorKind, Job, Mode, SystemError, TestCase, DEFAULT_TIMEOUT_MS};
use serde::Deserialize;

/// One submission as sent by a client.
///
/// Field aliases keep older clients (`editorCode`, `selectedLanguage`) working.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(alias = "editorCode")]
    pub code: String,
    #[serde(alias = "selectedLanguage")]
    pub language: String,
    #[serde(rename = "testCase", alias = "testCases", default)]
    pub test_case: Vec<TestCase>,
    /// Per-test timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub mode: Mode,
}

impl Submission {
    pub fn parse(text: &str) -> Result<Self, SystemError> {
        serde_json::from_str(text)
            .map_err(|e| SystemError::new(ErrorKind::Validation, format!("Malformed submission: {}", e)))
    }

    /// Build the queue envelope.
    ///
    /// The language tag is forwarded as-is; a worker answers unknown tags
    /// with an explicit unsupported-language result.
    pub fn into_job(self) -> Result<Job, SystemError> {
        if self.code.trim().is_empty() {
            return Err(SystemError::new(ErrorKind::Validation, "Source code is empty"));
        }
        if self.language.trim().is_empty() {
            return Err(SystemError::new(ErrorKind::Validation, "Language is missing"));
        }
        if self.test_case.is_empty() {
            return Err(SystemError::new(ErrorKind::Validation, "At least one test case is required"));
        }

        Ok(Job {
            job_id: self.job_id.filter(|id| !id.trim().is_empty()).unwrap_or_default(),
            code: self.code,
            language: self.language.trim().to_string(),
            test_case: self.test_case.into_iter().map(TestCase::bounded).collect(),
            timeout: clamp_timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)),
            mode: self.mode,
        })
    }
}

/// Best-effort `job_id` from a message or queue entry that failed to parse
pub fn recover_job_id(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("job_id")?
        .as_str()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
