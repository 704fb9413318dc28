use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound, in characters, for every test input element and expected value
/// that reaches a runner.
pub const MAX_FIELD_CHARS: usize = 1000;

/// Per-test timeout bounds, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_TIMEOUT_MS: u64 = 10_000;

/// Clamp a requested per-test timeout into the supported range.
pub fn clamp_timeout(requested_ms: u64) -> u64 {
    requested_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// Truncate `value` to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

/// Closed set of languages the judge can execute.
///
/// Adding a variant is a compile-time change: every exhaustive `match` over
/// `Language` (toolchain defaults, runner dispatch) has to be extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "C++", alias = "cpp", alias = "c++", alias = "cxx", alias = "CPP")]
    Cpp,
    #[serde(rename = "Java", alias = "java")]
    Java,
    #[serde(rename = "Python", alias = "python", alias = "python3", alias = "py")]
    Python,
    #[serde(rename = "Rust", alias = "rust", alias = "rs")]
    Rust,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Cpp, Language::Java, Language::Python, Language::Rust];

    /// Lowercase identifier used for configuration keys and log fields.
    pub fn slug(&self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::Rust => "rust",
        }
    }

    pub fn is_compiled(&self) -> bool {
        match self {
            Language::Cpp | Language::Java | Language::Rust => true,
            Language::Python => false,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Cpp => "C++",
            Language::Java => "Java",
            Language::Python => "Python",
            Language::Rust => "Rust",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LanguageError {
    #[error("unsupported language: {0:?}")]
    Unsupported(String),
}

impl FromStr for Language {
    type Err = LanguageError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_lowercase().as_str() {
            "c++" | "cpp" | "cxx" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "python3" | "py" => Ok(Language::Python),
            "rust" | "rs" => Ok(Language::Rust),
            _ => Err(LanguageError::Unsupported(tag.to_string())),
        }
    }
}

/// Execution mode requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Sample subset of the problem's cases.
    #[default]
    Run,
    /// Full canonical case list.
    Submit,
    /// Run reference code and record its outputs as expected values.
    Generate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Vec<String>,
    pub expected: String,
}

impl TestCase {
    pub fn new(input: Vec<String>, expected: impl Into<String>) -> Self {
        Self {
            input,
            expected: expected.into(),
        }
    }

    /// Apply defensive truncation to every field.
    pub fn bounded(self) -> Self {
        Self {
            input: self
                .input
                .iter()
                .map(|value| truncate_chars(value, MAX_FIELD_CHARS))
                .collect(),
            expected: truncate_chars(&self.expected, MAX_FIELD_CHARS),
        }
    }
}

/// Job envelope as it travels through the queue.
///
/// `language` stays a raw tag on the wire so that a worker can answer an
/// unknown tag with an explicit verdict instead of failing to decode the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub job_id: String,
    pub code: String,
    pub language: String,
    #[serde(rename = "testCase")]
    pub test_case: Vec<TestCase>,
    /// Per-test timeout in milliseconds.
    pub timeout: u64,
    #[serde(default)]
    pub mode: Mode,
}

impl Job {
    pub fn new(
        language: Language,
        code: impl Into<String>,
        test_case: Vec<TestCase>,
        timeout: u64,
        mode: Mode,
    ) -> Self {
        Self {
            job_id: String::new(),
            code: code.into(),
            language: language.to_string(),
            test_case,
            timeout,
            mode,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    /// Assign a fresh correlation id unless one is already present.
    pub fn ensure_job_id(&mut self) -> &str {
        if self.job_id.trim().is_empty() {
            self.job_id = Uuid::new_v4().to_string();
        }
        &self.job_id
    }

    pub fn parsed_language(&self) -> Result<Language, LanguageError> {
        self.language.parse()
    }
}

/// Why a single test case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    #[default]
    None,
    WrongAnswer,
    Timeout,
    RuntimeError,
}

/// Aggregate classification of a judged job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
}

impl From<FailureKind> for Verdict {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::None => Verdict::Accepted,
            FailureKind::WrongAnswer => Verdict::WrongAnswer,
            FailureKind::Timeout => Verdict::TimeLimitExceeded,
            FailureKind::RuntimeError => Verdict::RuntimeError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub input: Vec<String>,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default)]
    pub failure: FailureKind,
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// System-level failure categories. These are never a statement about the
/// correctness of the submitted program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Normalization,
    QueueUnavailable,
    BrokerTimeout,
    UnsupportedLanguage,
    Internal,
}

impl ErrorKind {
    /// Wire name, also used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Normalization => "normalization",
            ErrorKind::QueueUnavailable => "queue-unavailable",
            ErrorKind::BrokerTimeout => "broker-timeout",
            ErrorKind::UnsupportedLanguage => "unsupported-language",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SystemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error message sent by the gateway when a request could not be judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub job_id: Option<String>,
    pub error: SystemError,
}

/// Aggregate result published by a worker and relayed verbatim to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub results: Vec<TestResult>,
    #[serde(rename = "allPassed")]
    pub all_passed: bool,
    #[serde(rename = "compilationError", default)]
    pub compilation_error: bool,
    #[serde(rename = "runtimeError", default)]
    pub runtime_error: bool,
    /// Compiler diagnostics, or stderr of the first failing run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(rename = "generatedResults", default, skip_serializing_if = "Option::is_none")]
    pub generated_results: Option<Vec<TestCase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SystemError>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn compilation_failed(job_id: impl Into<String>, mode: Mode, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            mode,
            verdict: Some(Verdict::CompilationError),
            results: Vec::new(),
            all_passed: false,
            compilation_error: true,
            runtime_error: false,
            stderr: Some(message.into()),
            generated_results: None,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn system_error(job_id: impl Into<String>, mode: Mode, error: SystemError) -> Self {
        Self {
            job_id: job_id.into(),
            mode,
            verdict: None,
            results: Vec::new(),
            all_passed: false,
            compilation_error: false,
            runtime_error: false,
            stderr: None,
            generated_results: None,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    pub fn is_system_error(&self) -> bool {
        self.error.is_some()
    }
}
