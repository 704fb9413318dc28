/// Test Evaluator - Language-Agnostic Judging Logic
///
/// **Core Responsibility:**
/// Compare raw execution outputs against expected outputs and classify each
/// test case, then aggregate the job's result.
///
/// **Critical Properties:**
/// - Knows nothing about processes or toolchains
/// - Knows nothing about the broker
/// - Pure function: (test cases, execution outputs) → result
///
/// **Classification (first match wins):**
/// 1. Timed out → `timeout`
/// 2. Non-zero exit → `runtime-error`
/// 3. Output mismatch → `wrong-answer`
///
/// **Comparison Rules:**
/// - Trailing whitespace (including the final newline) is ignored on both sides
/// - Leading and internal whitespace is significant
/// - Case sensitive, no floating-point tolerance
use crate::engine::ProcessOutput;
use chrono::Utc;
use elite_common::types::{ExecutionResult, FailureKind, Mode, TestCase, TestResult, Verdict};

/// Raw execution output for a single test case
/// Produced by the runner, consumed by the evaluator
#[derive(Debug, Clone, Default)]
pub struct TestExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub runtime_error: bool,
}

impl From<ProcessOutput> for TestExecutionOutput {
    fn from(output: ProcessOutput) -> Self {
        let runtime_error = !output.timed_out && output.exit_code != Some(0);
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            execution_time_ms: output.duration.as_millis() as u64,
            timed_out: output.timed_out,
            runtime_error,
        }
    }
}

fn normalize_output(output: &str) -> &str {
    output.trim_end()
}

/// Why a test case failed, if it did. Generate mode has no expected value,
/// so only a clean run matters there.
pub fn classify(output: &TestExecutionOutput, expected: &str, mode: Mode) -> FailureKind {
    if output.timed_out {
        FailureKind::Timeout
    } else if output.runtime_error {
        FailureKind::RuntimeError
    } else if mode == Mode::Generate || normalize_output(&output.stdout) == normalize_output(expected) {
        FailureKind::None
    } else {
        FailureKind::WrongAnswer
    }
}

pub fn evaluate_test(output: &TestExecutionOutput, test_case: &TestCase, mode: Mode) -> TestResult {
    let failure = classify(output, &test_case.expected, mode);
    TestResult {
        input: test_case.input.clone(),
        expected: test_case.expected.clone(),
        actual: normalize_output(&output.stdout).to_string(),
        passed: failure == FailureKind::None,
        stderr: output.stderr.clone(),
        failure,
        execution_time_ms: output.execution_time_ms,
    }
}

/// Evaluate every test case, in order, and build the aggregate result.
///
/// All cases are evaluated regardless of earlier failures. The verdict is
/// taken from the first failing case; `runtimeError` and `stderr` come from
/// the first case that crashed.
pub fn evaluate(
    job_id: &str,
    mode: Mode,
    test_cases: &[TestCase],
    outputs: Vec<TestExecutionOutput>,
) -> ExecutionResult {
    let results: Vec<TestResult> = test_cases
        .iter()
        .zip(outputs.iter())
        .map(|(test_case, output)| evaluate_test(output, test_case, mode))
        .collect();

    let all_passed = results.len() == test_cases.len() && results.iter().all(|r| r.passed);
    let verdict = if all_passed {
        Verdict::Accepted
    } else {
        results
            .iter()
            .find(|r| !r.passed)
            .map(|r| Verdict::from(r.failure))
            .unwrap_or(Verdict::RuntimeError)
    };

    let first_crash = results.iter().find(|r| r.failure == FailureKind::RuntimeError);
    let runtime_error = first_crash.is_some();
    let stderr = first_crash.map(|r| r.stderr.clone());

    let generated_results = (mode == Mode::Generate).then(|| {
        results
            .iter()
            .filter(|r| r.passed)
            .map(|r| TestCase::new(r.input.clone(), r.actual.clone()).bounded())
            .collect()
    });

    ExecutionResult {
        job_id: job_id.to_string(),
        mode,
        verdict: Some(verdict),
        results,
        all_passed,
        compilation_error: false,
        runtime_error,
        stderr,
        generated_results,
        error: None,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to create a test case
    fn make_test_case(expected: &str) -> TestCase {
        TestCase::new(vec!["input".to_string()], expected)
    }

    /// Helper to create a clean output
    fn make_output(stdout: &str, exec_time: u64) -> TestExecutionOutput {
        TestExecutionOutput {
            stdout: stdout.to_string(),
            execution_time_ms: exec_time,
            ..Default::default()
        }
    }

    fn crashed(stderr: &str) -> TestExecutionOutput {
        TestExecutionOutput {
            stderr: stderr.to_string(),
            runtime_error: true,
            ..Default::default()
        }
    }

    fn timed_out() -> TestExecutionOutput {
        TestExecutionOutput {
            timed_out: true,
            execution_time_ms: 1001,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output("hello \r\n\t"), "hello");
        assert_eq!(normalize_output("  hello"), "  hello");
        assert_eq!(normalize_output("a\nb\n"), "a\nb");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_exact_match() {
        let result = evaluate_test(&make_output("120\n", 42), &make_test_case("120"), Mode::Run);
        assert!(result.passed);
        assert_eq!(result.failure, FailureKind::None);
        assert_eq!(result.actual, "120");
        assert_eq!(result.execution_time_ms, 42);
    }

    #[test]
    fn test_trailing_whitespace_in_expected() {
        let result = evaluate_test(&make_output("5", 1), &make_test_case("5\n  "), Mode::Run);
        assert!(result.passed);
    }

    #[test]
    fn test_leading_whitespace_is_significant() {
        let result = evaluate_test(&make_output(" 5", 1), &make_test_case("5"), Mode::Run);
        assert_eq!(result.failure, FailureKind::WrongAnswer);
        assert_eq!(result.actual, " 5");
    }

    #[test]
    fn test_timeout_outranks_runtime_error() {
        let output = TestExecutionOutput {
            timed_out: true,
            runtime_error: true,
            ..Default::default()
        };
        assert_eq!(classify(&output, "x", Mode::Run), FailureKind::Timeout);
        assert_eq!(classify(&crashed("boom"), "", Mode::Run), FailureKind::RuntimeError);
    }

    #[test]
    fn test_from_process_output() {
        let output = TestExecutionOutput::from(ProcessOutput {
            exit_code: Some(1),
            ..Default::default()
        });
        assert!(output.runtime_error);

        let output = TestExecutionOutput::from(ProcessOutput {
            exit_code: None,
            timed_out: true,
            ..Default::default()
        });
        assert!(output.timed_out);
        assert!(!output.runtime_error);
    }

    #[test]
    fn test_all_pass() {
        let cases = vec![make_test_case("120"), make_test_case("6")];
        let result = evaluate("job", Mode::Submit, &cases, vec![make_output("120", 42), make_output("6\n", 38)]);

        assert!(result.all_passed);
        assert_eq!(result.verdict, Some(Verdict::Accepted));
        assert!(!result.runtime_error);
        assert!(result.stderr.is_none());
        assert!(result.generated_results.is_none());
        assert_eq!(result.results.len(), 2);
    }

    #[test]
    fn test_every_case_recorded_after_failures() {
        let cases = vec![
            make_test_case("1"),
            make_test_case("2"),
            make_test_case("3"),
            make_test_case("4"),
        ];
        let outputs = vec![
            make_output("1", 1),
            timed_out(),
            crashed("Segmentation fault"),
            make_output("wrong", 1),
        ];
        let result = evaluate("job", Mode::Run, &cases, outputs);

        let kinds: Vec<_> = result.results.iter().map(|r| r.failure).collect();
        assert_eq!(
            kinds,
            vec![
                FailureKind::None,
                FailureKind::Timeout,
                FailureKind::RuntimeError,
                FailureKind::WrongAnswer
            ]
        );
        assert!(!result.all_passed);
        assert_eq!(result.verdict, Some(Verdict::TimeLimitExceeded));
        assert!(result.runtime_error);
        assert_eq!(result.stderr.as_deref(), Some("Segmentation fault"));
    }

    #[test]
    fn test_first_runtime_error_wins() {
        let cases = vec![make_test_case("1"), make_test_case("2")];
        let result = evaluate("job", Mode::Run, &cases, vec![crashed("first"), crashed("second")]);
        assert_eq!(result.stderr.as_deref(), Some("first"));
        assert_eq!(result.verdict, Some(Verdict::RuntimeError));
    }

    #[test]
    fn test_missing_outputs_are_not_a_pass() {
        let cases = vec![make_test_case("1"), make_test_case("2")];
        let result = evaluate("job", Mode::Run, &cases, vec![make_output("1", 1)]);
        assert!(!result.all_passed);
        assert_ne!(result.verdict, Some(Verdict::Accepted));
    }

    #[test]
    fn test_generate_mode_records_outputs() {
        let cases = vec![
            TestCase::new(vec!["2 3".into()], ""),
            TestCase::new(vec!["9 9".into()], ""),
            TestCase::new(vec!["0 0".into()], ""),
        ];
        let outputs = vec![make_output("5\n", 1), timed_out(), make_output("0", 1)];
        let result = evaluate("job", Mode::Generate, &cases, outputs);

        let generated = result.generated_results.unwrap();
        assert_eq!(
            generated,
            vec![
                TestCase::new(vec!["2 3".into()], "5"),
                TestCase::new(vec!["0 0".into()], "0"),
            ]
        );
        assert!(!result.all_passed);
        assert!(result.results[0].passed);
    }
}
