/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one dequeued [`Job`] into its [`ExecutionResult`].
///
/// **Architecture:**
/// 1. Resolve the language tag through the closed [`Dispatcher`]
/// 2. Let the runner compile and execute (runner.rs / engine.rs)
/// 3. Let the evaluator judge the outputs (evaluator.rs)
///
/// Every path yields a result that can be published: unknown languages and
/// infrastructure failures become system errors, never a dropped job.
use crate::config::LanguageConfigManager;
use crate::evaluator;
use crate::runner::{Dispatcher, RunOutcome, RunRequest};
use elite_common::types::{clamp_timeout, ErrorKind, ExecutionResult, Job, SystemError, TestCase};
use std::time::Duration;
use tracing::{error, instrument, warn};

pub struct Executor {
    dispatcher: Dispatcher,
}

impl Executor {
    pub fn new(config: &LanguageConfigManager) -> Self {
        Self {
            dispatcher: Dispatcher::from_config(config),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, language = %job.language, mode = ?job.mode))]
    pub async fn execute(&self, job: &Job) -> ExecutionResult {
        let language = match job.parsed_language() {
            Ok(language) => language,
            Err(e) => {
                warn!(error = %e, "Unsupported language");
                return ExecutionResult::system_error(
                    &job.job_id,
                    job.mode,
                    SystemError::new(ErrorKind::UnsupportedLanguage, e.to_string()),
                );
            }
        };

        // Producers other than the gateway may skip bounding
        let test_cases: Vec<TestCase> = job.test_case.iter().cloned().map(TestCase::bounded).collect();
        let request = RunRequest {
            source_code: &job.code,
            test_cases: &test_cases,
            timeout: Duration::from_millis(clamp_timeout(job.timeout)),
        };

        match self.dispatcher.runner_for(language).run(request).await {
            Ok(RunOutcome::CompilationFailed(message)) => {
                ExecutionResult::compilation_failed(&job.job_id, job.mode, message)
            }
            Ok(RunOutcome::Executed(outputs)) => {
                for (idx, output) in outputs.iter().enumerate() {
                    if output.runtime_error {
                        warn!(
                            test_num = idx + 1,
                            execution_time_ms = output.execution_time_ms,
                            "Execution failed with runtime error; test cannot pass"
                        );
                    }
                    if output.timed_out {
                        warn!(
                            test_num = idx + 1,
                            execution_time_ms = output.execution_time_ms,
                            "Execution timed out; test cannot pass"
                        );
                    }
                }
                evaluator::evaluate(&job.job_id, job.mode, &test_cases, outputs)
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Execution infrastructure failure");
                ExecutionResult::system_error(
                    &job.job_id,
                    job.mode,
                    SystemError::new(ErrorKind::Internal, format!("{:#}", e)),
                )
            }
        }
    }
}
