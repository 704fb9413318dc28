// Language runners and the closed language -> runner dispatch
use crate::config::{InputChannel, LanguageConfigManager, Toolchain};
use crate::engine::{self, CompileOutcome, Workspace};
use crate::evaluator::TestExecutionOutput;
use crate::languages::{COMPILE_TIMEOUT, OUTPUT_LIMIT_BYTES};
use anyhow::Result;
use async_trait::async_trait;
use elite_common::types::{Language, TestCase};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What one runner needs to execute a job
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub source_code: &'a str,
    pub test_cases: &'a [TestCase],
    /// Per-test wall-clock limit
    pub timeout: Duration,
}

/// Raw runner output, before evaluation
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Build step failed; no test case ran
    CompilationFailed(String),
    /// One output per test case, in input order
    Executed(Vec<TestExecutionOutput>),
}

/// Compiles if necessary and executes the program once per test case.
///
/// A timeout or crash in one test case never stops the remaining ones.
/// `Err` is reserved for infrastructure failures (workspace, missing
/// toolchain binaries), never for the submitted program's behavior.
#[async_trait]
pub trait LanguageRunner: Send + Sync {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome>;
}

/// Runner for any language described by a [`Toolchain`]
pub struct ProcessRunner {
    language: Language,
    toolchain: Toolchain,
    compile_timeout: Duration,
    output_limit: usize,
}

impl ProcessRunner {
    pub fn new(language: Language, toolchain: Toolchain) -> Self {
        Self {
            language,
            toolchain,
            compile_timeout: COMPILE_TIMEOUT,
            output_limit: OUTPUT_LIMIT_BYTES,
        }
    }

    /// Build the command line and stdin for one test case
    fn invocation(&self, workspace: &Workspace, test_case: &TestCase) -> (Vec<String>, Option<Vec<u8>>) {
        let mut argv = workspace.command(&self.toolchain.run);
        match self.toolchain.input {
            InputChannel::Args => {
                argv.extend(test_case.input.iter().cloned());
                (argv, None)
            }
            InputChannel::Stdin => {
                let mut stdin = test_case.input.join("\n");
                stdin.push('\n');
                (argv, Some(stdin.into_bytes()))
            }
        }
    }
}

#[async_trait]
impl LanguageRunner for ProcessRunner {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome> {
        let workspace = Workspace::create(&self.toolchain, request.source_code).await?;

        if let CompileOutcome::Failed(message) =
            engine::compile_with_timeout(&workspace, &self.toolchain, self.compile_timeout).await?
        {
            info!(language = %self.language, "Compilation failed");
            return Ok(RunOutcome::CompilationFailed(message));
        }

        let mut outputs = Vec::with_capacity(request.test_cases.len());
        for (idx, test_case) in request.test_cases.iter().enumerate() {
            let (argv, stdin) = self.invocation(&workspace, test_case);
            let output = engine::run_process(&argv, workspace.path(), stdin, request.timeout, self.output_limit).await?;

            debug!(
                language = %self.language,
                test_num = idx + 1,
                exit_code = ?output.exit_code,
                timed_out = output.timed_out,
                execution_ms = output.duration.as_millis() as u64,
                "Test case executed"
            );
            outputs.push(TestExecutionOutput::from(output));
        }

        Ok(RunOutcome::Executed(outputs))
    }
}

/// Fixed mapping from every language to its runner
pub struct Dispatcher {
    cpp: Arc<dyn LanguageRunner>,
    java: Arc<dyn LanguageRunner>,
    python: Arc<dyn LanguageRunner>,
    rust: Arc<dyn LanguageRunner>,
}

impl Dispatcher {
    pub fn from_config(config: &LanguageConfigManager) -> Self {
        let runner = |language: Language| -> Arc<dyn LanguageRunner> {
            Arc::new(ProcessRunner::new(language, config.toolchain(language).clone()))
        };
        Self {
            cpp: runner(Language::Cpp),
            java: runner(Language::Java),
            python: runner(Language::Python),
            rust: runner(Language::Rust),
        }
    }

    pub fn runner_for(&self, language: Language) -> &dyn LanguageRunner {
        match language {
            Language::Cpp => self.cpp.as_ref(),
            Language::Java => self.java.as_ref(),
            Language::Python => self.python.as_ref(),
            Language::Rust => self.rust.as_ref(),
        }
    }
}
