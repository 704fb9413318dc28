/// Execution Engine - Process-Level Execution
///
/// **Core Responsibility:**
/// Materialize source code into a private workspace, compile it, and run
/// processes with a hard wall-clock limit, capturing raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (workspace, process, pipes, timeouts)
/// - Engine does NOT know languages beyond the toolchain it is handed
/// - Engine does NOT evaluate correctness
///
/// **Resource Bounds:**
/// - Every process is killed when its timeout elapses (and on drop)
/// - stdout / stderr are each capped; the excess is drained and discarded
/// - The workspace directory is removed when the [`Workspace`] is dropped
use crate::config::Toolchain;
use crate::languages::{COMPILE_TIMEOUT, OUTPUT_LIMIT_BYTES};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Source code larger than this is refused before anything is written
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

/// How long to wait for pipe readers once the process itself is gone.
/// Orphaned grandchildren can hold a pipe open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Raw result of one process execution
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed or ended by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Per-job scratch directory holding the source file and build artifacts
pub struct Workspace {
    dir: TempDir,
    src: PathBuf,
    bin: PathBuf,
}

impl Workspace {
    pub async fn create(toolchain: &Toolchain, source_code: &str) -> Result<Self> {
        if source_code.len() > MAX_SOURCE_CODE_BYTES {
            bail!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
        }

        let dir = tempfile::Builder::new()
            .prefix("elite-")
            .tempdir()
            .context("Failed to create job workspace")?;
        let src = dir.path().join(&toolchain.source_file);
        let bin = dir.path().join("main");

        tokio::fs::write(&src, source_code)
            .await
            .with_context(|| format!("Failed to write {}", src.display()))?;

        Ok(Self { dir, src, bin })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Substitute this workspace's paths into a command template
    pub fn command(&self, template: &[String]) -> Vec<String> {
        Toolchain::expand(template, self.dir.path(), &self.src, &self.bin)
    }
}

/// Outcome of the optional build step
#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Ready,
    Failed(String),
}

/// Compile the workspace's source if the toolchain has a build step
pub async fn compile(workspace: &Workspace, toolchain: &Toolchain) -> Result<CompileOutcome> {
    compile_with_timeout(workspace, toolchain, COMPILE_TIMEOUT).await
}

pub async fn compile_with_timeout(
    workspace: &Workspace,
    toolchain: &Toolchain,
    timeout: Duration,
) -> Result<CompileOutcome> {
    let Some(template) = &toolchain.compile else {
        return Ok(CompileOutcome::Ready);
    };

    let argv = workspace.command(template);
    debug!(command = ?argv, "Compiling");
    let output = run_process(&argv, workspace.path(), None, timeout, OUTPUT_LIMIT_BYTES)
        .await
        .context("Failed to start compiler")?;

    if output.timed_out {
        return Ok(CompileOutcome::Failed(format!(
            "Compilation timed out after {}s",
            timeout.as_secs()
        )));
    }
    if output.exit_code != Some(0) {
        // javac and friends sometimes report on stdout
        let message = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        return Ok(CompileOutcome::Failed(message));
    }
    Ok(CompileOutcome::Ready)
}

/// Spawn `argv` in `cwd`, feed it `stdin`, and wait at most `timeout`.
///
/// A process still running at the deadline is killed and reported as
/// `timed_out`; that is not an error. `Err` means the process could not be
/// started or waited on at all.
pub async fn run_process(
    argv: &[String],
    cwd: &Path,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit: usize,
) -> Result<ProcessOutput> {
    let (program, args) = argv.split_first().context("Empty command")?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    if let (Some(mut pipe), Some(bytes)) = (child.stdin.take(), stdin) {
        tokio::spawn(async move {
            // The program may exit without reading all of its input
            let _ = pipe.write_all(&bytes).await;
            let _ = pipe.shutdown().await;
        });
    }

    let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_capped(pipe, output_limit)));
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_capped(pipe, output_limit)));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (status.context("Failed to wait for process")?.code(), false),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill timed-out process");
            }
            (None, true)
        }
    };
    let duration = started.elapsed();

    Ok(ProcessOutput {
        stdout: drain(stdout).await,
        stderr: drain(stderr).await,
        exit_code,
        timed_out,
        duration,
    })
}

/// Read up to `limit` bytes, then keep draining so the writer never blocks.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    if discarded > 0 {
        debug!(discarded, "Output exceeded capture limit");
    }
    Ok(buf)
}

async fn drain(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(_) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}
