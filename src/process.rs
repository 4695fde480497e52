//! External tool invocation (ffmpeg, exiftool, jpegoptim)
//!
//! Every call goes through [`ProcessRunner`] and comes back as a typed
//! [`ProcessOutcome`]. The system runner bounds each call with a timeout and
//! kills the child when the wait is abandoned, so a hung decoder cannot stall
//! a worker pool.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Captured output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Why an external process did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessFailure {
    /// The executable could not be started at all.
    Launch(String),
    /// The process ran and exited unsuccessfully.
    Exit { code: Option<i32>, stderr: String },
    /// Waiting on the child failed.
    Wait(String),
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessFailure::Launch(e) => write!(f, "launch failed: {}", e),
            ProcessFailure::Exit { code: Some(code), stderr } => {
                write!(f, "exit code {}: {}", code, stderr.trim())
            }
            ProcessFailure::Exit { code: None, stderr } => {
                write!(f, "terminated by signal: {}", stderr.trim())
            }
            ProcessFailure::Wait(e) => write!(f, "wait failed: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Success(ProcessOutput),
    Failed(ProcessFailure),
    TimedOut(Duration),
}

impl ProcessOutcome {
    /// Convert into the crate error taxonomy, naming the program for context.
    pub fn into_result(self, program: &str) -> Result<ProcessOutput> {
        match self {
            ProcessOutcome::Success(output) => Ok(output),
            ProcessOutcome::Failed(failure) => Err(PipelineError::ExternalProcess {
                program: program.to_string(),
                failure,
            }),
            ProcessOutcome::TimedOut(after) => Err(PipelineError::Timeout {
                program: program.to_string(),
                after,
            }),
        }
    }
}

/// Synchronous, bounded external-process capability.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> ProcessOutcome;
}

/// Runs real processes on a private tokio runtime.
///
/// The runtime is owned by the runner and shut down when the runner drops.
pub struct SystemRunner {
    runtime: Runtime,
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("asset-update-proc")
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to start process runtime: {}", e)))?;

        Ok(Self { runtime, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Handle to the owned runtime, for signal listeners and similar tasks.
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> ProcessOutcome {
        debug!("exec {} {}", program, args.join(" "));
        self.runtime.block_on(run_bounded(program, args, self.timeout))
    }
}

async fn run_bounded(program: &str, args: &[String], limit: Duration) -> ProcessOutcome {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => return ProcessOutcome::Failed(ProcessFailure::Launch(e.to_string())),
    };

    // Dropping the wait future on timeout drops the child, which kills it.
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Err(_) => ProcessOutcome::TimedOut(limit),
        Ok(Err(e)) => ProcessOutcome::Failed(ProcessFailure::Wait(e.to_string())),
        Ok(Ok(output)) if !output.status.success() => ProcessOutcome::Failed(ProcessFailure::Exit {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Ok(Ok(output)) => ProcessOutcome::Success(ProcessOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        }),
    }
}

/// Argument builder for a single tool invocation.
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn execute(self, runner: &dyn ProcessRunner) -> Result<ProcessOutput> {
        runner.run(&self.program, &self.args).into_result(&self.program)
    }
}
