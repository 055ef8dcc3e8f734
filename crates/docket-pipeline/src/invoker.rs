//! External tool invocation
//!
//! Every stage that shells out goes through [`ToolInvoker`]. The production
//! implementation spawns the tool with a structured argument vector; paths
//! and options are never interpolated into a shell string.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

use docket_core::{DocketConfig, Stage};

use crate::{PipelineError, Result};

/// One tool run: program prefix plus the flags the invoker appends.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Stage this run serves, used for logging and error classification
    pub stage: Stage,
    /// Program and any fixed leading arguments, e.g. `["python3", "-m", "lg_pipeline"]`
    pub program: Vec<String>,
    /// Tool mode, e.g. `docx`, `json`, `embed`
    pub mode: String,
    pub input: PathBuf,
    /// Omitted from the argument vector when the stage writes to an
    /// external store instead of a file
    pub output: Option<PathBuf>,
    /// Flat options appended as `--key value` pairs, in order
    pub options: Vec<(String, String)>,
    /// Environment handed to the child, for settings that must stay off
    /// the command line
    pub envs: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(
        stage: Stage,
        program: Vec<String>,
        mode: impl Into<String>,
        input: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stage,
            program,
            mode: mode.into(),
            input: input.into(),
            output: None,
            options: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Arguments appended after the program prefix.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--mode".to_string(),
            self.mode.clone(),
            "--input".to_string(),
            self.input.display().to_string(),
        ];
        if let Some(output) = &self.output {
            args.push("--output".to_string());
            args.push(output.display().to_string());
        }
        for (key, value) in &self.options {
            args.push(format!("--{}", key));
            args.push(value.clone());
        }
        args
    }
}

/// Captured result of a successful tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output, truncated to the capture limit
    pub stdout: String,
    /// Standard error, truncated to the capture limit
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: 0,
            duration_ms: 0,
        }
    }
}

/// Seam between the executor and the external tools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run one tool to completion.
    ///
    /// Returns `Ok` only for a zero exit; a non-zero exit, a spawn failure,
    /// and a blown time budget are all errors carrying the stage.
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutput>;
}

/// Production invoker backed by `tokio::process`.
pub struct SubprocessInvoker {
    /// Wall-clock budget per run; `None` disables the timeout
    timeout: Option<Duration>,
    /// Per-stream character budget for captured output
    capture_limit: usize,
}

impl SubprocessInvoker {
    pub fn new(timeout: Option<Duration>, capture_limit: usize) -> Self {
        Self {
            timeout,
            capture_limit,
        }
    }

    pub fn from_config(config: &DocketConfig) -> Self {
        Self::new(config.pipeline.stage_timeout(), config.tools.capture_limit)
    }
}

#[async_trait]
impl ToolInvoker for SubprocessInvoker {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutput> {
        let (program, prefix_args) =
            invocation
                .program
                .split_first()
                .ok_or_else(|| PipelineError::MissingConfig {
                    stage: invocation.stage,
                    what: "a tool command".to_string(),
                })?;
        let args = invocation.to_args();

        debug!(
            stage = %invocation.stage,
            program = %program,
            args = ?args,
            "Invoking tool"
        );

        let mut command = Command::new(program);
        command
            .args(prefix_args)
            .args(&args)
            .envs(invocation.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = command.spawn().map_err(|source| PipelineError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Dropping the wait future on expiry drops the child, and
        // kill_on_drop takes the process down with it.
        let output = match self.timeout {
            Some(budget) => match tokio::time::timeout(budget, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(PipelineError::StageTimeout {
                        stage: invocation.stage,
                        budget_secs: budget.as_secs(),
                    })
                }
            },
            None => child.wait_with_output().await?,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = truncate_capture(&String::from_utf8_lossy(&output.stdout), self.capture_limit);
        let stderr = truncate_capture(&String::from_utf8_lossy(&output.stderr), self.capture_limit);
        // A signal death has no code; -1 keeps it distinguishable from any
        // real exit status.
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(PipelineError::StageFailed {
                stage: invocation.stage,
                exit_code,
                stdout,
                stderr,
            });
        }

        info!(
            stage = %invocation.stage,
            program = %program,
            duration_ms = duration_ms,
            "Tool finished"
        );

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms,
        })
    }
}

/// Truncate captured output to `limit` characters, marking the cut.
pub fn truncate_capture(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{}... [truncated]", kept)
}
