//! External command execution for pipeline stages
//!
//! A [`StageRunner`] launches one external unit of work at a time, streams
//! its stdout/stderr into the job log, and waits for it while watching the
//! job's cancellation token. Setting the token kills the child immediately.
//!
//! Process launching sits behind the [`CommandExecutor`] trait so tests can
//! script the external tools.

use crate::error::PipelineError;
use crate::models::ProgressSink;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One external command
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl AsRef<Path>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.as_ref().to_string_lossy().into_owned(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Space-joined program and arguments, as written to the job log
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// File name of the program ("spectrast" for "/opt/tpp/bin/spectrast")
    pub fn program_name(&self) -> &str {
        self.program.rsplit('/').next().unwrap_or(&self.program)
    }
}

/// Terminal state of one external command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed,
    Cancelled,
    /// Non-zero exit; -1 when killed by a signal
    Failed { exit_code: i32 },
}

/// Append-only transcript of a job (`log.txt` or `rerun-log.txt`)
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl JobLog {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and flush so tailing readers see it
    pub fn line(&self, text: &str) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{}", text).and_then(|_| file.flush()) {
            warn!(log = %self.path.display(), "Failed to write job log: {}", e);
        }
    }

    /// Stdout and stderr handles that write straight into the log
    pub fn stdio(&self) -> std::io::Result<(Stdio, Stdio)> {
        let file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        Ok((Stdio::from(file.try_clone()?), Stdio::from(file.try_clone()?)))
    }

    pub fn flush(&self) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.flush() {
            warn!(log = %self.path.display(), "Failed to flush job log: {}", e);
        }
    }
}

/// Launches external commands
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `invocation` to completion, or kill it once `token` is set
    ///
    /// Returns `ExternalToolUnavailable` when the program cannot be launched.
    async fn execute(
        &self,
        invocation: &Invocation,
        log: &JobLog,
        token: &CancellationToken,
    ) -> Result<ExecOutcome, PipelineError>;
}

/// [`CommandExecutor`] backed by real OS processes
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// How long a killed child may take to be reaped before we stop waiting
    poll_interval: Duration,
}

impl ProcessExecutor {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        invocation: &Invocation,
        log: &JobLog,
        token: &CancellationToken,
    ) -> Result<ExecOutcome, PipelineError> {
        if token.is_cancelled() {
            return Ok(ExecOutcome::Cancelled);
        }

        let (stdout, stderr) = log.stdio()?;
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        for key in &invocation.env_remove {
            command.env_remove(key);
        }

        let mut child = command.spawn().map_err(|e| {
            PipelineError::ExternalToolUnavailable(format!("{}: {}", invocation.program, e))
        })?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                log.flush();
                if status.success() {
                    Ok(ExecOutcome::Completed)
                } else {
                    Ok(ExecOutcome::Failed { exit_code: status.code().unwrap_or(-1) })
                }
            }
            _ = token.cancelled() => {
                if let Err(e) = child.start_kill() {
                    warn!(program = %invocation.program, "Failed to kill cancelled process: {}", e);
                }
                if tokio::time::timeout(self.poll_interval, child.wait()).await.is_err() {
                    warn!(program = %invocation.program, "Cancelled process not reaped within {:?}", self.poll_interval);
                }
                log.flush();
                Ok(ExecOutcome::Cancelled)
            }
        }
    }
}

/// Runs the external commands of one job
#[derive(Clone)]
pub struct StageRunner {
    executor: Arc<dyn CommandExecutor>,
    log: JobLog,
    token: CancellationToken,
    job: String,
}

impl StageRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        log: JobLog,
        token: CancellationToken,
        job: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            log,
            token,
            job: job.into(),
        }
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast when the token is already set
    pub fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.token.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Execute and classify, recording a failure into `sink`
    pub async fn execute(
        &self,
        invocation: &Invocation,
        sink: &ProgressSink,
    ) -> Result<ExecOutcome, PipelineError> {
        let command_line = invocation.command_line();
        self.log
            .line(&format!("Running pipeline command: {}", command_line));
        debug!(job = %self.job, command = %command_line, "Launching external command");

        let outcome = match self
            .executor
            .execute(invocation, &self.log, &self.token)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                sink.fail(command_line, -1);
                return Err(e);
            }
        };

        match outcome {
            ExecOutcome::Completed => {}
            ExecOutcome::Cancelled => {
                info!(job = %self.job, program = %invocation.program_name(), "External command killed on cancellation");
                sink.fail("Killed", -1);
            }
            ExecOutcome::Failed { exit_code } => {
                warn!(job = %self.job, command = %command_line, exit_code, "External command failed");
                sink.fail(command_line, exit_code);
            }
        }
        Ok(outcome)
    }

    /// Execute; any outcome other than success becomes an error
    pub async fn run(
        &self,
        invocation: &Invocation,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        match self.execute(invocation, sink).await? {
            ExecOutcome::Completed => Ok(()),
            ExecOutcome::Cancelled => Err(PipelineError::Cancelled),
            ExecOutcome::Failed { exit_code } => Err(PipelineError::StageExecutionFailed {
                command: invocation.command_line(),
                exit_code,
            }),
        }
    }

    /// Execute a per-sample step whose failure only drops that sample
    ///
    /// Returns `Ok(false)` on a non-zero exit, leaving `sink` untouched.
    pub async fn run_tolerant(&self, invocation: &Invocation) -> Result<bool, PipelineError> {
        let command_line = invocation.command_line();
        self.log
            .line(&format!("Running pipeline command: {}", command_line));

        match self
            .executor
            .execute(invocation, &self.log, &self.token)
            .await?
        {
            ExecOutcome::Completed => Ok(true),
            ExecOutcome::Cancelled => Err(PipelineError::Cancelled),
            ExecOutcome::Failed { exit_code } => {
                warn!(job = %self.job, command = %command_line, exit_code, "Sample step failed, skipping sample");
                Ok(false)
            }
        }
    }
}
