//! Compiler process runner
//!
//! Runs the external compiler once per validation against a temporary copy
//! of the buffer, capturing stdout/stderr and the exit outcome. A failing
//! compiler is not an error here: its stdout is still returned because the
//! compiler reports diagnostics through it even when compilation fails.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Flag asking the compiler for machine-readable diagnostics
pub const SHOW_ERRORS_FLAG: &str = "--show-errors";

/// Suffix of the temporary input file handed to the compiler
const INPUT_FILE_SUFFIX: &str = ".py";

// ============================================================================
// Requests and Outcomes
// ============================================================================

/// One compiler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Buffer contents to compile
    pub source: String,

    /// Compiler executable
    pub executable: String,

    /// Arguments placed before the show-errors flag
    pub extra_args: Vec<String>,
}

/// How the compiler process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failed { code: i32 },
    Signaled { signal: i32 },
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ExitOutcome::Success,
            Some(code) => ExitOutcome::Failed { code },
            None => Self::from_signal(status),
        }
    }

    #[cfg(unix)]
    fn from_signal(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        ExitOutcome::Signaled {
            signal: status.signal().unwrap_or_default(),
        }
    }

    #[cfg(not(unix))]
    fn from_signal(_status: ExitStatus) -> Self {
        ExitOutcome::Failed { code: -1 }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

/// Captured result of one compiler run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOutput {
    pub stdout: String,
    pub stderr: String,
    pub outcome: ExitOutcome,
    /// Temporary file the compiler was pointed at (removed after the run)
    pub input_path: PathBuf,
}

/// Error types for compiler execution
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to prepare compiler input file: {0}")]
    InputFile(#[source] io::Error),

    #[error("Compiler executable not found: {executable}")]
    CompilerNotFound { executable: String },

    #[error("Failed to start compiler {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("Compiler did not finish within {timeout:?}")]
    Timeout { timeout: Duration },
}

// ============================================================================
// Runner Trait
// ============================================================================

/// Trait for running the external compiler
#[async_trait]
pub trait CompilerRunner: Send + Sync {
    async fn run(&self, request: CompileRequest) -> Result<CompilerOutput, ProcessError>;
}

/// Runs the compiler as a child process
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    timeout: Duration,
}

impl ExternalCompiler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CompilerRunner for ExternalCompiler {
    async fn run(&self, request: CompileRequest) -> Result<CompilerOutput, ProcessError> {
        // Each run gets its own file so concurrent validations never share input
        let input = tempfile::Builder::new()
            .prefix("lpython-lsp-")
            .suffix(INPUT_FILE_SUFFIX)
            .tempfile()
            .map_err(ProcessError::InputFile)?;
        tokio::fs::write(input.path(), request.source.as_bytes())
            .await
            .map_err(ProcessError::InputFile)?;

        let mut command = Command::new(&request.executable);
        command
            .args(&request.extra_args)
            .arg(SHOW_ERRORS_FLAG)
            .arg(input.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!(
            "Running compiler: {} {:?} {} {}",
            request.executable,
            request.extra_args,
            SHOW_ERRORS_FLAG,
            input.path().display()
        );

        let child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ProcessError::CompilerNotFound {
                    executable: request.executable.clone(),
                }
            } else {
                ProcessError::Spawn {
                    executable: request.executable.clone(),
                    source: e,
                }
            }
        })?;

        // Dropping the wait future on timeout kills the child (kill_on_drop)
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout {
                timeout: self.timeout,
            })??;

        let outcome = ExitOutcome::from_status(output.status);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            debug!("compiler stderr: {}", line);
        }

        match outcome {
            ExitOutcome::Success => {}
            ExitOutcome::Failed { code } => {
                warn!(
                    "Compiler {} exited with code {} ({} bytes of output)",
                    request.executable,
                    code,
                    stdout.len()
                );
            }
            ExitOutcome::Signaled { signal } => {
                warn!(
                    "Compiler {} was terminated by {} ({} bytes of output)",
                    request.executable,
                    signal_name(signal),
                    stdout.len()
                );
            }
        }

        Ok(CompilerOutput {
            stdout,
            stderr,
            outcome,
            input_path: input.path().to_path_buf(),
        })
    }
}

/// Human readable name for a termination signal
#[cfg(unix)]
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGTERM => "SIGTERM",
        libc::SIGBUS => "SIGBUS",
        _ => return format!("signal {signal}"),
    };
    name.to_string()
}

#[cfg(not(unix))]
pub fn signal_name(signal: i32) -> String {
    format!("signal {signal}")
}

// ============================================================================
// Mock Compiler
// ============================================================================

/// Scripted behaviour of one mock compiler run
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockRun {
    /// Exit normally with this stdout
    Stdout(String),
    /// Exit with a failure code and this stdout
    Failed { code: i32, stdout: String },
    /// Killed by SIGKILL without output
    Killed,
    /// Executable missing
    NotFound,
}

/// Compiler double that records requests and replays scripted runs
#[cfg(test)]
pub struct MockCompiler {
    scripted: std::sync::Mutex<std::collections::VecDeque<MockRun>>,
    fallback: MockRun,
    requests: std::sync::Mutex<Vec<CompileRequest>>,
    delay: Option<Duration>,
}

#[cfg(test)]
impl MockCompiler {
    /// Every run prints `stdout` and succeeds
    pub fn with_stdout(stdout: &str) -> Self {
        Self {
            scripted: std::sync::Mutex::new(std::collections::VecDeque::new()),
            fallback: MockRun::Stdout(stdout.to_string()),
            requests: std::sync::Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Runs replay `runs` in order, then fall back to an empty report
    pub fn scripted(runs: Vec<MockRun>) -> Self {
        let compiler = Self::with_stdout("{}");
        compiler.scripted.lock().unwrap().extend(runs);
        compiler
    }

    /// Make every run take `delay` before completing
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompileRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl CompilerRunner for MockCompiler {
    async fn run(&self, request: CompileRequest) -> Result<CompilerOutput, ProcessError> {
        let executable = request.executable.clone();
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let run = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (stdout, outcome) = match run {
            MockRun::Stdout(stdout) => (stdout, ExitOutcome::Success),
            MockRun::Failed { code, stdout } => (stdout, ExitOutcome::Failed { code }),
            MockRun::Killed => (String::new(), ExitOutcome::Signaled { signal: 9 }),
            MockRun::NotFound => return Err(ProcessError::CompilerNotFound { executable }),
        };

        Ok(CompilerOutput {
            stdout,
            stderr: String::new(),
            outcome,
            input_path: PathBuf::from("/tmp/lpython-lsp-mock.py"),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
