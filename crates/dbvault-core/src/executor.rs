//! External tool execution for dump and restore commands
//!
//! Wraps a single subprocess invocation with:
//! - bounded capture of stdout/stderr
//! - optional timeout with the child killed on expiry
//! - exit-code inspection and output-file verification
//! - stderr classification into expected chatter and real warnings

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{stderr_tail, ToolFailure};

/// Default cap on captured output per stream (50 MiB).
pub const DEFAULT_MAX_BUFFER: usize = 50 * 1024 * 1024;

/// Lower-cased stderr fragments that indicate rejected credentials.
const AUTH_MARKERS: &[&str] = &[
    "access denied",
    "authentication failed",
    "password authentication failed",
    "auth error",
    "not authorized",
    "unauthorized",
];

/// A fully-specified external tool invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on the child only, never on this process
    pub env: BTreeMap<String, String>,
    /// File fed to the child's standard input
    pub stdin: Option<PathBuf>,
    /// Values masked when the command is rendered for logs
    secrets: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: None,
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds an argument containing a secret; it is masked in `Display`.
    pub fn secret_arg(mut self, arg: impl Into<String>, secret: &str) -> Self {
        self.args.push(arg.into());
        self.secrets.push(secret.to_string());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for secret in self.secrets.iter().filter(|s| !s.is_empty()) {
            masked = masked.replace(secret.as_str(), "****");
        }
        masked
    }
}

/// Shell-like rendering with secrets masked, e.g.
/// `mysql --host=localhost ... orders < /tmp/orders.sql`.
impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.env.keys() {
            write!(f, "{}=**** ", key)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", self.mask(arg))?;
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " < {}", stdin.display())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToolCommand({})", self)
    }
}

/// Executor limits.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bytes kept per stream; anything beyond is drained and dropped
    pub max_buffer: usize,
    pub timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
            timeout: None,
        }
    }
}

/// Captured stream contents.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
}

/// Outcome of a successful execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Stderr lines that did not match the tool's known-good output
    pub warnings: Vec<String>,
    pub output_truncated: bool,
}

/// Separates expected tool chatter from lines worth surfacing.
#[derive(Debug, Clone, Default)]
pub struct StderrClassifier {
    benign: Vec<&'static str>,
}

impl StderrClassifier {
    pub fn new(benign: &[&'static str]) -> Self {
        Self {
            benign: benign.to_vec(),
        }
    }

    pub fn is_benign(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.benign
            .iter()
            .any(|pattern| lower.contains(&pattern.to_lowercase()))
    }

    /// Returns the non-empty stderr lines that are not known-good output.
    pub fn warnings(&self, stderr: &str) -> Vec<String> {
        stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !self.is_benign(line))
            .map(str::to_string)
            .collect()
    }
}

/// Runs external tools on behalf of providers.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    config: ExecutorConfig,
}

impl ToolExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Spawns the command and waits for it, capturing bounded output.
    pub async fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolFailure> {
        debug!("Running: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(&cmd.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &cmd.stdin {
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    ToolFailure::Spawn(format!("cannot open {}: {}", path.display(), e))
                })?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolFailure::NotFound(cmd.program.clone())
            } else {
                ToolFailure::Spawn(format!("{}: {}", cmd.program, e))
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.max_buffer;

        let work = async {
            let (out, err, status) = tokio::join!(
                capture(stdout, limit),
                capture(stderr, limit),
                child.wait()
            );
            let status = status.map_err(|e| ToolFailure::Spawn(e.to_string()))?;
            let out = out.map_err(|e| ToolFailure::Spawn(e.to_string()))?;
            let err = err.map_err(|e| ToolFailure::Spawn(e.to_string()))?;
            Ok::<_, ToolFailure>(ToolOutput {
                status,
                stdout: out,
                stderr: err,
            })
        };

        match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    // `child` is dropped on return and killed via kill_on_drop.
                    warn!("{} timed out after {:?}, killing", cmd.program, limit);
                    Err(ToolFailure::TimedOut(limit))
                }
            },
            None => work.await,
        }
    }

    /// True only when the command spawns and exits zero. Never errors.
    pub async fn probe(&self, cmd: &ToolCommand) -> bool {
        match self.run(cmd).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("Probe {} failed: {}", cmd.program, e);
                false
            }
        }
    }

    /// Runs the command and applies the success rules: zero exit, and the
    /// expected output file present afterwards. Stderr that is not
    /// recognised as chatter is logged and returned as warnings.
    pub async fn execute(
        &self,
        cmd: &ToolCommand,
        classifier: &StderrClassifier,
        expected_output: Option<&Path>,
    ) -> Result<ExecutionReport, ToolFailure> {
        let output = self.run(cmd).await?;

        if !output.status.success() {
            let tail = stderr_tail(&output.stderr.text);
            let lower = tail.to_lowercase();
            if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
                return Err(ToolFailure::AuthFailed(tail));
            }
            return Err(ToolFailure::Exited {
                code: output.status.code(),
                stderr: tail,
            });
        }

        if let Some(path) = expected_output {
            if !path.is_file() {
                return Err(ToolFailure::MissingOutput(path.to_path_buf()));
            }
        }

        let warnings = classifier.warnings(&output.stderr.text);
        for line in &warnings {
            warn!("{}: {}", cmd.program, line);
        }

        Ok(ExecutionReport {
            warnings,
            output_truncated: output.stdout.truncated || output.stderr.truncated,
        })
    }
}

async fn capture<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> std::io::Result<Captured> {
    let Some(mut reader) = reader else {
        return Ok(Captured::default());
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok(Captured {
        text: String::from_utf8_lossy(&buf).into_owned(),
        truncated,
    })
}
