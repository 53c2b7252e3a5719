//! Bounded external command execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use rereg_core::{HostError, HostResult};
use tokio::process::Command;
use tracing::debug;

/// An external command with a deadline.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Zero means no deadline.
    pub timeout: Duration,
    /// Substrings masked when the command line is displayed.
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::ZERO,
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Never show `secret` in [`CommandSpec::display`] output.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Command line safe for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        for secret in &self.secrets {
            line = line.replace(secret.as_str(), "<redacted>");
        }
        line
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, or -1 if the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, falling back to stdout.
    pub fn diagnostic(&self) -> String {
        let pick = |s: &str| {
            s.lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(String::from)
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit code {}", self.exit_code))
    }
}

/// Run `spec` to completion, capturing output.
///
/// A non-zero exit is returned as output, not as an error; only launch
/// failures and timeouts are errors.
pub async fn run(spec: &CommandSpec) -> HostResult<CommandOutput> {
    let start = Instant::now();
    debug!(command = %spec.display(), "Running command");

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HostError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

    let output = if spec.timeout.is_zero() {
        child.wait_with_output().await?
    } else {
        tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| HostError::Timeout {
                program: spec.program.clone(),
                secs: spec.timeout.as_secs(),
            })??
    };

    let result = CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    debug!(
        program = %spec.program,
        exit_code = result.exit_code,
        duration_ms = result.duration_ms,
        "Command finished"
    );
    Ok(result)
}

/// Quote `value` as a PowerShell single-quoted string literal.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Run a PowerShell script non-interactively.
pub async fn powershell(script: &str, timeout: Duration) -> HostResult<CommandOutput> {
    let spec = CommandSpec::new("powershell.exe")
        .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
        .arg(script)
        .timeout(timeout);
    run(&spec).await
}
