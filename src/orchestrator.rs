//! Headless launcher executor for coding-assistant sessions.
//!
//! Runs the configured launcher in non-interactive mode (`-p` with JSON
//! output), parses the response, and carries the session id back so work
//! can continue later: either headlessly with `--resume <id>`, or in the
//! user's terminal via the handoff command string.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{tdlog_debug, tdlog_warn, Error, Result};

/// Default timeout for launcher execution (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// The result of one headless run: output text on success, a message on
/// failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Success { output: String },
    Error { message: String },
}

/// Parsed response from one headless launcher run.
#[derive(Debug, Clone)]
pub struct LauncherResponse {
    /// Session id for later resumption, when the launcher reported one.
    pub session_id: Option<String>,
    pub result: ResultType,
}

impl LauncherResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.result, ResultType::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { output } => Some(output),
            ResultType::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { .. } => None,
            ResultType::Error { message } => Some(message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLauncherResponse {
    subtype: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Scripted command a session can run against a task file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    CompleteTask,
    DeferTask,
    CreateTask,
}

impl CommandKind {
    pub fn slash_name(&self) -> &'static str {
        match self {
            CommandKind::CompleteTask => "complete-task",
            CommandKind::DeferTask => "defer-task",
            CommandKind::CreateTask => "create-task",
        }
    }
}

/// Build the slash-command prompt for a task file.
///
/// All commands pass `--tool` so the session replies with a machine-readable
/// `{"success": ...}` blob. Deferral carries tomorrow's date as the new
/// defer date.
pub fn build_command_prompt(kind: CommandKind, task_file_path: &str, today: NaiveDate) -> String {
    match kind {
        CommandKind::DeferTask => {
            let tomorrow = today.succ_opt().unwrap_or(today);
            format!("/{} \"{}\" {} --tool", kind.slash_name(), task_file_path, tomorrow)
        }
        _ => format!("/{} \"{}\" --tool", kind.slash_name(), task_file_path),
    }
}

/// Prompt that starts interactive-style work on a task.
pub fn build_work_prompt(task_file_path: &str) -> String {
    format!("/work-on-task \"{}\"", task_file_path)
}

/// Machine-readable result embedded in a command session's output.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolResult {
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Pull the `{"success": ...}` blob out of free-form session output.
pub fn extract_tool_result(output: &str) -> Option<ToolResult> {
    let pattern = Regex::new(r#"\{[^}]*"success"[^}]*\}"#).expect("static regex");
    let blob = pattern.find(output)?.as_str();
    match serde_json::from_str(blob) {
        Ok(result) => Some(result),
        Err(e) => {
            tdlog_warn!("Unparseable tool result {:?}: {}", blob, e);
            None
        }
    }
}

/// Headless launcher executor.
///
/// The launcher is configured as a command line (binary plus optional
/// arguments); the binary is resolved once at construction.
#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    binary: PathBuf,
    base_args: Vec<String>,
    /// The configured launcher string, verbatim, for handoff commands.
    launcher_display: String,
    timeout: Duration,
}

impl SessionOrchestrator {
    /// Resolve the configured launcher command line.
    pub fn new(launcher: &str) -> Result<Self> {
        let mut parts = launcher.split_whitespace();
        let command = parts.next().ok_or_else(|| Error::LauncherNotFound {
            command: launcher.to_string(),
        })?;
        let binary = which::which(command).map_err(|_| Error::LauncherNotFound {
            command: command.to_string(),
        })?;
        Ok(Self {
            binary,
            base_args: parts.map(str::to_string).collect(),
            launcher_display: launcher.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Use an explicit binary path, skipping lookup. Used by tests and
    /// non-standard installs.
    pub fn with_binary(binary: PathBuf) -> Self {
        let display = binary.display().to_string();
        Self {
            binary,
            base_args: Vec::new(),
            launcher_display: display,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The command a user runs to pick the session up interactively.
    pub fn handoff_command(&self, session_id: &str) -> String {
        format!("{} --resume {}", self.launcher_display, session_id)
    }

    /// Run one prompt headlessly, optionally resuming an existing session.
    ///
    /// A parsed JSON envelope comes back as a response even when it reports
    /// failure; a non-zero exit without a parseable envelope means the
    /// launcher never ran properly and is an orchestration error.
    pub async fn run(
        &self,
        prompt: &str,
        cwd: &Path,
        resume: Option<&str>,
    ) -> Result<LauncherResponse> {
        tdlog_debug!(
            "Launcher run: cwd={}, resume={:?}, prompt={}",
            cwd.display(),
            resume,
            prompt
        );
        let mut command = Command::new(&self.binary);
        command.args(&self.base_args);
        if let Some(session_id) = resume {
            command.arg("--resume").arg(session_id);
        }
        let output = tokio::time::timeout(
            self.timeout,
            command
                .arg("-p")
                .arg(prompt)
                .arg("--output-format")
                .arg("json")
                .current_dir(cwd)
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
        .map_err(Error::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(response) = Self::parse_json_response(&stdout) {
            return Ok(response);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "launcher exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::Orchestration(message));
        }

        // non-JSON output from a zero exit; pass it through as success
        Ok(LauncherResponse {
            session_id: None,
            result: ResultType::Success {
                output: stdout.trim().to_string(),
            },
        })
    }

    /// Parse the launcher's JSON response envelope.
    pub fn parse_json_response(json_str: &str) -> Result<LauncherResponse> {
        let raw: RawLauncherResponse = serde_json::from_str(json_str)?;
        let result = match raw.subtype.as_deref() {
            Some("success") => ResultType::Success {
                output: raw.result.unwrap_or_default(),
            },
            Some("error") => ResultType::Error {
                message: raw.error.or(raw.result).unwrap_or_default(),
            },
            _ => {
                if let Some(error) = raw.error {
                    ResultType::Error { message: error }
                } else if let Some(result) = raw.result {
                    ResultType::Success { output: result }
                } else {
                    ResultType::Error {
                        message: "unknown response format".to_string(),
                    }
                }
            }
        };
        Ok(LauncherResponse {
            session_id: raw.session_id,
            result,
        })
    }
}

/// What a started session hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    /// Shell command to pick the session up interactively.
    pub handoff_command: String,
    pub working_dir: PathBuf,
    pub task_title: String,
}

/// Result of a scripted command run inside a session.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub session_id: String,
    pub handoff_command: String,
    /// The slash-command prompt that was sent.
    pub executed_command: String,
    pub working_dir: PathBuf,
    /// `None` when the session produced no machine-readable result.
    pub success: Option<bool>,
    pub error: Option<String>,
}
