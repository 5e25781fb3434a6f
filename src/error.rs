use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Task has no project path: {task}")]
    MissingProjectPath { task: String },

    #[error("Launcher not found: {command}")]
    LauncherNotFound { command: String },

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Task not found: {vault}/{id}")]
    TaskNotFound { vault: String, id: String },

    #[error("Unknown vault: {0}")]
    UnknownVault(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Watcher degraded: {0}")]
    WatcherDegraded(String),

    #[error("Session {session_id} created but not persisted: {reason}")]
    SessionPersist { session_id: String, reason: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No home directory")]
    NoHomeDir,
}

pub type Result<T> = std::result::Result<T, Error>;
