//! The engine: composition root tying the index, watcher, hub, and
//! orchestrator together behind one API.
//!
//! Every mutation the engine makes goes through the same reconcile routine
//! the watcher uses, so an engine write and an external edit produce
//! identical index updates and events, and the digest check keeps the
//! watcher's echo of an engine write silent.

use std::fs;
use std::sync::Arc;

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, VaultConfig};
use crate::hub::{BroadcastHub, Subscription};
use crate::orchestrator::{
    build_command_prompt, build_work_prompt, extract_tool_result, CommandKind, CommandOutcome,
    SessionHandle, SessionOrchestrator,
};
use crate::phase::{resolve_after_command, Phase};
use crate::status_cache::StatusCache;
use crate::task::{Task, TaskId};
use crate::vault::{TaskFilter, VaultIndex};
use crate::watcher::{self, RawChange, VaultSync, WatcherHandle};
use crate::{frontmatter, tdlog, tdlog_error, Error, Result};

pub struct Engine {
    sync: Arc<VaultSync>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let sync = Arc::new(VaultSync::new(
            config,
            Arc::new(VaultIndex::new()),
            Arc::new(StatusCache::new()),
            Arc::new(BroadcastHub::new()),
        ));
        Self { sync }
    }

    pub fn config(&self) -> &Config {
        &self.sync.config
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.sync.hub
    }

    pub fn vaults(&self) -> &[VaultConfig] {
        &self.sync.config.vaults
    }

    fn vault(&self, name: &str) -> Result<&VaultConfig> {
        self.sync
            .config
            .get_vault(name)
            .ok_or_else(|| Error::UnknownVault(name.to_string()))
    }

    /// Initial scan of every configured vault. A vault that fails to scan
    /// is logged and skipped so one bad path never blocks startup.
    pub fn rescan_all(&self) {
        for vault in &self.sync.config.vaults {
            match self.sync.rescan_vault(vault) {
                Ok(count) => {
                    tdlog!("Vault '{}': {} task(s)", vault.name, count);
                }
                Err(e) => {
                    tdlog_error!("Failed to scan vault '{}': {}", vault.name, e);
                }
            }
        }
    }

    /// Rebuild one vault's index and blocker cache.
    pub fn rescan(&self, vault: &str) -> Result<usize> {
        let vault = self.vault(vault)?;
        self.sync.rescan_vault(vault)
    }

    /// List tasks matching the filter, dropping blocked tasks unless asked
    /// to keep them.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let tasks = self.sync.index.list(filter);
        if filter.include_blocked {
            return tasks;
        }
        tasks
            .into_iter()
            .filter(|t| !self.sync.cache.is_blocked(t))
            .collect()
    }

    pub fn get_task(&self, vault: &str, id: &TaskId) -> Result<Task> {
        let vault = self.vault(vault)?;
        self.sync
            .index
            .get(&vault.name, id)
            .ok_or_else(|| Error::TaskNotFound {
                vault: vault.name.clone(),
                id: id.as_str().to_string(),
            })
    }

    /// Subscribe to the event stream, optionally scoped to one vault.
    pub fn subscribe(&self, scope: Option<String>) -> Result<Subscription> {
        if let Some(vault) = &scope {
            self.vault(vault)?;
        }
        Ok(self.sync.hub.subscribe(scope))
    }

    /// Start filesystem watchers for every vault.
    pub fn start_watchers(&self, cancel: CancellationToken) -> Result<WatcherHandle> {
        watcher::start(self.sync.clone(), cancel)
    }

    /// Move a task to another board column. Any column may move to any
    /// other; the only validation is that the target names a real phase.
    pub fn set_phase(&self, vault: &str, id: &TaskId, phase: &str) -> Result<()> {
        let phase =
            Phase::parse(phase).ok_or_else(|| Error::UnknownPhase(phase.to_string()))?;
        let vault = self.vault(vault)?.clone();
        let task = self.get_task(&vault.name, id)?;
        self.write_phase(&vault, &task, phase)
    }

    fn write_phase(&self, vault: &VaultConfig, task: &Task, phase: Phase) -> Result<()> {
        let content = read_lossy(&task.source_path)?;
        let updated = frontmatter::set_phase(&task.source_path, &content, phase)?;
        fs::write(&task.source_path, updated)?;
        self.sync
            .reconcile(vault, &RawChange::Upsert(task.source_path.clone()));
        Ok(())
    }

    /// Forget a task's session so the next start creates a fresh one.
    pub fn clear_session(&self, vault: &str, id: &TaskId) -> Result<()> {
        let vault = self.vault(vault)?.clone();
        let task = self.get_task(&vault.name, id)?;
        let content = read_lossy(&task.source_path)?;
        let updated = frontmatter::clear_session_id(&task.source_path, &content)?;
        fs::write(&task.source_path, updated)?;
        self.sync
            .reconcile(&vault, &RawChange::Upsert(task.source_path.clone()));
        Ok(())
    }

    fn orchestrator_for(&self, vault: &VaultConfig) -> Result<SessionOrchestrator> {
        SessionOrchestrator::new(&self.sync.config.effective_launcher(vault))
    }

    /// Path of the task file relative to the vault root, the form session
    /// prompts use.
    fn task_file_path(vault: &VaultConfig, id: &TaskId) -> String {
        format!("{}/{}.md", vault.tasks_folder, id.as_str())
    }

    /// Start a working session on a task, or hand back the existing one.
    ///
    /// A task that already carries a session id is a resume: the launcher
    /// is not invoked again, the caller just gets the resume command for
    /// the existing session. Otherwise a new session is created and its id
    /// is persisted into the frontmatter before this returns, so a crash
    /// after this point never orphans the session. A persist failure is
    /// therefore an error even though the session itself is running.
    pub async fn start_session(&self, vault: &str, id: &TaskId) -> Result<SessionHandle> {
        let vault = self.vault(vault)?.clone();
        let task = self.get_task(&vault.name, id)?;

        let cwd = task
            .project_path
            .clone()
            .or_else(|| vault.project_path.clone())
            .ok_or_else(|| Error::MissingProjectPath {
                task: id.as_str().to_string(),
            })?;
        let orchestrator = self.orchestrator_for(&vault)?;

        if let Some(session_id) = task.session_id.clone() {
            return Ok(SessionHandle {
                handoff_command: orchestrator.handoff_command(&session_id),
                session_id,
                working_dir: cwd,
                task_title: task.title,
            });
        }

        let prompt = build_work_prompt(&Self::task_file_path(&vault, id));
        let response = orchestrator.run(&prompt, &cwd, None).await?;

        if !response.is_success() {
            return Err(Error::CommandFailed {
                message: response.error_message().unwrap_or("session failed").to_string(),
            });
        }

        let session_id = response.session_id.ok_or_else(|| {
            Error::Orchestration("launcher returned no session id".to_string())
        })?;

        self.persist_session_id(&vault, &task, &session_id)
            .map_err(|e| Error::SessionPersist {
                session_id: session_id.clone(),
                reason: e.to_string(),
            })?;

        Ok(SessionHandle {
            handoff_command: orchestrator.handoff_command(&session_id),
            session_id,
            working_dir: cwd,
            task_title: task.title,
        })
    }

    /// Run a scripted slash command against a task, inside its existing
    /// session when one exists.
    ///
    /// A failed command moves the task to `human_review` no matter what
    /// the command itself intended, so the failure lands in front of a
    /// human. The outcome is returned rather than raised: the session ran,
    /// the command just didn't succeed. A launcher that fails to run at all
    /// is an error instead, and the phase is left alone.
    pub async fn execute_command(
        &self,
        vault: &str,
        id: &TaskId,
        kind: CommandKind,
    ) -> Result<CommandOutcome> {
        let vault = self.vault(vault)?.clone();
        let task = self.get_task(&vault.name, id)?;
        let orchestrator = self.orchestrator_for(&vault)?;

        let prompt = build_command_prompt(
            kind,
            &Self::task_file_path(&vault, id),
            Local::now().date_naive(),
        );
        let resume = task.session_id.as_deref();
        // commands run against vault files, so the vault root is the cwd
        let response = orchestrator.run(&prompt, &vault.path, resume).await?;

        let (success, error) = match (response.output(), response.error_message()) {
            (Some(output), _) => match extract_tool_result(output) {
                Some(result) => (result.success, result.error),
                None => (None, None),
            },
            (None, message) => (Some(false), message.map(str::to_string)),
        };

        if let Some(phase) = resolve_after_command(None, success != Some(false)) {
            if let Err(e) = self.write_phase(&vault, &task, phase) {
                tdlog_error!(
                    "Failed to move '{}' to {} after command failure: {}",
                    id.as_str(),
                    phase,
                    e
                );
            }
        }

        let session_id = response
            .session_id
            .clone()
            .or_else(|| task.session_id.clone())
            .ok_or_else(|| {
                Error::Orchestration("launcher returned no session id".to_string())
            })?;

        if task.session_id.is_none() {
            if let Err(e) = self.persist_session_id(&vault, &task, &session_id) {
                tdlog_error!("Failed to persist session id {}: {}", session_id, e);
            }
        }

        Ok(CommandOutcome {
            handoff_command: orchestrator.handoff_command(&session_id),
            session_id,
            executed_command: prompt,
            working_dir: vault.path.clone(),
            success,
            error,
        })
    }

    fn persist_session_id(
        &self,
        vault: &VaultConfig,
        task: &Task,
        session_id: &str,
    ) -> Result<()> {
        let content = read_lossy(&task.source_path)?;
        let updated = frontmatter::set_session_id(&task.source_path, &content, session_id)?;
        fs::write(&task.source_path, updated)?;
        self.sync
            .reconcile(vault, &RawChange::Upsert(task.source_path.clone()));
        tdlog!(
            "Session {} persisted to {}",
            session_id,
            task.source_path.display()
        );
        Ok(())
    }
}

fn read_lossy(path: &std::path::Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
