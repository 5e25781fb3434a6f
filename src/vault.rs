//! Per-vault task index.
//!
//! Maps task ids to records for every configured vault. Readers always see a
//! complete snapshot: `rescan` builds the new index fully before swapping it
//! in, and single-record updates clone-and-swap under the vault's writer
//! lock. Listing order is priority rank ascending with ties broken by scan
//! sequence, which is stable (sorted directory walk) rather than arbitrary
//! so tests and clients can rely on it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::config::VaultConfig;
use crate::phase::Phase;
use crate::task::{Status, Task, TaskId};
use crate::{frontmatter, tdlog_debug, tdlog_warn, Error, Result};

/// Listing predicate set. Empty/None members match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub vaults: Option<Vec<String>>,
    pub statuses: Option<Vec<Status>>,
    pub phases: Option<Vec<Phase>>,
    pub assignee: Option<String>,
    /// Include tasks whose defer date is in the future.
    pub include_deferred: bool,
    /// Include tasks with open blockers. Applied by the engine, which owns
    /// the blocker cache; the index itself ignores it.
    pub include_blocked: bool,
}

#[derive(Debug, Clone, Default)]
struct VaultSnapshot {
    tasks: HashMap<TaskId, Task>,
    next_seq: u64,
}

/// Thread-safe index of all vaults.
#[derive(Debug, Default)]
pub struct VaultIndex {
    inner: RwLock<HashMap<String, Arc<VaultSnapshot>>>,
}

impl VaultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the vault's tasks folder and replace its index wholesale.
    ///
    /// The new snapshot is fully built before the swap, so a concurrent
    /// reader never observes a partially-scanned vault. Files that fail to
    /// parse are skipped with a warning, never fatal.
    pub fn rescan(&self, vault: &VaultConfig) -> Result<usize> {
        let tasks_dir = vault.tasks_dir();
        let mut files = Vec::new();
        collect_markdown(&tasks_dir, &mut files)?;

        let mut snapshot = VaultSnapshot::default();
        for path in files {
            match load_task(vault, &path) {
                Ok(mut task) => {
                    task.seq = snapshot.next_seq;
                    snapshot.next_seq += 1;
                    snapshot.tasks.insert(task.id.clone(), task);
                }
                Err(e) => {
                    tdlog_warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        let count = snapshot.tasks.len();
        self.inner
            .write()
            .unwrap()
            .insert(vault.name.clone(), Arc::new(snapshot));
        tdlog_debug!("Rescanned vault '{}': {} task(s)", vault.name, count);
        Ok(count)
    }

    /// Insert or replace a single record. A new id gets the next scan
    /// sequence; an existing id keeps its position.
    pub fn upsert(&self, vault: &str, mut task: Task) {
        let mut vaults = self.inner.write().unwrap();
        let current = vaults.entry(vault.to_string()).or_default();
        let mut snapshot = VaultSnapshot::clone(current);
        match snapshot.tasks.get(&task.id) {
            Some(existing) => task.seq = existing.seq,
            None => {
                task.seq = snapshot.next_seq;
                snapshot.next_seq += 1;
            }
        }
        snapshot.tasks.insert(task.id.clone(), task);
        *current = Arc::new(snapshot);
    }

    /// Remove a record, returning it if present.
    pub fn remove(&self, vault: &str, id: &TaskId) -> Option<Task> {
        let mut vaults = self.inner.write().unwrap();
        let current = vaults.get_mut(vault)?;
        let mut snapshot = VaultSnapshot::clone(current);
        let removed = snapshot.tasks.remove(id);
        if removed.is_some() {
            *current = Arc::new(snapshot);
        }
        removed
    }

    /// Apply a rename: drop the old id and insert the renamed record in one
    /// snapshot swap.
    pub fn rename(&self, vault: &str, old_id: &TaskId, mut task: Task) {
        let mut vaults = self.inner.write().unwrap();
        let current = vaults.entry(vault.to_string()).or_default();
        let mut snapshot = VaultSnapshot::clone(current);
        let old_seq = snapshot.tasks.remove(old_id).map(|t| t.seq);
        match old_seq {
            Some(seq) => task.seq = seq,
            None => {
                task.seq = snapshot.next_seq;
                snapshot.next_seq += 1;
            }
        }
        snapshot.tasks.insert(task.id.clone(), task);
        *current = Arc::new(snapshot);
    }

    pub fn get(&self, vault: &str, id: &TaskId) -> Option<Task> {
        self.inner
            .read()
            .unwrap()
            .get(vault)?
            .tasks
            .get(id)
            .cloned()
    }

    pub fn contains(&self, vault: &str, id: &TaskId) -> bool {
        self.inner
            .read()
            .unwrap()
            .get(vault)
            .is_some_and(|s| s.tasks.contains_key(id))
    }

    /// Digest of the indexed record, used for touch-only write suppression.
    pub fn digest(&self, vault: &str, id: &TaskId) -> Option<u64> {
        self.inner
            .read()
            .unwrap()
            .get(vault)?
            .tasks
            .get(id)
            .map(|t| t.digest)
    }

    pub fn task_count(&self, vault: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .get(vault)
            .map_or(0, |s| s.tasks.len())
    }

    /// List tasks as of today. See [`VaultIndex::list_as_of`].
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        self.list_as_of(filter, Local::now().date_naive())
    }

    /// List tasks with an explicit "today" for defer-date eligibility.
    pub fn list_as_of(&self, filter: &TaskFilter, today: NaiveDate) -> Vec<Task> {
        let vaults = self.inner.read().unwrap();
        let names: Vec<String> = match &filter.vaults {
            Some(selected) => selected.clone(),
            None => {
                let mut all: Vec<String> = vaults.keys().cloned().collect();
                all.sort();
                all
            }
        };

        let mut result: Vec<Task> = Vec::new();
        for name in names {
            let Some(snapshot) = vaults.get(&name) else {
                continue;
            };
            for task in snapshot.tasks.values() {
                if !matches_filter(task, filter, today) {
                    continue;
                }
                result.push(task.clone());
            }
        }
        result.sort_by(|a, b| {
            (a.priority_rank(), &a.vault, a.seq).cmp(&(b.priority_rank(), &b.vault, b.seq))
        });
        result
    }
}

fn matches_filter(task: &Task, filter: &TaskFilter, today: NaiveDate) -> bool {
    if let Some(statuses) = &filter.statuses {
        if !statuses.contains(&task.status) {
            return false;
        }
    }
    if let Some(phases) = &filter.phases {
        if !phases.contains(&task.display_phase()) {
            return false;
        }
    }
    if let Some(assignee) = &filter.assignee {
        if task.assignee.as_deref() != Some(assignee.as_str()) {
            return false;
        }
    }
    if !filter.include_deferred && task.is_deferred(today) {
        return false;
    }
    true
}

/// Read and decode one task file into a record.
pub fn load_task(vault: &VaultConfig, path: &Path) -> Result<Task> {
    let rel = path
        .strip_prefix(vault.tasks_dir())
        .map_err(|_| Error::Parse {
            path: path.to_path_buf(),
            reason: "file is outside the vault's tasks folder".to_string(),
        })?;
    let id = TaskId::from_rel_path(rel).ok_or_else(|| Error::Parse {
        path: path.to_path_buf(),
        reason: "not a task file".to_string(),
    })?;

    // Tolerate non-UTF-8 files the way the vault ecosystem does: decode
    // lossily rather than reject.
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let decoded = frontmatter::decode(path, &content)?;
    let modified_date = fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);

    Ok(Task::from_decoded(
        &vault.name,
        id,
        path.to_path_buf(),
        &content,
        &decoded,
        modified_date,
    ))
}

/// Sorted recursive walk, which is what makes scan sequence stable.
pub(crate) fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
    Ok(())
}
