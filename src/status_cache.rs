//! Blocker status lookup.
//!
//! `blocked_by` entries are wikilinks naming other notes in the vault. To
//! decide whether a blocker is still open we keep a per-vault map from note
//! stem to status, built by scanning the vault's status folders. A link that
//! resolves to a note with any status other than `completed` blocks; a link
//! that resolves to nothing does not block at all, so a dangling reference
//! never wedges a task.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::VaultConfig;
use crate::task::{Status, Task};
use crate::vault::collect_markdown;
use crate::{frontmatter, tdlog_debug, Result};

type StemMap = HashMap<String, Status>;

/// Per-vault map from note stem to status.
#[derive(Debug, Default)]
pub struct StatusCache {
    inner: RwLock<HashMap<String, Arc<StemMap>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the vault's status folders and rebuild its map.
    ///
    /// Only the `status` frontmatter field is read; files that fail to
    /// decode are ignored so one broken note never hides the rest.
    pub fn load_vault(&self, vault: &VaultConfig) -> Result<usize> {
        let mut map = StemMap::new();
        for dir in vault.status_dirs() {
            let mut files: Vec<PathBuf> = Vec::new();
            if collect_markdown(&dir, &mut files).is_err() {
                continue;
            }
            for path in files {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Ok(bytes) = fs::read(&path) else {
                    continue;
                };
                let content = String::from_utf8_lossy(&bytes);
                let Ok(decoded) = frontmatter::decode(&path, &content) else {
                    continue;
                };
                if let Some(status) = decoded.get_str("status") {
                    map.insert(stem.to_string(), Status::from_raw(status));
                }
            }
        }

        let count = map.len();
        self.inner
            .write()
            .unwrap()
            .insert(vault.name.clone(), Arc::new(map));
        tdlog_debug!(
            "Status cache for '{}' rebuilt: {} note(s)",
            vault.name,
            count
        );
        Ok(count)
    }

    pub fn get_status(&self, vault: &str, stem: &str) -> Option<Status> {
        self.inner
            .read()
            .unwrap()
            .get(vault)?
            .get(stem)
            .cloned()
    }

    pub fn invalidate(&self, vault: &str) {
        self.inner.write().unwrap().remove(vault);
    }

    /// Point update for one note, applied when a change event lands so the
    /// cache tracks the vault without a full rescan. `None` removes the
    /// entry.
    pub fn update(&self, vault: &str, stem: &str, status: Option<Status>) {
        let mut vaults = self.inner.write().unwrap();
        let current = vaults.entry(vault.to_string()).or_default();
        let mut map = StemMap::clone(current);
        match status {
            Some(status) => {
                map.insert(stem.to_string(), status);
            }
            None => {
                map.remove(stem);
            }
        }
        *current = Arc::new(map);
    }

    /// Whether one `blocked_by` entry is an open blocker.
    pub fn is_blocking(&self, vault: &str, link: &str) -> bool {
        let Some(stem) = link_stem(link) else {
            return false;
        };
        match self.get_status(vault, &stem) {
            Some(status) => status != Status::Completed,
            None => false,
        }
    }

    /// Whether any of the task's blockers is still open.
    pub fn is_blocked(&self, task: &Task) -> bool {
        task.blocked_by
            .iter()
            .any(|link| self.is_blocking(&task.vault, link))
    }
}

/// Extract the note stem from a wikilink. `[[Design doc|the doc]]` and a
/// bare `Design doc` both resolve to `Design doc`; path prefixes are
/// dropped because the cache is keyed by stem.
fn link_stem(link: &str) -> Option<String> {
    let inner = link
        .trim()
        .strip_prefix("[[")
        .and_then(|s| s.strip_suffix("]]"))
        .unwrap_or_else(|| link.trim());
    let target = inner.split('|').next()?.trim();
    let stem = target.rsplit('/').next()?.trim();
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}
