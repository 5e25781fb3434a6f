//! Filesystem watching and event reconciliation.
//!
//! One notify watcher per vault feeds raw changes over a channel into a
//! single tokio drain task. The drain task pairs split rename halves by
//! their platform tracker id, coalesces bursts per path (a save is often
//! several raw events) and then reconciles each settled path against the
//! index, which is where raw changes become semantic events: created,
//! modified, deleted, or moved. Reconciliation is also the write path for
//! the engine's own mutations, so every index update and published event
//! flows through the same routine.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, VaultConfig};
use crate::hub::{BroadcastHub, TaskEvent};
use crate::status_cache::StatusCache;
use crate::task::TaskId;
use crate::vault::{load_task, VaultIndex};
use crate::{tdlog, tdlog_debug, tdlog_error, tdlog_trace, tdlog_warn, Error, Result};

/// Raw change for one path, before reconciliation against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    Upsert(PathBuf),
    Remove(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
}

impl RawChange {
    /// Path the change settles on, used as the coalescing key.
    fn key(&self) -> &Path {
        match self {
            RawChange::Upsert(p) | RawChange::Remove(p) => p,
            RawChange::Rename { to, .. } => to,
        }
    }
}

enum WatchMessage {
    Change {
        vault: String,
        change: RawChange,
        /// Platform rename cookie, set only on split rename halves.
        tracker: Option<usize>,
    },
    Degraded {
        vault: String,
        reason: String,
    },
}

fn is_markdown(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("md")
}

/// Map one notify event to raw changes, keeping only task-file paths.
///
/// Platform watchers disagree on rename reporting: a two-path `Both` event
/// becomes a single rename here, while inotify-style split `From`/`To`
/// halves come out as a remove plus an upsert and are paired back into a
/// rename downstream by their tracker id. Access events are noise and
/// dropped.
pub fn map_event(event: &Event) -> Vec<RawChange> {
    match &event.kind {
        NotifyKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| is_markdown(p))
            .map(|p| RawChange::Upsert(p.clone()))
            .collect(),
        NotifyKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| is_markdown(p))
            .map(|p| RawChange::Remove(p.clone()))
            .collect(),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let from = event.paths[0].clone();
            let to = event.paths[1].clone();
            match (is_markdown(&from), is_markdown(&to)) {
                (true, true) => vec![RawChange::Rename { from, to }],
                (true, false) => vec![RawChange::Remove(from)],
                (false, true) => vec![RawChange::Upsert(to)],
                (false, false) => Vec::new(),
            }
        }
        NotifyKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .filter(|p| is_markdown(p))
            .map(|p| RawChange::Remove(p.clone()))
            .collect(),
        NotifyKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| is_markdown(p))
            .map(|p| RawChange::Upsert(p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Shared state the reconciler needs: the index, the blocker cache, and the
/// hub to publish on.
#[derive(Debug)]
pub struct VaultSync {
    pub config: Config,
    pub index: Arc<VaultIndex>,
    pub cache: Arc<StatusCache>,
    pub hub: Arc<BroadcastHub>,
}

impl VaultSync {
    pub fn new(
        config: Config,
        index: Arc<VaultIndex>,
        cache: Arc<StatusCache>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            config,
            index,
            cache,
            hub,
        }
    }

    /// Full rebuild of one vault's index and blocker cache.
    pub fn rescan_vault(&self, vault: &VaultConfig) -> Result<usize> {
        let count = self.index.rescan(vault)?;
        self.cache.load_vault(vault)?;
        Ok(count)
    }

    /// Reconcile one settled path against the index and publish whatever
    /// semantic event the comparison yields.
    ///
    /// The rules, in order:
    /// - a parse failure keeps the stale record and publishes nothing;
    /// - a write with an unchanged digest publishes nothing, which both
    ///   suppresses touch-only saves and keeps the engine's own writes from
    ///   echoing back through the watcher;
    /// - a rename of an indexed id is `moved`, otherwise the new side is a
    ///   plain create;
    /// - a missing file that was indexed is `deleted`.
    pub fn reconcile(&self, vault: &VaultConfig, change: &RawChange) {
        match change {
            RawChange::Upsert(path) => self.reconcile_path(vault, path, None),
            RawChange::Remove(path) => self.reconcile_removed(vault, path),
            RawChange::Rename { from, to } => self.reconcile_path(vault, to, Some(from)),
        }
    }

    fn task_id_for(&self, vault: &VaultConfig, path: &Path) -> Option<TaskId> {
        let rel = path.strip_prefix(vault.tasks_dir()).ok()?;
        TaskId::from_rel_path(rel)
    }

    fn refresh_blocker_status(&self, vault: &VaultConfig, path: &Path) {
        let in_status_scope = vault.status_dirs().iter().any(|d| path.starts_with(d));
        if !in_status_scope {
            return;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return;
        };
        let status = std::fs::read(path).ok().and_then(|bytes| {
            let content = String::from_utf8_lossy(&bytes);
            let decoded = crate::frontmatter::decode(path, &content).ok()?;
            decoded.get_str("status").map(crate::task::Status::from_raw)
        });
        self.cache.update(&vault.name, stem, status);
    }

    fn reconcile_path(&self, vault: &VaultConfig, path: &Path, renamed_from: Option<&Path>) {
        self.refresh_blocker_status(vault, path);
        let Some(id) = self.task_id_for(vault, path) else {
            // not in the tasks folder; only the blocker cache cares
            if let Some(from) = renamed_from {
                self.reconcile_removed(vault, from);
            }
            return;
        };

        if !path.exists() {
            // the burst ended with the file gone
            self.reconcile_removed(vault, path);
            return;
        }

        let task = match load_task(vault, path) {
            Ok(task) => task,
            Err(e) => {
                // stale record stays until a good parse or a delete
                tdlog_warn!("Keeping stale record for {}: {}", path.display(), e);
                return;
            }
        };

        let old_id = renamed_from.and_then(|from| self.task_id_for(vault, from));
        if let Some(old_id) = old_id.filter(|old| *old != id) {
            if self.index.contains(&vault.name, &old_id) {
                self.index.rename(&vault.name, &old_id, task);
                self.hub
                    .publish(TaskEvent::moved(&vault.name, old_id, id));
                return;
            }
        }

        match self.index.digest(&vault.name, &id) {
            Some(digest) if digest == task.digest => {
                tdlog_trace!("Unchanged content for {}, no event", id.as_str());
            }
            Some(_) => {
                self.index.upsert(&vault.name, task);
                self.hub.publish(TaskEvent::modified(&vault.name, id));
            }
            None => {
                self.index.upsert(&vault.name, task);
                self.hub.publish(TaskEvent::created(&vault.name, id));
            }
        }
    }

    fn reconcile_removed(&self, vault: &VaultConfig, path: &Path) {
        if !path.exists() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.cache.update(&vault.name, stem, None);
            }
        }
        let Some(id) = self.task_id_for(vault, path) else {
            return;
        };
        if path.exists() {
            // remove raced a recreate; treat as an upsert instead
            self.reconcile_path(vault, path, None);
            return;
        }
        if self.index.remove(&vault.name, &id).is_some() {
            self.hub.publish(TaskEvent::deleted(&vault.name, id));
        }
    }
}

type WatcherMap = Arc<Mutex<HashMap<String, RecommendedWatcher>>>;
type PendingMap = HashMap<(String, PathBuf), (RawChange, Instant)>;

/// Keeps the notify watchers alive and cancels the drain task on shutdown.
pub struct WatcherHandle {
    _watchers: WatcherMap,
    cancel: CancellationToken,
}

impl WatcherHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Start watching every configured vault.
///
/// Vaults whose watcher cannot be installed are marked degraded: the hub
/// gets one resync so clients stop trusting the stream, and the periodic
/// rescan keeps their listings honest and retries the install until a live
/// watcher is back.
pub fn start(sync: Arc<VaultSync>, cancel: CancellationToken) -> Result<WatcherHandle> {
    let (tx, rx) = mpsc::channel::<WatchMessage>(1024);
    let watchers: WatcherMap = Arc::new(Mutex::new(HashMap::new()));
    let mut degraded: HashSet<String> = HashSet::new();

    for vault in &sync.config.vaults {
        match install_watcher(vault, tx.clone()) {
            Ok(watcher) => {
                watchers.lock().unwrap().insert(vault.name.clone(), watcher);
            }
            Err(e) => {
                tdlog_error!("Vault '{}': {}", vault.name, e);
                degraded.insert(vault.name.clone());
                sync.hub
                    .publish(TaskEvent::resync(Some(vault.name.clone())));
            }
        }
    }

    let coalesce = Duration::from_millis(sync.config.coalesce_ms.max(1));
    let rescan_every = Duration::from_secs(sync.config.rescan_interval_secs.max(1));
    tokio::spawn(drain_loop(
        sync,
        rx,
        tx,
        coalesce,
        rescan_every,
        degraded,
        watchers.clone(),
        cancel.clone(),
    ));

    Ok(WatcherHandle {
        _watchers: watchers,
        cancel,
    })
}

fn install_watcher(
    vault: &VaultConfig,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<RecommendedWatcher> {
    let degraded = |e: notify::Error| Error::WatcherDegraded(e.to_string());
    let vault_name = vault.name.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // the rename cookie only means something on split halves
                let tracker = match event.kind {
                    NotifyKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => {
                        event.tracker()
                    }
                    _ => None,
                };
                for change in map_event(&event) {
                    let _ = tx.blocking_send(WatchMessage::Change {
                        vault: vault_name.clone(),
                        change,
                        tracker,
                    });
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(WatchMessage::Degraded {
                    vault: vault_name.clone(),
                    reason: e.to_string(),
                });
            }
        },
        notify::Config::default(),
    )
    .map_err(degraded)?;

    // a missing tasks folder is a hard error so the vault goes degraded;
    // extra status folders are optional
    watcher
        .watch(&vault.tasks_dir(), RecursiveMode::Recursive)
        .map_err(degraded)?;
    for dir in vault.status_dirs() {
        if dir.starts_with(vault.tasks_dir()) {
            continue;
        }
        if dir.exists() {
            watcher
                .watch(&dir, RecursiveMode::Recursive)
                .map_err(degraded)?;
        }
    }
    Ok(watcher)
}

/// Join a split rename half with its counterpart sharing the same tracker
/// id, pulling the already-queued half back out of the pending map.
fn pair_by_tracker(
    trackers: &mut HashMap<(String, usize), PathBuf>,
    pending: &mut PendingMap,
    vault: &str,
    change: RawChange,
    tracker: Option<usize>,
) -> RawChange {
    let Some(tracker) = tracker else {
        return change;
    };
    match trackers.remove(&(vault.to_string(), tracker)) {
        Some(half_path) => match pending.remove(&(vault.to_string(), half_path)) {
            Some((half, _)) => pair_rename(half, change),
            // the first half already flushed; let this one stand alone
            None => change,
        },
        None => {
            trackers.insert((vault.to_string(), tracker), change.key().to_path_buf());
            change
        }
    }
}

fn pair_rename(first: RawChange, second: RawChange) -> RawChange {
    match (first, second) {
        (RawChange::Remove(from), RawChange::Upsert(to))
        | (RawChange::Upsert(to), RawChange::Remove(from)) => RawChange::Rename { from, to },
        (_, second) => second,
    }
}

/// Queue a change, merging with anything already pending on the same path.
/// A blind overwrite here would drop the old-id half of a queued rename
/// when a follow-up write lands inside the window.
fn queue_change(pending: &mut PendingMap, vault: &str, mut change: RawChange, deadline: Instant) {
    if let RawChange::Rename { from, to } = change.clone() {
        // a rename chain inside the window collapses to its endpoints
        let from_key = (vault.to_string(), from);
        if let Some(entry) = pending.remove(&from_key) {
            match entry {
                (RawChange::Rename { from: origin, .. }, _) => {
                    change = RawChange::Rename { from: origin, to };
                }
                other => {
                    pending.insert(from_key, other);
                }
            }
        }
    }
    let merged = match pending.remove(&(vault.to_string(), change.key().to_path_buf())) {
        Some((existing, _)) => coalesced(existing, change),
        None => change,
    };
    pending.insert(
        (vault.to_string(), merged.key().to_path_buf()),
        (merged, deadline),
    );
}

fn coalesced(existing: RawChange, incoming: RawChange) -> RawChange {
    match (existing, incoming) {
        // an edit right after a rename keeps the old-id half; reconcile
        // reads the file fresh anyway
        (RawChange::Rename { from, to }, RawChange::Upsert(_)) => RawChange::Rename { from, to },
        // renamed then deleted: the indexed id still lives at the old path
        (RawChange::Rename { from, .. }, RawChange::Remove(_)) => RawChange::Remove(from),
        (_, incoming) => incoming,
    }
}

/// Single consumer of raw changes: pair rename halves, coalesce per path,
/// then reconcile.
#[allow(clippy::too_many_arguments)]
async fn drain_loop(
    sync: Arc<VaultSync>,
    mut rx: mpsc::Receiver<WatchMessage>,
    tx: mpsc::Sender<WatchMessage>,
    coalesce: Duration,
    rescan_every: Duration,
    mut degraded: HashSet<String>,
    watchers: WatcherMap,
    cancel: CancellationToken,
) {
    // latest pending change per (vault, path) with its settle deadline
    let mut pending: PendingMap = HashMap::new();
    // unpaired rename halves, keyed by (vault, tracker id)
    let mut rename_trackers: HashMap<(String, usize), PathBuf> = HashMap::new();
    let mut next_rescan = Instant::now() + rescan_every;

    loop {
        let next_flush = pending
            .values()
            .map(|(_, deadline)| *deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + rescan_every)
            .min(next_rescan);

        tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => {
                let Some(message) = message else { break };
                match message {
                    WatchMessage::Change { vault, change, tracker } => {
                        let change = pair_by_tracker(
                            &mut rename_trackers,
                            &mut pending,
                            &vault,
                            change,
                            tracker,
                        );
                        queue_change(&mut pending, &vault, change, Instant::now() + coalesce);
                    }
                    WatchMessage::Degraded { vault, reason } => {
                        if degraded.insert(vault.clone()) {
                            let e = Error::WatcherDegraded(reason);
                            tdlog_error!("Vault '{}': {}", vault, e);
                            sync.hub.publish(TaskEvent::resync(Some(vault)));
                        }
                    }
                }
            }
            _ = sleep_until(next_flush) => {
                let now = Instant::now();
                let due: Vec<(String, PathBuf)> = pending
                    .iter()
                    .filter(|(_, (_, deadline))| *deadline <= now)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in due {
                    if let Some((change, _)) = pending.remove(&key) {
                        if let Some(vault) = sync.config.get_vault(&key.0) {
                            tdlog_trace!("flush {:?} in '{}'", change, key.0);
                            sync.reconcile(vault, &change);
                        }
                    }
                }
                // a half whose queued change flushed can no longer pair
                rename_trackers
                    .retain(|(vault, _), path| pending.contains_key(&(vault.clone(), path.clone())));

                if now >= next_rescan {
                    next_rescan = now + rescan_every;
                    for vault in &sync.config.vaults {
                        if !degraded.contains(&vault.name) {
                            continue;
                        }
                        // self-heal pass for vaults without a live watcher
                        match sync.rescan_vault(vault) {
                            Ok(count) => {
                                tdlog_debug!(
                                    "Degraded rescan of '{}': {} task(s)",
                                    vault.name,
                                    count
                                );
                                // the directory is back; try to put a live
                                // watcher on it before telling clients
                                match install_watcher(vault, tx.clone()) {
                                    Ok(watcher) => {
                                        watchers
                                            .lock()
                                            .unwrap()
                                            .insert(vault.name.clone(), watcher);
                                        degraded.remove(&vault.name);
                                        tdlog!("Watcher restored for vault '{}'", vault.name);
                                    }
                                    Err(e) => {
                                        tdlog_debug!(
                                            "Vault '{}' still degraded: {}",
                                            vault.name,
                                            e
                                        );
                                    }
                                }
                                sync.hub
                                    .publish(TaskEvent::resync(Some(vault.name.clone())));
                            }
                            Err(e) => {
                                tdlog_warn!("Degraded rescan of '{}' failed: {}", vault.name, e);
                            }
                        }
                    }
                }
            }
        }
    }
    tdlog_debug!("Watcher drain loop stopped");
}
