//! Event broadcast hub.
//!
//! Every index mutation publishes one semantic event here; subscribers each
//! get a bounded buffer so one slow consumer never stalls the engine or the
//! other subscribers. When a buffer overflows we drop the oldest events and
//! latch the subscriber lossy; its next receive yields a single `resync`
//! event telling it to rebuild from a fresh listing instead of trusting the
//! stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::task::TaskId;
use crate::tdlog_trace;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Moved,
    Resync,
}

/// One semantic change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Vault the change belongs to; `None` on a resync that spans all vaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
    /// Previous id, present only on `moved`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_task_id: Option<TaskId>,
}

impl TaskEvent {
    pub fn created(vault: &str, id: TaskId) -> Self {
        Self {
            kind: EventKind::Created,
            task_id: Some(id),
            vault: Some(vault.to_string()),
            old_task_id: None,
        }
    }

    pub fn modified(vault: &str, id: TaskId) -> Self {
        Self {
            kind: EventKind::Modified,
            task_id: Some(id),
            vault: Some(vault.to_string()),
            old_task_id: None,
        }
    }

    pub fn deleted(vault: &str, id: TaskId) -> Self {
        Self {
            kind: EventKind::Deleted,
            task_id: Some(id),
            vault: Some(vault.to_string()),
            old_task_id: None,
        }
    }

    pub fn moved(vault: &str, old_id: TaskId, new_id: TaskId) -> Self {
        Self {
            kind: EventKind::Moved,
            task_id: Some(new_id),
            vault: Some(vault.to_string()),
            old_task_id: Some(old_id),
        }
    }

    pub fn resync(vault: Option<String>) -> Self {
        Self {
            kind: EventKind::Resync,
            task_id: None,
            vault,
            old_task_id: None,
        }
    }
}

#[derive(Debug)]
struct Buffer {
    queue: VecDeque<TaskEvent>,
    /// Set when an overflow dropped events; cleared by emitting one resync.
    lossy: bool,
}

#[derive(Debug)]
struct SubscriberState {
    /// Vault filter; `None` receives everything.
    scope: Option<String>,
    capacity: usize,
    buffer: Mutex<Buffer>,
    notify: Notify,
}

impl SubscriberState {
    fn push(&self, event: &TaskEvent) {
        if let (Some(scope), Some(vault)) = (&self.scope, &event.vault) {
            if scope != vault {
                return;
            }
        }
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.queue.len() >= self.capacity {
            buffer.queue.pop_front();
            buffer.lossy = true;
        }
        buffer.queue.push_back(event.clone());
        drop(buffer);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<TaskEvent> {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.lossy {
            buffer.lossy = false;
            return Some(TaskEvent::resync(self.scope.clone()));
        }
        buffer.queue.pop_front()
    }
}

type Registry = Arc<Mutex<Vec<Arc<SubscriberState>>>>;

/// Fan-out point for task events.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    subscribers: Registry,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe with the default buffer capacity.
    pub fn subscribe(&self, scope: Option<String>) -> Subscription {
        self.subscribe_with_capacity(scope, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, scope: Option<String>, capacity: usize) -> Subscription {
        let state = Arc::new(SubscriberState {
            scope,
            capacity: capacity.max(1),
            buffer: Mutex::new(Buffer {
                queue: VecDeque::new(),
                lossy: false,
            }),
            notify: Notify::new(),
        });
        self.subscribers.lock().unwrap().push(state.clone());
        Subscription {
            registry: self.subscribers.clone(),
            state,
        }
    }

    /// Deliver an event to every matching subscriber.
    pub fn publish(&self, event: TaskEvent) {
        tdlog_trace!("publish {:?}", event);
        let subscribers = self.subscribers.lock().unwrap().clone();
        for subscriber in &subscribers {
            subscriber.push(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// One subscriber's end of the hub. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    registry: Registry,
    state: Arc<SubscriberState>,
}

impl Subscription {
    /// Wait for the next event. A subscriber that overflowed gets exactly
    /// one `resync` before the stream continues.
    pub async fn recv(&self) -> TaskEvent {
        loop {
            if let Some(event) = self.state.pop() {
                return event;
            }
            self.state.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<TaskEvent> {
        self.state.pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.registry.lock().unwrap();
        subscribers.retain(|s| !Arc::ptr_eq(s, &self.state));
    }
}
