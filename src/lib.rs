pub mod config;
pub mod engine;
pub mod error;
pub mod frontmatter;
pub mod hub;
pub mod log;
pub mod orchestrator;
pub mod phase;
pub mod status_cache;
pub mod task;
pub mod vault;
pub mod watcher;

pub use engine::Engine;
pub use error::{Error, Result};
pub use hub::{BroadcastHub, EventKind, Subscription, TaskEvent};
pub use phase::Phase;
pub use task::{Priority, Status, Task, TaskId};
pub use vault::TaskFilter;
