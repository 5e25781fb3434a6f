//! Task record model.
//!
//! A task is one markdown file inside a vault's tasks folder. The record here
//! is the in-memory view the index serves: normalized status/phase/priority
//! plus the metadata the board and the orchestrator need. The backing file is
//! the source of truth; records are rebuilt from it on every change.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::frontmatter::Decoded;
use crate::phase::Phase;

/// Sort rank for tasks with no recognizable priority.
pub const PRIORITY_UNRANKED: u32 = 999;

/// Stable task identifier, derived from the backing file's path relative to
/// the vault's tasks folder with the `.md` extension stripped. Unique within
/// a vault; a rename produces a new id (reported via a `moved` event).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a path relative to the tasks folder.
    /// Returns None for anything that is not a markdown file.
    pub fn from_rel_path(rel: &Path) -> Option<Self> {
        if rel.extension().and_then(|e| e.to_str()) != Some("md") {
            return None;
        }
        Some(Self(rel.with_extension("").to_string_lossy().into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename stem, used as the display title.
    pub fn stem(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse task status from frontmatter.
///
/// The common spellings of "in progress" normalize to one value; anything
/// else is retained verbatim so status filters keep working against vaults
/// with their own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    Todo,
    InProgress,
    Completed,
    Other(String),
}

impl Status {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "todo" => Status::Todo,
            "in_progress" | "in-progress" | "inprogress" | "current" => Status::InProgress,
            "completed" => Status::Completed,
            other => Status::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Todo => "todo",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Status::from_raw(&raw))
    }
}

/// Task priority as written by the user: a label or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Priority {
    Numeric(i64),
    Named(String),
}

impl Priority {
    /// Normalize a raw frontmatter value.
    ///
    /// Accepts integers and strings (numeric strings convert to integers).
    /// Rejects booleans, floats, and empty strings.
    pub fn from_value(value: &serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Bool(_) => None,
            serde_yaml::Value::Number(n) => n.as_i64().map(Priority::Numeric),
            serde_yaml::Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<i64>() {
                    Ok(n) => Some(Priority::Numeric(n)),
                    Err(_) => Some(Priority::Named(trimmed.to_string())),
                }
            }
            _ => None,
        }
    }

    /// Ordinal rank for sorting: high=1, medium=2, low=3, everything
    /// else unranked (999).
    pub fn rank(&self) -> u32 {
        match self {
            Priority::Numeric(n @ 1..=3) => *n as u32,
            Priority::Numeric(_) => PRIORITY_UNRANKED,
            Priority::Named(s) => match s.as_str() {
                "high" | "highest" => 1,
                "medium" => 2,
                "low" => 3,
                _ => PRIORITY_UNRANKED,
            },
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Priority::Numeric(n) => serializer.serialize_i64(*n),
            Priority::Named(s) => serializer.serialize_str(s),
        }
    }
}

/// One task from a vault.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub vault: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    /// Raw phase value from the file; see [`Task::display_phase`] for the
    /// defaulted board view.
    pub phase: Option<String>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub defer_date: Option<NaiveDate>,
    pub planned_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub modified_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub recurring: Option<String>,
    pub blocked_by: Vec<String>,
    pub project_path: Option<PathBuf>,
    pub session_id: Option<String>,
    /// Backing file, owned by the index; never a mutation target.
    #[serde(skip)]
    pub source_path: PathBuf,
    /// Digest of the raw file content, used to suppress touch-only writes.
    #[serde(skip)]
    pub digest: u64,
    /// Scan sequence, the documented stable tie-break for listing order.
    #[serde(skip)]
    pub seq: u64,
}

impl Task {
    /// Build a record from a decoded file.
    pub fn from_decoded(
        vault: &str,
        id: TaskId,
        source_path: PathBuf,
        content: &str,
        decoded: &Decoded,
        modified_date: Option<DateTime<Utc>>,
    ) -> Self {
        let title = id.stem().to_string();
        Self {
            title,
            vault: vault.to_string(),
            description: extract_description(decoded.body()),
            status: Status::from_raw(decoded.get_str("status").unwrap_or("unknown")),
            phase: decoded.get_str("phase").map(str::to_string),
            priority: decoded.get("priority").and_then(Priority::from_value),
            assignee: decoded.get_str("assignee").map(str::to_string),
            defer_date: parse_date(decoded.get_str("defer_date")),
            planned_date: parse_date(decoded.get_str("planned_date")),
            due_date: parse_date(decoded.get_str("due_date")),
            modified_date,
            category: decoded.get_str("category").map(str::to_string),
            recurring: decoded.get_str("recurring").map(str::to_string),
            blocked_by: decoded.get_str_list("blocked_by"),
            project_path: decoded.get_str("project").map(PathBuf::from),
            session_id: decoded.get_str("session_id").map(str::to_string),
            digest: content_digest(content),
            seq: 0,
            id,
            source_path,
        }
    }

    /// Board column after read-time defaulting.
    pub fn display_phase(&self) -> Phase {
        Phase::from_raw(self.phase.as_deref())
    }

    pub fn priority_rank(&self) -> u32 {
        self.priority
            .as_ref()
            .map_or(PRIORITY_UNRANKED, Priority::rank)
    }

    /// A task deferred past `today` is not eligible for display.
    pub fn is_deferred(&self, today: NaiveDate) -> bool {
        matches!(self.defer_date, Some(d) if d > today)
    }
}

/// Digest of raw file content. Two writes with identical bytes produce the
/// same digest, which is what makes `modified` events idempotent.
pub fn content_digest(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?, "%Y-%m-%d").ok()
}

/// First 100 characters of the body, stripped of markdown noise.
fn extract_description(body: &str) -> Option<String> {
    let headers = Regex::new(r"#{1,6}\s+").expect("static regex");
    let links = Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("static regex");
    let wikilinks = Regex::new(r"\[\[([^\]]+)\]\]").expect("static regex");
    let whitespace = Regex::new(r"\s+").expect("static regex");

    let text = headers.replace_all(body, "");
    let text = links.replace_all(&text, "$1");
    let text = wikilinks.replace_all(&text, "$1");
    let text = whitespace.replace_all(&text, " ");
    let text = text.trim();

    if text.is_empty() {
        return None;
    }
    let truncated: String = text.chars().take(100).collect();
    if text.chars().count() > 100 {
        Some(format!("{}...", truncated))
    } else {
        Some(truncated)
    }
}
