//! Kanban phase model.
//!
//! A task's phase is the board column it occupies, distinct from its coarse
//! status. The board is free-form: any phase may move to any other, the only
//! validation is that the target names one of the six phases. Missing or
//! unrecognized values display as `todo` without touching the file.

use serde::{Deserialize, Serialize};

/// Board column for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Todo,
    Planning,
    InProgress,
    AiReview,
    HumanReview,
    Done,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Todo,
        Phase::Planning,
        Phase::InProgress,
        Phase::AiReview,
        Phase::HumanReview,
        Phase::Done,
    ];

    /// Parse a raw frontmatter value. Returns None for anything that is not
    /// one of the six phases.
    pub fn parse(raw: &str) -> Option<Phase> {
        match raw {
            "todo" => Some(Phase::Todo),
            "planning" => Some(Phase::Planning),
            "in_progress" => Some(Phase::InProgress),
            "ai_review" => Some(Phase::AiReview),
            "human_review" => Some(Phase::HumanReview),
            "done" => Some(Phase::Done),
            _ => None,
        }
    }

    /// Read-time defaulting: a missing or unrecognized phase is shown as
    /// `todo`. The backing file is left untouched.
    pub fn from_raw(raw: Option<&str>) -> Phase {
        raw.and_then(Phase::parse).unwrap_or(Phase::Todo)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Todo => "todo",
            Phase::Planning => "planning",
            Phase::InProgress => "in_progress",
            Phase::AiReview => "ai_review",
            Phase::HumanReview => "human_review",
            Phase::Done => "done",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolve the phase a task should land in after a scripted command.
///
/// A failed command always forces `human_review`, overriding whatever the
/// command itself intended, so failures surface for human attention. A
/// successful command keeps its own declared intent (or leaves the phase
/// unchanged when it declares none).
pub fn resolve_after_command(intended: Option<Phase>, success: bool) -> Option<Phase> {
    if success {
        intended
    } else {
        Some(Phase::HumanReview)
    }
}
