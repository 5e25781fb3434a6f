//! Integration test suite for taskdeck.
//!
//! These tests exercise the full pipeline: vault files on disk, the
//! filesystem watcher, the event hub, board mutations, and headless
//! sessions against a fake launcher script.
//!
//! # Test Categories
//!
//! - `board_flow`: listing, filtering, and phase mutations end to end
//! - `watcher_events`: raw filesystem changes becoming semantic events
//! - `sessions`: session creation, resumption, and failure handling
//!
//! # CI Compatibility
//!
//! Sessions run against a small shell script standing in for the real
//! launcher, so no external tools or network access are needed.

mod fixtures;

mod sessions;
mod watcher_events;
