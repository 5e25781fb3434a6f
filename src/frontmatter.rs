//! YAML frontmatter codec for task files.
//!
//! A task file is a structured YAML header between `---` markers followed by
//! free-form markdown. The codec keeps unknown header fields opaque and the
//! body byte-for-byte intact, so edits made here never lose user data.
//! Header formatting is canonicalized only when a caller actually edits a
//! field; plain decoding never writes anything.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::phase::Phase;
use crate::{Error, Result};

/// Frontmatter key holding the resumable session identifier.
pub const SESSION_ID_KEY: &str = "session_id";

/// Frontmatter key holding the board phase.
pub const PHASE_KEY: &str = "phase";

/// A decoded task file: the header mapping in original key order, plus the
/// raw tail that follows the closing `---` marker.
#[derive(Debug, Clone)]
pub struct Decoded {
    mapping: Mapping,
    tail: String,
    had_header: bool,
}

impl Decoded {
    /// The header mapping, in the order the keys appear in the file.
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn had_header(&self) -> bool {
        self.had_header
    }

    /// Free-form body text after the header.
    pub fn body(&self) -> &str {
        &self.tail
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.mapping.get(Value::String(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Read a list of strings, tolerating a scalar as a one-element list.
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Sequence(seq)) => seq
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Re-serialize the file. The body is reattached byte-for-byte; the
    /// header is emitted in mapping order.
    pub fn encode(&self) -> Result<String> {
        if !self.had_header {
            return Ok(self.tail.clone());
        }
        let yaml = serde_yaml::to_string(&Value::Mapping(self.mapping.clone()))?;
        Ok(format!("---\n{}---{}", yaml, self.tail))
    }
}

/// Split content into (header text, tail after the closing marker).
///
/// Mirrors the shape the vault ecosystem produces: an opening `---` line,
/// YAML until the first line starting with `---`, then the body.
fn split(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let nl = rest.find('\n')?;
    if !rest[..nl].trim().is_empty() {
        return None;
    }
    let after = &rest[nl + 1..];
    let end = after.find("\n---")?;
    Some((&after[..end], &after[end + 4..]))
}

/// Decode a task file.
///
/// Missing, extra, and misordered fields are all tolerated; a file without
/// any header decodes to an empty mapping. Malformed YAML or a header that
/// is not a mapping is a `Parse` error and the file is skipped by the index.
pub fn decode(path: &Path, content: &str) -> Result<Decoded> {
    let Some((header, tail)) = split(content) else {
        return Ok(Decoded {
            mapping: Mapping::new(),
            tail: content.to_string(),
            had_header: false,
        });
    };

    if header.trim().is_empty() {
        return Ok(Decoded {
            mapping: Mapping::new(),
            tail: tail.to_string(),
            had_header: true,
        });
    }

    let value: Value = serde_yaml::from_str(header).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mapping = match value {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                reason: "frontmatter is not a mapping".to_string(),
            })
        }
    };

    Ok(Decoded {
        mapping,
        tail: tail.to_string(),
        had_header: true,
    })
}

/// Apply field edits to a task file and return the new content.
///
/// `Some(value)` sets a field (replacing in place, appending if new);
/// `None` removes it. Untouched fields and the body are preserved.
pub fn update_fields(
    path: &Path,
    content: &str,
    edits: &[(&str, Option<Value>)],
) -> Result<String> {
    let mut decoded = decode(path, content)?;
    if !decoded.had_header {
        return Err(Error::Parse {
            path: path.to_path_buf(),
            reason: "task file has no frontmatter".to_string(),
        });
    }
    for (key, value) in edits {
        let key = Value::String((*key).to_string());
        match value {
            Some(v) => {
                decoded.mapping.insert(key, v.clone());
            }
            None => {
                decoded.mapping.remove(&key);
            }
        }
    }
    decoded.encode()
}

/// Rewrite the `phase` field.
pub fn set_phase(path: &Path, content: &str, phase: Phase) -> Result<String> {
    update_fields(
        path,
        content,
        &[(PHASE_KEY, Some(Value::String(phase.as_str().to_string())))],
    )
}

/// Rewrite the `session_id` field.
pub fn set_session_id(path: &Path, content: &str, session_id: &str) -> Result<String> {
    update_fields(
        path,
        content,
        &[(SESSION_ID_KEY, Some(Value::String(session_id.to_string())))],
    )
}

/// Remove the `session_id` field.
pub fn clear_session_id(path: &Path, content: &str) -> Result<String> {
    update_fields(path, content, &[(SESSION_ID_KEY, None)])
}
