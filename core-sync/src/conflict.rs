//! Conflict Policy
//!
//! Decides which side wins when a path changed both locally and remotely,
//! and names the copy that keeps the losing side's bytes.
//!
//! ## Resolution
//!
//! Modification times are compared with a tolerance of
//! [`SKEW_TOLERANCE_MS`] to absorb clock drift between devices:
//! - local newer than remote by more than the tolerance: **PreferLocal**
//! - remote newer than local by more than the tolerance: **PreferRemote**
//! - otherwise the configured [`TieBreak`] decides
//!
//! ## Usage
//!
//! ```
//! use core_sync::conflict::{resolve_conflict, TieBreak};
//! use core_sync::model::Resolution;
//!
//! let winner = resolve_conflict(10_000, 1_000, 2_000, TieBreak::PreferRemote);
//! assert_eq!(winner, Some(Resolution::PreferLocal));
//!
//! // Within the window: the tie-break applies
//! let winner = resolve_conflict(1_500, 1_000, 2_000, TieBreak::PreferRemote);
//! assert_eq!(winner, Some(Resolution::PreferRemote));
//! ```

use crate::model::Resolution;
use bridge_traits::storage::parent_path;
use serde::{Deserialize, Serialize};

/// Clock skew tolerated between the two sides' modification times.
pub const SKEW_TOLERANCE_MS: i64 = 2_000;

const CONFLICT_MARKER: &str = ".conflict-";

/// Outcome when both sides changed within the skew window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Take the remote version
    #[default]
    PreferRemote,
    /// Leave the path untouched and report it for a manual choice
    Surface,
}

/// Pick the winning side of a conflict.
///
/// Returns `None` only when the times fall inside the window and the
/// tie-break is [`TieBreak::Surface`].
pub fn resolve_conflict(
    local_modified_at: i64,
    remote_modified_at: i64,
    skew_tolerance_ms: i64,
    tie_break: TieBreak,
) -> Option<Resolution> {
    if local_modified_at > remote_modified_at.saturating_add(skew_tolerance_ms) {
        Some(Resolution::PreferLocal)
    } else if remote_modified_at > local_modified_at.saturating_add(skew_tolerance_ms) {
        Some(Resolution::PreferRemote)
    } else {
        match tie_break {
            TieBreak::PreferRemote => Some(Resolution::PreferRemote),
            TieBreak::Surface => None,
        }
    }
}

/// Sibling path that preserves the losing version of `path`.
///
/// `notes/plan.md` becomes `notes/plan.conflict-<millis>.md`; names without
/// an extension (or dotfiles) get the marker appended.
pub fn conflict_copy_path(path: &str, timestamp_millis: i64) -> String {
    let (dir, name) = match parent_path(path) {
        Some(parent) => (Some(parent), &path[parent.len() + 1..]),
        None => (None, path),
    };

    let renamed = match name.rfind('.') {
        Some(idx) if idx > 0 => format!(
            "{}{}{}{}",
            &name[..idx],
            CONFLICT_MARKER,
            timestamp_millis,
            &name[idx..]
        ),
        _ => format!("{}{}{}", name, CONFLICT_MARKER, timestamp_millis),
    };

    match dir {
        Some(dir) => format!("{}/{}", dir, renamed),
        None => renamed,
    }
}

/// Whether `path` names a file produced by [`conflict_copy_path`].
pub fn is_conflict_copy(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.match_indices(CONFLICT_MARKER).any(|(idx, marker)| {
        let digits: String = name[idx + marker.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        !digits.is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_outside_window() {
        assert_eq!(
            resolve_conflict(5_001, 3_000, SKEW_TOLERANCE_MS, TieBreak::PreferRemote),
            Some(Resolution::PreferLocal)
        );
        assert_eq!(
            resolve_conflict(3_000, 5_001, SKEW_TOLERANCE_MS, TieBreak::Surface),
            Some(Resolution::PreferRemote)
        );
    }

    #[test]
    fn test_resolve_window_boundary_uses_tie_break() {
        // Exactly T apart is still inside the window
        assert_eq!(
            resolve_conflict(5_000, 3_000, SKEW_TOLERANCE_MS, TieBreak::PreferRemote),
            Some(Resolution::PreferRemote)
        );
        assert_eq!(
            resolve_conflict(3_000, 5_000, SKEW_TOLERANCE_MS, TieBreak::Surface),
            None
        );
        assert_eq!(
            resolve_conflict(4_000, 4_000, SKEW_TOLERANCE_MS, TieBreak::Surface),
            None
        );
    }

    #[test]
    fn test_resolve_handles_extreme_times() {
        assert_eq!(
            resolve_conflict(i64::MAX, i64::MAX - 1, SKEW_TOLERANCE_MS, TieBreak::PreferRemote),
            Some(Resolution::PreferRemote)
        );
    }

    #[test]
    fn test_conflict_copy_path() {
        assert_eq!(
            conflict_copy_path("notes/plan.md", 1_700_000_000_000),
            "notes/plan.conflict-1700000000000.md"
        );
        assert_eq!(
            conflict_copy_path("archive.tar.gz", 42),
            "archive.tar.conflict-42.gz"
        );
        assert_eq!(conflict_copy_path("README", 42), "README.conflict-42");
        assert_eq!(conflict_copy_path("a/.env", 42), "a/.env.conflict-42");
    }

    #[test]
    fn test_is_conflict_copy() {
        assert!(is_conflict_copy("notes/plan.conflict-1700000000000.md"));
        assert!(is_conflict_copy("README.conflict-42"));
        assert!(!is_conflict_copy("notes/plan.md"));
        assert!(!is_conflict_copy("notes/a.conflict-draft.md"));
    }
}
