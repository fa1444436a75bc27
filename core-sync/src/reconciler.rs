//! # Three-Way Reconciler
//!
//! Compares the local snapshot, the remote snapshot and the last-synced
//! metadata for every known path and produces a [`SyncPlan`].
//!
//! ## Change detection
//!
//! - Local changed: local hash differs from the last synced hash
//! - Remote changed: remote revision differs from the last synced revision
//!
//! ## Classification
//!
//! | local | remote | metadata | outcome                                         |
//! |-------|--------|----------|-------------------------------------------------|
//! | yes   | yes    | yes      | by change flags (upload / download / conflict)  |
//! | yes   | yes    | no       | link when content matches, else conflict        |
//! | yes   | no     | yes      | upload if local changed, else delete local      |
//! | yes   | no     | no       | upload                                          |
//! | no    | yes    | yes      | download if remote changed, else delete remote  |
//! | no    | yes    | no       | download                                        |
//! | no    | no     | yes      | forget                                          |
//!
//! Reconciliation performs no I/O and is deterministic for identical input.

use crate::conflict::{resolve_conflict, TieBreak, SKEW_TOLERANCE_MS};
use crate::model::{ScanSnapshot, SyncMetadataEntry, SyncPlan, SyncPlanItem};
use bridge_traits::storage::{FileFingerprint, RemoteFingerprint};
use tracing::{debug, trace};

/// Pure planner over a [`ScanSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    skew_tolerance_ms: i64,
    tie_break: TieBreak,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(SKEW_TOLERANCE_MS, TieBreak::default())
    }
}

impl Reconciler {
    pub fn new(skew_tolerance_ms: i64, tie_break: TieBreak) -> Self {
        Self {
            skew_tolerance_ms: skew_tolerance_ms.max(0),
            tie_break,
        }
    }

    pub fn skew_tolerance_ms(&self) -> i64 {
        self.skew_tolerance_ms
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Build the plan for one run.
    pub fn reconcile(&self, snapshot: &ScanSnapshot) -> SyncPlan {
        let items: Vec<SyncPlanItem> = snapshot
            .all_paths()
            .into_iter()
            .filter_map(|path| {
                self.classify(
                    path,
                    snapshot.local.get(path),
                    snapshot.remote.get(path),
                    snapshot.metadata.get(path),
                )
            })
            .collect();

        let plan = SyncPlan::new(items);
        debug!(
            items = plan.len(),
            local = snapshot.local.len(),
            remote = snapshot.remote.len(),
            metadata = snapshot.metadata.len(),
            "Reconciled snapshots"
        );
        plan
    }

    /// Decide the item for a single path, `None` when it is in sync.
    pub fn classify(
        &self,
        path: &str,
        local: Option<&FileFingerprint>,
        remote: Option<&RemoteFingerprint>,
        metadata: Option<&SyncMetadataEntry>,
    ) -> Option<SyncPlanItem> {
        let item = match (local, remote, metadata) {
            (Some(l), Some(r), Some(m)) => {
                let local_changed = l.content_hash != m.last_synced_hash;
                let remote_changed = r.revision != m.last_synced_remote_revision;
                match (local_changed, remote_changed) {
                    (false, false) => None,
                    (true, false) => Some(SyncPlanItem::Upload { local: l.clone() }),
                    (false, true) => Some(SyncPlanItem::Download {
                        remote: r.clone(),
                        expected_local: Some(l.content_hash.clone()),
                    }),
                    (true, true) => Some(self.both_present(path, l, r)),
                }
            }
            (Some(l), Some(r), None) => Some(self.both_present(path, l, r)),
            (Some(l), None, Some(m)) => {
                if l.content_hash != m.last_synced_hash {
                    Some(SyncPlanItem::Upload { local: l.clone() })
                } else {
                    Some(SyncPlanItem::DeleteLocal {
                        path: path.to_string(),
                        expected_local: l.content_hash.clone(),
                    })
                }
            }
            (Some(l), None, None) => Some(SyncPlanItem::Upload { local: l.clone() }),
            (None, Some(r), Some(m)) => {
                if r.revision != m.last_synced_remote_revision {
                    Some(SyncPlanItem::Download {
                        remote: r.clone(),
                        expected_local: None,
                    })
                } else {
                    Some(SyncPlanItem::DeleteRemote {
                        path: path.to_string(),
                    })
                }
            }
            (None, Some(r), None) => Some(SyncPlanItem::Download {
                remote: r.clone(),
                expected_local: None,
            }),
            (None, None, Some(_)) => Some(SyncPlanItem::Forget {
                path: path.to_string(),
            }),
            (None, None, None) => None,
        };

        if let Some(item) = &item {
            trace!(path, action = %item.action(), "Classified path");
        }
        item
    }

    /// Both sides hold the path and at least one diverged from metadata.
    fn both_present(
        &self,
        path: &str,
        local: &FileFingerprint,
        remote: &RemoteFingerprint,
    ) -> SyncPlanItem {
        if remote.content_hash.as_ref() == Some(&local.content_hash) {
            return SyncPlanItem::Link {
                path: path.to_string(),
                hash: local.content_hash.clone(),
                revision: remote.revision.clone(),
            };
        }

        match resolve_conflict(
            local.modified_at,
            remote.modified_at,
            self.skew_tolerance_ms,
            self.tie_break,
        ) {
            Some(resolution) => SyncPlanItem::Conflict {
                path: path.to_string(),
                resolution,
                local: local.clone(),
                remote: remote.clone(),
            },
            None => SyncPlanItem::Unresolved {
                path: path.to_string(),
                local: local.clone(),
                remote: remote.clone(),
            },
        }
    }
}

/// Reconcile with the default tolerance and tie-break.
pub fn reconcile(snapshot: &ScanSnapshot) -> SyncPlan {
    Reconciler::default().reconcile(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlanAction, Resolution};
    use bridge_traits::storage::ContentHash;

    fn local(path: &str, body: &str, mtime: i64) -> FileFingerprint {
        FileFingerprint {
            path: path.to_string(),
            size: body.len() as u64,
            content_hash: ContentHash::of(body.as_bytes()),
            modified_at: mtime,
            mime_type: "text/markdown".to_string(),
        }
    }

    fn remote(path: &str, revision: &str, mtime: i64) -> RemoteFingerprint {
        RemoteFingerprint {
            path: path.to_string(),
            size: 1,
            revision: revision.to_string(),
            modified_at: mtime,
            content_hash: None,
            mime_type: "text/markdown".to_string(),
        }
    }

    fn meta(path: &str, body: &str, revision: &str) -> SyncMetadataEntry {
        SyncMetadataEntry {
            path: path.to_string(),
            last_synced_hash: ContentHash::of(body.as_bytes()),
            last_synced_remote_revision: revision.to_string(),
            last_synced_at: 0,
        }
    }

    fn snapshot(
        local: Vec<FileFingerprint>,
        remote: Vec<RemoteFingerprint>,
        metadata: Vec<SyncMetadataEntry>,
    ) -> ScanSnapshot {
        ScanSnapshot::from_parts(local, remote, metadata)
    }

    fn only_action(plan: &SyncPlan) -> PlanAction {
        assert_eq!(plan.len(), 1, "expected one item, got {:?}", plan.items());
        plan.items()[0].action()
    }

    #[test]
    fn test_empty_inputs_yield_empty_plan() {
        assert!(reconcile(&ScanSnapshot::default()).is_empty());
    }

    #[test]
    fn test_unchanged_path_is_skipped() {
        let plan = reconcile(&snapshot(
            vec![local("a.md", "x", 1)],
            vec![remote("a.md", "7", 1)],
            vec![meta("a.md", "x", "7")],
        ));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_local_edit_uploads() {
        let plan = reconcile(&snapshot(
            vec![local("a.md", "new", 1)],
            vec![remote("a.md", "7", 1)],
            vec![meta("a.md", "old", "7")],
        ));
        assert_eq!(only_action(&plan), PlanAction::Upload);
    }

    #[test]
    fn test_remote_edit_downloads_with_guard() {
        let plan = reconcile(&snapshot(
            vec![local("a.md", "x", 1)],
            vec![remote("a.md", "8", 1)],
            vec![meta("a.md", "x", "7")],
        ));
        match &plan.items()[0] {
            SyncPlanItem::Download {
                remote,
                expected_local,
            } => {
                assert_eq!(remote.revision, "8");
                assert_eq!(expected_local.as_ref(), Some(&ContentHash::of(b"x")));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_new_files_on_each_side() {
        let plan = reconcile(&snapshot(
            vec![local("new-local.md", "x", 1)],
            vec![remote("new-remote.md", "1", 1)],
            vec![],
        ));
        assert_eq!(plan.uploads(), vec!["new-local.md"]);
        assert_eq!(plan.downloads(), vec!["new-remote.md"]);
    }

    #[test]
    fn test_deletions_propagate() {
        let plan = reconcile(&snapshot(
            vec![local("gone-remote.md", "x", 1)],
            vec![remote("gone-local.md", "3", 1)],
            vec![
                meta("gone-remote.md", "x", "2"),
                meta("gone-local.md", "y", "3"),
            ],
        ));
        let actions: Vec<_> = plan.items().iter().map(|i| (i.path(), i.action())).collect();
        assert_eq!(
            actions,
            vec![
                ("gone-local.md", PlanAction::DeleteRemote),
                ("gone-remote.md", PlanAction::DeleteLocal),
            ]
        );
    }

    #[test]
    fn test_edit_wins_over_delete() {
        // Edited locally, deleted remotely
        let plan = reconcile(&snapshot(
            vec![local("a.md", "edited", 1)],
            vec![],
            vec![meta("a.md", "orig", "2")],
        ));
        assert_eq!(only_action(&plan), PlanAction::Upload);

        // Edited remotely, deleted locally
        let plan = reconcile(&snapshot(
            vec![],
            vec![remote("a.md", "3", 1)],
            vec![meta("a.md", "orig", "2")],
        ));
        assert_eq!(only_action(&plan), PlanAction::Download);
    }

    #[test]
    fn test_double_delete_forgets_metadata() {
        let plan = reconcile(&snapshot(vec![], vec![], vec![meta("a.md", "x", "1")]));
        assert_eq!(only_action(&plan), PlanAction::Forget);
    }

    #[test]
    fn test_both_changed_resolves_by_time() {
        let plan = reconcile(&snapshot(
            vec![local("a.md", "local", 10_000)],
            vec![remote("a.md", "8", 5_000)],
            vec![meta("a.md", "orig", "7")],
        ));
        match &plan.items()[0] {
            SyncPlanItem::Conflict { resolution, .. } => {
                assert_eq!(*resolution, Resolution::PreferLocal)
            }
            other => panic!("unexpected item {:?}", other),
        }

        let plan = reconcile(&snapshot(
            vec![local("a.md", "local", 5_000)],
            vec![remote("a.md", "8", 10_000)],
            vec![meta("a.md", "orig", "7")],
        ));
        assert_eq!(plan.downloads(), vec!["a.md"]);
        assert_eq!(plan.conflicts(), vec!["a.md"]);
    }

    #[test]
    fn test_skew_window_default_prefers_remote() {
        let plan = reconcile(&snapshot(
            vec![local("a.md", "local", 11_500)],
            vec![remote("a.md", "8", 10_000)],
            vec![meta("a.md", "orig", "7")],
        ));
        match &plan.items()[0] {
            SyncPlanItem::Conflict { resolution, .. } => {
                assert_eq!(*resolution, Resolution::PreferRemote)
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_skew_window_surface_leaves_unresolved() {
        let reconciler = Reconciler::new(SKEW_TOLERANCE_MS, TieBreak::Surface);
        let plan = reconciler.reconcile(&snapshot(
            vec![local("a.md", "local", 10_000)],
            vec![remote("a.md", "8", 11_999)],
            vec![meta("a.md", "orig", "7")],
        ));
        assert_eq!(only_action(&plan), PlanAction::Unresolved);
    }

    #[test]
    fn test_creation_on_both_sides_without_metadata() {
        let plan = reconcile(&snapshot(
            vec![local("a.md", "mine", 20_000)],
            vec![remote("a.md", "1", 1_000)],
            vec![],
        ));
        assert_eq!(only_action(&plan), PlanAction::Conflict);
        assert_eq!(plan.uploads(), vec!["a.md"]);
    }

    #[test]
    fn test_identical_content_links_without_transfer() {
        let mut r = remote("a.md", "5", 1_000);
        r.content_hash = Some(ContentHash::of(b"same"));

        let plan = reconcile(&snapshot(vec![local("a.md", "same", 90_000)], vec![r.clone()], vec![]));
        match &plan.items()[0] {
            SyncPlanItem::Link { hash, revision, .. } => {
                assert_eq!(hash, &ContentHash::of(b"same"));
                assert_eq!(revision, "5");
            }
            other => panic!("unexpected item {:?}", other),
        }

        // Both changed to the same bytes
        let plan = reconcile(&snapshot(
            vec![local("a.md", "same", 1)],
            vec![r],
            vec![meta("a.md", "orig", "4")],
        ));
        assert_eq!(only_action(&plan), PlanAction::Link);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let input = snapshot(
            vec![local("b.md", "1", 1), local("a.md", "2", 2), local("c/d.md", "3", 3)],
            vec![remote("c/d.md", "9", 1), remote("e.md", "1", 1)],
            vec![meta("c/d.md", "old", "8"), meta("z.md", "z", "1")],
        );
        let first = reconcile(&input);
        let second = reconcile(&input);
        assert_eq!(first, second);

        let paths: Vec<_> = first.items().iter().map(|i| i.path()).collect();
        assert_eq!(paths, vec!["a.md", "b.md", "c/d.md", "e.md", "z.md"]);
    }

    #[test]
    fn test_negative_tolerance_is_clamped() {
        assert_eq!(Reconciler::new(-5, TieBreak::Surface).skew_tolerance_ms(), 0);
    }
}
