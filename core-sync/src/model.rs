//! Snapshot, metadata and plan types shared by the reconciler and the engine.

use bridge_traits::storage::{ContentHash, FileFingerprint, RemoteFingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// Metadata
// ============================================================================

/// What both sides agreed on the last time `path` synced successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadataEntry {
    pub path: String,
    pub last_synced_hash: ContentHash,
    pub last_synced_remote_revision: String,
    /// Milliseconds since the Unix epoch
    pub last_synced_at: i64,
}

// ============================================================================
// Snapshots
// ============================================================================

pub type LocalSnapshot = BTreeMap<String, FileFingerprint>;
pub type RemoteSnapshot = BTreeMap<String, RemoteFingerprint>;
pub type MetadataSnapshot = BTreeMap<String, SyncMetadataEntry>;

/// The three path-keyed views a run reconciles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub local: LocalSnapshot,
    pub remote: RemoteSnapshot,
    pub metadata: MetadataSnapshot,
}

impl ScanSnapshot {
    /// Key adapter listings by path.
    ///
    /// Remote stores may hold two objects under one name; the most recently
    /// modified one wins.
    pub fn from_parts(
        local: Vec<FileFingerprint>,
        remote: Vec<RemoteFingerprint>,
        metadata: Vec<SyncMetadataEntry>,
    ) -> Self {
        let local = local.into_iter().map(|f| (f.path.clone(), f)).collect();

        let mut remote_map = RemoteSnapshot::new();
        for fp in remote {
            match remote_map.get(&fp.path) {
                Some(existing) if existing.modified_at >= fp.modified_at => {
                    warn!(path = %fp.path, "Duplicate remote object ignored");
                }
                Some(_) => {
                    warn!(path = %fp.path, "Duplicate remote object replaces older one");
                    remote_map.insert(fp.path.clone(), fp);
                }
                None => {
                    remote_map.insert(fp.path.clone(), fp);
                }
            }
        }

        let metadata = metadata.into_iter().map(|m| (m.path.clone(), m)).collect();

        Self {
            local,
            remote: remote_map,
            metadata,
        }
    }

    /// Union of every path known to any of the three views, in order.
    pub fn all_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .local
            .keys()
            .chain(self.remote.keys())
            .chain(self.metadata.keys())
            .map(String::as_str)
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Which side's content wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    PreferLocal,
    PreferRemote,
}

/// Kind of a plan item, used for counting and event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanAction {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    Conflict,
    Unresolved,
    Link,
    Forget,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Upload => "upload",
            PlanAction::Download => "download",
            PlanAction::DeleteLocal => "delete_local",
            PlanAction::DeleteRemote => "delete_remote",
            PlanAction::Conflict => "conflict",
            PlanAction::Unresolved => "unresolved",
            PlanAction::Link => "link",
            PlanAction::Forget => "forget",
        }
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path's work for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPlanItem {
    /// Push the local file.
    Upload { local: FileFingerprint },

    /// Pull the remote file. `expected_local` is the local hash seen at scan
    /// time (`None` when there was no local file); the engine refuses to
    /// overwrite a local file that no longer matches it.
    Download {
        remote: RemoteFingerprint,
        expected_local: Option<ContentHash>,
    },

    /// Remove the local copy of a file deleted remotely.
    DeleteLocal {
        path: String,
        expected_local: ContentHash,
    },

    /// Remove the remote copy of a file deleted locally.
    DeleteRemote { path: String },

    /// Both sides changed and differ.
    Conflict {
        path: String,
        resolution: Resolution,
        local: FileFingerprint,
        remote: RemoteFingerprint,
    },

    /// Both sides changed within the skew window and the tie-break asks for
    /// a manual choice.
    Unresolved {
        path: String,
        local: FileFingerprint,
        remote: RemoteFingerprint,
    },

    /// Both sides already hold identical content; only metadata is written.
    Link {
        path: String,
        hash: ContentHash,
        revision: String,
    },

    /// Deleted on both sides; only the metadata entry is dropped.
    Forget { path: String },
}

impl SyncPlanItem {
    pub fn path(&self) -> &str {
        match self {
            SyncPlanItem::Upload { local } => &local.path,
            SyncPlanItem::Download { remote, .. } => &remote.path,
            SyncPlanItem::DeleteLocal { path, .. }
            | SyncPlanItem::DeleteRemote { path }
            | SyncPlanItem::Conflict { path, .. }
            | SyncPlanItem::Unresolved { path, .. }
            | SyncPlanItem::Link { path, .. }
            | SyncPlanItem::Forget { path } => path,
        }
    }

    pub fn action(&self) -> PlanAction {
        match self {
            SyncPlanItem::Upload { .. } => PlanAction::Upload,
            SyncPlanItem::Download { .. } => PlanAction::Download,
            SyncPlanItem::DeleteLocal { .. } => PlanAction::DeleteLocal,
            SyncPlanItem::DeleteRemote { .. } => PlanAction::DeleteRemote,
            SyncPlanItem::Conflict { .. } => PlanAction::Conflict,
            SyncPlanItem::Unresolved { .. } => PlanAction::Unresolved,
            SyncPlanItem::Link { .. } => PlanAction::Link,
            SyncPlanItem::Forget { .. } => PlanAction::Forget,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            SyncPlanItem::DeleteLocal { .. } | SyncPlanItem::DeleteRemote { .. }
        )
    }
}

/// Counts of a plan's items by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub uploads: u64,
    pub downloads: u64,
    pub deletions: u64,
    pub conflicts: u64,
    pub metadata_only: u64,
}

/// Ordered work for one run: every transfer precedes every deletion, and
/// each path appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    items: Vec<SyncPlanItem>,
}

impl SyncPlan {
    pub fn new(items: Vec<SyncPlanItem>) -> Self {
        // Stable partition keeps path order inside each stage
        let (deletions, transfers): (Vec<_>, Vec<_>) =
            items.into_iter().partition(SyncPlanItem::is_deletion);
        let mut items = transfers;
        items.extend(deletions);
        Self { items }
    }

    pub fn items(&self) -> &[SyncPlanItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<SyncPlanItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split into the transfer stage and the deletion stage.
    pub fn into_stages(self) -> (Vec<SyncPlanItem>, Vec<SyncPlanItem>) {
        self.items.into_iter().partition(|i| !i.is_deletion())
    }

    pub fn find(&self, path: &str) -> Option<&SyncPlanItem> {
        self.items.iter().find(|i| i.path() == path)
    }

    /// Paths that will be pushed, including conflicts resolved toward local.
    pub fn uploads(&self) -> Vec<&str> {
        self.paths_where(|i| {
            matches!(
                i,
                SyncPlanItem::Upload { .. }
                    | SyncPlanItem::Conflict {
                        resolution: Resolution::PreferLocal,
                        ..
                    }
            )
        })
    }

    /// Paths that will be pulled, including conflicts resolved toward remote.
    pub fn downloads(&self) -> Vec<&str> {
        self.paths_where(|i| {
            matches!(
                i,
                SyncPlanItem::Download { .. }
                    | SyncPlanItem::Conflict {
                        resolution: Resolution::PreferRemote,
                        ..
                    }
            )
        })
    }

    pub fn deletions(&self) -> Vec<&str> {
        self.paths_where(SyncPlanItem::is_deletion)
    }

    pub fn conflicts(&self) -> Vec<&str> {
        self.paths_where(|i| {
            matches!(
                i,
                SyncPlanItem::Conflict { .. } | SyncPlanItem::Unresolved { .. }
            )
        })
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for item in &self.items {
            match item.action() {
                PlanAction::Upload => summary.uploads += 1,
                PlanAction::Download => summary.downloads += 1,
                PlanAction::DeleteLocal | PlanAction::DeleteRemote => summary.deletions += 1,
                PlanAction::Conflict | PlanAction::Unresolved => summary.conflicts += 1,
                PlanAction::Link | PlanAction::Forget => summary.metadata_only += 1,
            }
        }
        summary
    }

    fn paths_where(&self, pred: impl Fn(&SyncPlanItem) -> bool) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| pred(i))
            .map(SyncPlanItem::path)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(path: &str, mtime: i64) -> FileFingerprint {
        FileFingerprint {
            path: path.to_string(),
            size: 1,
            content_hash: ContentHash::of(path.as_bytes()),
            modified_at: mtime,
            mime_type: "text/markdown".to_string(),
        }
    }

    fn remote(path: &str, mtime: i64) -> RemoteFingerprint {
        RemoteFingerprint {
            path: path.to_string(),
            size: 1,
            revision: "1".to_string(),
            modified_at: mtime,
            content_hash: None,
            mime_type: "text/markdown".to_string(),
        }
    }

    #[test]
    fn test_plan_orders_deletions_last() {
        let plan = SyncPlan::new(vec![
            SyncPlanItem::DeleteRemote {
                path: "a.md".into(),
            },
            SyncPlanItem::Upload {
                local: local("b.md", 1),
            },
            SyncPlanItem::DeleteLocal {
                path: "c.md".into(),
                expected_local: ContentHash::of(b"c"),
            },
            SyncPlanItem::Forget {
                path: "d.md".into(),
            },
        ]);

        let actions: Vec<_> = plan.items().iter().map(|i| i.action()).collect();
        assert_eq!(
            actions,
            vec![
                PlanAction::Upload,
                PlanAction::Forget,
                PlanAction::DeleteRemote,
                PlanAction::DeleteLocal
            ]
        );

        let (transfers, deletions) = plan.into_stages();
        assert_eq!(transfers.len(), 2);
        assert_eq!(deletions.len(), 2);
    }

    #[test]
    fn test_plan_views_and_summary() {
        let plan = SyncPlan::new(vec![
            SyncPlanItem::Upload {
                local: local("up.md", 1),
            },
            SyncPlanItem::Download {
                remote: remote("down.md", 1),
                expected_local: None,
            },
            SyncPlanItem::Conflict {
                path: "both.md".into(),
                resolution: Resolution::PreferLocal,
                local: local("both.md", 10_000),
                remote: remote("both.md", 1),
            },
            SyncPlanItem::Link {
                path: "same.md".into(),
                hash: ContentHash::of(b"same"),
                revision: "4".into(),
            },
        ]);

        assert_eq!(plan.uploads(), vec!["up.md", "both.md"]);
        assert_eq!(plan.downloads(), vec!["down.md"]);
        assert_eq!(plan.conflicts(), vec!["both.md"]);
        assert!(plan.deletions().is_empty());

        let summary = plan.summary();
        assert_eq!(summary.uploads, 1);
        assert_eq!(summary.downloads, 1);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.metadata_only, 1);
    }

    #[test]
    fn test_snapshot_keeps_newest_duplicate_remote() {
        let mut older = remote("dup.md", 100);
        older.revision = "old".into();
        let mut newer = remote("dup.md", 200);
        newer.revision = "new".into();

        let snapshot = ScanSnapshot::from_parts(vec![], vec![newer, older], vec![]);
        assert_eq!(snapshot.remote["dup.md"].revision, "new");
    }

    #[test]
    fn test_all_paths_is_sorted_union() {
        let snapshot = ScanSnapshot::from_parts(
            vec![local("b.md", 1), local("a.md", 1)],
            vec![remote("b.md", 1), remote("c.md", 1)],
            vec![],
        );
        assert_eq!(snapshot.all_paths(), vec!["a.md", "b.md", "c.md"]);
    }
}
