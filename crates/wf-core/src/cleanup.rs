//! Orphaned-file cleanup (spec §4.4, C7).
//!
//! Grounded in `original_source/wtb/infrastructure/file_tracking/cleanup_service.py`'s
//! `FileCleanupService`: `identify_orphaned_files` is a set difference
//! between glob-matched files currently on disk and every path any
//! [`crate::domain::FileCommit`] still tracks; `cleanup_orphaned_files`
//! refuses to touch more than `max_files` unless `dry_run` is set, and never
//! aborts the batch on a single file's error.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::file_tracking::FileTrackingService;

pub struct FileCleanupService {
    root: PathBuf,
    max_files: usize,
}

/// One failed deletion/backup, kept alongside the successes so a caller can
/// report partial progress.
#[derive(Debug, Clone)]
pub struct CleanupError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default, Clone)]
pub struct CleanupOutcome {
    pub deleted: Vec<PathBuf>,
    pub backed_up: Vec<PathBuf>,
    /// Paths that were not touched: either the whole batch was refused
    /// because it exceeded `max_files` outside a dry run (spec §4.4,
    /// scenario S5, with a matching entry in `errors` explaining the
    /// refusal), or the individual path no longer existed on disk by the
    /// time cleanup reached it.
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<CleanupError>,
    pub dry_run: bool,
}

fn normalize(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn is_hidden(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

impl FileCleanupService {
    pub fn new(root: PathBuf, max_files: usize) -> Self {
        Self { root, max_files }
    }

    /// Files on disk matching `patterns` (relative to the tracked root) that
    /// are not part of `target_checkpoint`'s tracked snapshot (spec §4.4:
    /// "current workspace files ... minus files at target_checkpoint", P5).
    /// A checkpoint with no linked file commit tracks the empty set, so
    /// every matching on-disk file is orphaned. Hidden paths (any component
    /// starting with `.`) and anything matching `excludes` are skipped
    /// before the difference is taken.
    pub async fn identify_orphaned_files(
        &self,
        target_checkpoint: &str,
        patterns: &[String],
        excludes: &[String],
        tracker: &FileTrackingService,
    ) -> Result<Vec<PathBuf>> {
        let mut tracked = HashSet::new();
        if let Some(commit) = tracker.get_files_at_checkpoint(target_checkpoint).await? {
            for entry in commit.entries {
                tracked.insert(PathBuf::from(entry.path));
            }
        }

        let mut on_disk = HashSet::new();
        for pattern in patterns {
            let full_pattern = self.root.join(pattern);
            let full_pattern = full_pattern.to_string_lossy().to_string();
            for entry in glob::glob(&full_pattern)
                .map_err(|e| CoreError::validation(format!("bad glob pattern {pattern}: {e}")))?
            {
                let path = entry.map_err(|e| CoreError::Io(e.into_error()))?;
                if !path.is_file() {
                    continue;
                }
                let rel = normalize(&self.root, &path);
                if is_hidden(&rel) {
                    continue;
                }
                if excludes
                    .iter()
                    .any(|ex| glob::Pattern::new(ex).map(|p| p.matches_path(&rel)).unwrap_or(false))
                {
                    continue;
                }
                on_disk.insert(rel);
            }
        }

        let mut orphaned: Vec<PathBuf> = on_disk.difference(&tracked).cloned().collect();
        orphaned.sort();
        Ok(orphaned)
    }

    /// Deletes `orphaned` paths (relative to the tracked root), optionally
    /// copying each to `backup_dir` first. Refuses to run against more than
    /// `max_files` paths unless `dry_run` is true, matching the source's
    /// safety cap. A path already gone from disk (e.g. deleted out of band
    /// between orphan detection and cleanup) is recorded in `skipped` rather
    /// than attempted. Per-file errors are collected rather than aborting the
    /// batch. Backups land flat in `backup_dir` under a
    /// `{timestamp}_{basename}` name, not mirrored by subdirectory.
    pub async fn cleanup_orphaned_files(
        &self,
        orphaned: &[PathBuf],
        dry_run: bool,
        backup_dir: Option<&Path>,
    ) -> Result<CleanupOutcome> {
        if !dry_run && orphaned.len() > self.max_files {
            let message = format!(
                "refusing to clean up {} files, exceeds max_files={} (use dry_run to preview)",
                orphaned.len(),
                self.max_files
            );
            warn!(count = orphaned.len(), max_files = self.max_files, "cleanup batch refused");
            return Ok(CleanupOutcome {
                skipped: orphaned.to_vec(),
                errors: vec![CleanupError {
                    path: PathBuf::new(),
                    message,
                }],
                dry_run,
                ..Default::default()
            });
        }

        let mut outcome = CleanupOutcome {
            dry_run,
            ..Default::default()
        };

        for rel_path in orphaned {
            let full_path = self.root.join(rel_path);
            if !full_path.exists() {
                outcome.skipped.push(rel_path.clone());
                continue;
            }
            if dry_run {
                outcome.deleted.push(rel_path.clone());
                continue;
            }

            if let Some(backup_dir) = backup_dir {
                let basename = match rel_path.file_name() {
                    Some(name) => name,
                    None => {
                        outcome.errors.push(CleanupError {
                            path: rel_path.clone(),
                            message: "orphaned path has no file name component".to_string(),
                        });
                        continue;
                    }
                };
                // Flat, timestamp-prefixed destination (not backup_dir.join(rel_path)):
                // matches the source's `{timestamp}_{basename}` backup naming rather
                // than mirroring the tracked tree's subdirectory structure.
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
                let dest = backup_dir.join(format!("{timestamp}_{}", basename.to_string_lossy()));
                if let Err(e) = async {
                    if let Some(parent) = dest.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::copy(&full_path, &dest).await?;
                    Ok::<(), std::io::Error>(())
                }
                .await
                {
                    warn!(path = %full_path.display(), error = %e, "failed to back up orphaned file, skipping deletion");
                    outcome.errors.push(CleanupError {
                        path: rel_path.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
                outcome.backed_up.push(rel_path.clone());
            }

            match tokio::fs::remove_file(&full_path).await {
                Ok(()) => outcome.deleted.push(rel_path.clone()),
                Err(e) => {
                    warn!(path = %full_path.display(), error = %e, "failed to delete orphaned file");
                    outcome.errors.push(CleanupError {
                        path: rel_path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_tracking::FileTrackingService;
    use crate::uow::{InMemoryDatabase, InMemoryUnitOfWorkFactory};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn untracked_file_matching_pattern_is_orphaned() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("scratch.log"), b"x").await.unwrap();

        let factory = Arc::new(InMemoryUnitOfWorkFactory::new(InMemoryDatabase::new()));
        let tracker = FileTrackingService::new(factory, dir.path().to_path_buf());
        let service = FileCleanupService::new(dir.path().to_path_buf(), 10);
        let orphaned = service
            .identify_orphaned_files("cp-nonexistent", &["*.log".to_string()], &[], &tracker)
            .await
            .unwrap();

        assert_eq!(orphaned, vec![PathBuf::from("scratch.log")]);
    }

    #[tokio::test]
    async fn file_tracked_at_target_checkpoint_is_not_orphaned() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("data.csv"), b"a\n").await.unwrap();
        tokio::fs::write(dir.path().join("scratch.log"), b"x").await.unwrap();

        let factory = Arc::new(InMemoryUnitOfWorkFactory::new(InMemoryDatabase::new()));
        let tracker = FileTrackingService::new(factory, dir.path().to_path_buf());
        tracker
            .track_and_link("commit-1", "cp-1", &[PathBuf::from("data.csv")], None)
            .await
            .unwrap();

        let service = FileCleanupService::new(dir.path().to_path_buf(), 10);
        let orphaned = service
            .identify_orphaned_files("cp-1", &["*.csv".to_string(), "*.log".to_string()], &[], &tracker)
            .await
            .unwrap();

        assert_eq!(orphaned, vec![PathBuf::from("scratch.log")]);
    }

    #[tokio::test]
    async fn cleanup_refuses_batches_over_max_files_unless_dry_run() {
        let dir = tempdir().unwrap();
        let service = FileCleanupService::new(dir.path().to_path_buf(), 1);
        let orphaned = vec![PathBuf::from("a.log"), PathBuf::from("b.log")];

        let refused = service.cleanup_orphaned_files(&orphaned, false, None).await.unwrap();
        assert_eq!(refused.skipped, orphaned);
        assert!(refused.deleted.is_empty());
        assert_eq!(refused.errors.len(), 1);

        let previewed = service.cleanup_orphaned_files(&orphaned, true, None).await.unwrap();
        assert_eq!(previewed.deleted, orphaned);
    }

    #[tokio::test]
    async fn dry_run_does_not_touch_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keep.log");
        tokio::fs::write(&path, b"x").await.unwrap();

        let service = FileCleanupService::new(dir.path().to_path_buf(), 10);
        let outcome = service
            .cleanup_orphaned_files(&[PathBuf::from("keep.log")], true, None)
            .await
            .unwrap();

        assert_eq!(outcome.deleted, vec![PathBuf::from("keep.log")]);
        assert!(path.exists());
    }
}
