//! Local filesystem applier (secondary/driven adapter)
//!
//! Implements [`ILocalApplier`] on `tokio::fs`, applying server-declared
//! changes under the sync root.
//!
//! ## Design Decisions
//!
//! - **Deletes are idempotent**: a target that is already gone counts as applied.
//! - **Renames replace**: the destination is overwritten and its parent created.
//!   Staged downloads reach their final path through this same rename, falling
//!   back to copy + remove when the staging directory is on another filesystem.
//! - **No content writes**: a file create/modify is only ever applied through a
//!   staged rename, never directly.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use cloudmirror_core::domain::{Change, ChangeType, ItemKind};
use cloudmirror_core::ports::ILocalApplier;
use tracing::{debug, instrument};

/// Applies server changes to the tree under `root`
#[derive(Debug, Clone)]
pub struct FileSystemApplier {
    root: PathBuf,
}

impl FileSystemApplier {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_in_root(&self, path: &Path) -> anyhow::Result<()> {
        if path.starts_with(&self.root) && path != self.root {
            Ok(())
        } else {
            anyhow::bail!(
                "{} is not within sync root {}",
                path.display(),
                self.root.display()
            )
        }
    }

    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(e).with_context(|| format!("Failed to remove {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                let is_file = tokio::fs::metadata(from).await.map(|m| m.is_file()).unwrap_or(false);
                if !is_file {
                    return Err(rename_err).with_context(|| {
                        format!("Failed to rename {} to {}", from.display(), to.display())
                    });
                }
                debug!(error = %rename_err, "rename failed, copying instead");
                tokio::fs::copy(from, to)
                    .await
                    .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
                tokio::fs::remove_file(from).await?;
                Ok(())
            }
        }
    }

    #[cfg(unix)]
    async fn symlink(&self, target: &Path, link: &Path) -> anyhow::Result<()> {
        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.remove(link).await?;
        tokio::fs::symlink(target, link).await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn symlink(&self, _target: &Path, link: &Path) -> anyhow::Result<()> {
        anyhow::bail!("symbolic links are not supported here: {}", link.display())
    }
}

#[async_trait::async_trait]
impl ILocalApplier for FileSystemApplier {
    #[instrument(skip(self, change), fields(event_id = %change.event_id(), path = %change.new_path().display()))]
    async fn apply_sync_from_change(&self, change: &Change) -> anyhow::Result<()> {
        let path = change.new_path();
        self.check_in_root(path)?;

        match (change.change_type(), change.item_kind()) {
            (ChangeType::Deleted, _) => self.remove(path).await,
            (ChangeType::Renamed, _) => {
                let from = change
                    .old_path()
                    .with_context(|| format!("rename of {} has no old path", path.display()))?;
                self.rename(from, path).await
            }
            (ChangeType::Created, ItemKind::Folder) => {
                tokio::fs::create_dir_all(path).await?;
                Ok(())
            }
            (ChangeType::Created, ItemKind::Symlink) => {
                let target = change
                    .metadata()
                    .target_path
                    .as_deref()
                    .context("symlink change has no target")?;
                self.symlink(target, path).await
            }
            (ChangeType::Modified, ItemKind::Folder | ItemKind::Symlink) => {
                anyhow::bail!("{change} has no local meaning")
            }
            (ChangeType::Created | ChangeType::Modified, ItemKind::File) => {
                anyhow::bail!("{change} needs staged content and is applied by rename")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cloudmirror_core::domain::{ChangeMetadata, Direction};
    use tempfile::TempDir;

    use super::*;

    fn server_change(change_type: ChangeType, path: PathBuf) -> Change {
        Change::new(Direction::FromRemote, change_type, path).with_event_id(1)
    }

    // ------------------------------------------------------------------
    // folders and deletes
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_folder() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path());
        let change = server_change(ChangeType::Created, dir.path().join("a/b"))
            .with_metadata(ChangeMetadata::folder());

        fs.apply_sync_from_change(&change).await.unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[tokio::test]
    async fn test_delete_file_and_directory() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path());
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.txt"), b"data").unwrap();
        std::fs::write(dir.path().join("top.txt"), b"data").unwrap();

        fs.apply_sync_from_change(&server_change(ChangeType::Deleted, dir.path().join("top.txt")))
            .await
            .unwrap();
        fs.apply_sync_from_change(
            &server_change(ChangeType::Deleted, dir.path().join("sub"))
                .with_metadata(ChangeMetadata::folder()),
        )
        .await
        .unwrap();

        assert!(!dir.path().join("top.txt").exists());
        assert!(!dir.path().join("sub").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path());
        fs.apply_sync_from_change(&server_change(ChangeType::Deleted, dir.path().join("gone")))
            .await
            .unwrap();
    }

    // ------------------------------------------------------------------
    // renames
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_rename_replaces_and_creates_parent() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path());
        let from = dir.path().join("old.txt");
        let to = dir.path().join("new/dir/new.txt");
        std::fs::write(&from, b"moved").unwrap();
        std::fs::create_dir_all(to.parent().unwrap()).unwrap();
        std::fs::write(&to, b"stale").unwrap();

        let change = server_change(ChangeType::Renamed, to.clone()).with_old_path(&from);
        fs.apply_sync_from_change(&change).await.unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"moved");
    }

    #[tokio::test]
    async fn test_staged_file_outside_root_moves_in() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(root.path());
        let staged = staging.path().join("0b7c");
        std::fs::write(&staged, b"content").unwrap();

        let change = server_change(ChangeType::Renamed, root.path().join("f.bin")).with_old_path(&staged);
        fs.apply_sync_from_change(&change).await.unwrap();

        assert_eq!(std::fs::read(root.path().join("f.bin")).unwrap(), b"content");
    }

    // ------------------------------------------------------------------
    // rejected changes
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_outside_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path().join("root"));
        let change = server_change(ChangeType::Deleted, dir.path().join("other"));
        assert!(fs.apply_sync_from_change(&change).await.is_err());
    }

    #[tokio::test]
    async fn test_direct_file_write_is_rejected() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path());
        let change = server_change(ChangeType::Created, dir.path().join("f.txt"))
            .with_metadata(ChangeMetadata::file(3));
        let err = fs.apply_sync_from_change(&change).await.unwrap_err();
        assert!(err.to_string().contains("staged"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_symlink() {
        let dir = TempDir::new().unwrap();
        let fs = FileSystemApplier::new(dir.path());
        let metadata = ChangeMetadata {
            target_path: Some(PathBuf::from("target.txt")),
            ..ChangeMetadata::default()
        };
        let change = server_change(ChangeType::Created, dir.path().join("link")).with_metadata(metadata);

        fs.apply_sync_from_change(&change).await.unwrap();
        let target = std::fs::read_link(dir.path().join("link")).unwrap();
        assert_eq!(target, PathBuf::from("target.txt"));
    }
}
