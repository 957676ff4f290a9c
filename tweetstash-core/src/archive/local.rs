use std::path::{Path, PathBuf};

use tracing::info;

use super::{ArchiveKey, ArchiveStore};
use crate::error::{Error, Result};

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Config(format!(
                "Failed to create archive directory {}: {e}",
                root.display()
            ))
        })?;
        info!(root = %root.display(), "Archiving into local directory");
        Ok(Self { root })
    }
}

impl ArchiveStore for LocalStore {
    async fn put_file(&self, key: &ArchiveKey, path: &Path) -> Result<()> {
        let dest = self.root.join(key.as_str());
        let archive_err =
            |e: std::io::Error| Error::Archive(format!("Failed to write {}: {e}", dest.display()));

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(archive_err)?;
        }

        // copy next to the destination first so a reader never sees a partial object
        let partial = dest.with_extension("json.part");
        tokio::fs::copy(path, &partial).await.map_err(archive_err)?;
        tokio::fs::rename(&partial, &dest).await.map_err(archive_err)?;
        Ok(())
    }
}
