use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::Record;

pub use key::ArchiveKey;
pub use local::LocalStore;
pub use s3::S3Store;

mod key;

/// Writes batches under a local directory, used for development with a `file://` destination.
mod local;

/// [S3] backed store.
///
/// [S3]: https://docs.aws.amazon.com/AmazonS3/latest/API/API_PutObject.html
mod s3;

#[cfg(test)]
pub(crate) mod test_utils;

/// Durable blob storage the archiver writes staged batches into.
#[trait_variant::make(ArchiveStore: Send)]
#[allow(dead_code)]
pub trait LocalArchiveStore {
    /// Stores the content of the file at `path` under `key`, replacing any previous object.
    async fn put_file(&self, key: &ArchiveKey, path: &Path) -> Result<()>;
}

/// Store selected from the configured destination.
pub enum Store {
    S3(S3Store),
    Local(LocalStore),
}

impl ArchiveStore for Store {
    async fn put_file(&self, key: &ArchiveKey, path: &Path) -> Result<()> {
        match self {
            Store::S3(store) => ArchiveStore::put_file(store, key, path).await,
            Store::Local(store) => ArchiveStore::put_file(store, key, path).await,
        }
    }
}

/// Archiver serializes a batch as newline delimited JSON into a staging file and puts the file
/// into the [ArchiveStore]. The staging file is scoped to a single flush and removed on every
/// exit path. A failed put is not retried.
pub struct Archiver<S> {
    store: S,
    staging_dir: PathBuf,
    unique_keys: bool,
}

impl<S> Archiver<S>
where
    S: ArchiveStore,
{
    pub fn new(store: S, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
            unique_keys: false,
        }
    }

    /// Appends a random token to every archive file name.
    pub fn unique_keys(mut self, unique_keys: bool) -> Self {
        self.unique_keys = unique_keys;
        self
    }

    /// Flushes the batch under a key derived from the keyword and the current local time.
    pub async fn flush(&self, batch: &[Record], keyword: &str) -> Result<ArchiveKey> {
        self.flush_at(batch, keyword, Local::now()).await
    }

    pub(crate) async fn flush_at(
        &self,
        batch: &[Record],
        keyword: &str,
        at: DateTime<Local>,
    ) -> Result<ArchiveKey> {
        if batch.is_empty() {
            return Err(Error::Batch("refusing to flush an empty batch".to_string()));
        }

        let token = self.unique_keys.then(|| Uuid::now_v7().simple().to_string());
        let key = ArchiveKey::new(keyword, at, token.as_deref());

        // dropping the staged file removes it, so an early return below cleans up as well
        let staged = self.stage(batch, &key)?;
        debug!(
            key = %key,
            staged = %staged.path().display(),
            records = batch.len(),
            "Staged batch"
        );

        self.store.put_file(&key, staged.path()).await?;

        if let Err(e) = staged.close() {
            warn!(key = %key, error = %e, "Failed to remove staging file");
        }
        Ok(key)
    }

    fn stage(&self, batch: &[Record], key: &ArchiveKey) -> Result<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{}-", key.file_stem()))
            .suffix(".json")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| {
                Error::Staging(format!(
                    "Failed to create staging file in {}: {e}",
                    self.staging_dir.display()
                ))
            })?;

        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            for record in batch {
                writer.write_all(&record.to_json_line()?)?;
            }
            writer.flush()?;
        }

        Ok(staged)
    }
}
