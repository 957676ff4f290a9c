use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{ArchiveKey, ArchiveStore};
use crate::error::{Error, Result};

/// In-memory [ArchiveStore] that records every object it was given. Puts can be forced to fail
/// to exercise the flush error path.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    objects: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    put_attempts: Arc<AtomicUsize>,
    fail_next_puts: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Fail the next N puts.
    pub(crate) fn fail_puts(&self, count: usize) {
        self.fail_next_puts.store(count, Ordering::SeqCst);
    }

    pub(crate) fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Stored objects as `(key, body)` in put order.
    pub(crate) fn objects(&self) -> Vec<(String, Vec<u8>)> {
        self.objects.lock().clone()
    }

    /// Number of lines of every stored object, in put order.
    pub(crate) fn line_counts(&self) -> Vec<usize> {
        self.objects
            .lock()
            .iter()
            .map(|(_, body)| body.iter().filter(|b| **b == b'\n').count())
            .collect()
    }

    fn should_fail(&self) -> bool {
        self.fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ArchiveStore for MemoryStore {
    async fn put_file(&self, key: &ArchiveKey, path: &Path) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(Error::Archive(format!("injected put failure for {key}")));
        }

        let body = tokio::fs::read(path).await?;
        self.objects.lock().push((key.to_string(), body));
        Ok(())
    }
}
