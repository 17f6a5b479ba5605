//! Filesystem fallback sink used when the durable primary is unreachable.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::error::AuditResult;
use crate::record::AuditRecord;
use crate::sink::AuditSink;

/// Sink writing each record to its own JSON file.
///
/// File names carry a monotonically increasing suffix so concurrent commits
/// for the same payout never collide and ordering is reconstructible.
pub struct FileAuditSink {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl FileAuditSink {
    /// Prepares a sink rooted at the provided directory, creating it when
    /// absent and seeding the sequence past any existing entries.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while preparing the directory.
    pub async fn open(dir: impl Into<PathBuf>) -> AuditResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut existing = 0_u64;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                existing += 1;
            }
        }

        Ok(Self {
            dir,
            sequence: AtomicU64::new(existing),
        })
    }

    /// Returns the fallback directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn commit(&self, record: &AuditRecord) -> AuditResult<()> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}_{seq:08}.json", record.payout_id());
        let path = self.dir.join(name);

        let body = serde_json::to_vec_pretty(record)?;
        fs::write(&path, body).await?;
        warn!(path = %path.display(), "audit fallback written");
        Ok(())
    }
}
