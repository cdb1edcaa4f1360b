//! File-based access log sink.
//!
//! Appends JSON-lines access log entries to a file, one complete
//! [`AccessLogEntry`] per line. The file is opened in append-only mode and
//! never rewritten, which makes it suitable for shipping to an external
//! log store.
//!
//! # Thread safety
//!
//! A `tokio::sync::Mutex` around the file handle serializes writes. The
//! critical section is one `write_all` plus a flush.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::audit::{AccessLogEntry, AccessLogSink};
use crate::error::AuditError;

/// Access log sink that writes JSON-lines to a file.
pub struct FileAccessLog {
    path: PathBuf,
    writer: Mutex<Option<tokio::fs::File>>,
}

impl FileAccessLog {
    /// Create a sink writing to `path`. The file is opened lazily on the
    /// first append.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    fn failure(&self, reason: String) -> AuditError {
        AuditError::SinkFailure {
            name: self.name().to_owned(),
            reason,
        }
    }
}

#[async_trait::async_trait]
impl AccessLogSink for FileAccessLog {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| {
                    self.failure(format!(
                        "failed to open access log '{}': {e}",
                        self.path.display()
                    ))
                })?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Err(self.failure("file handle unexpectedly None after open".to_owned()));
        };

        file.write_all(&line)
            .await
            .map_err(|e| self.failure(format!("write failed: {e}")))?;
        file.flush()
            .await
            .map_err(|e| self.failure(format!("flush failed: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for FileAccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAccessLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::audit::{AccessAction, AccessOutcome, RequestContext};
    use crate::gate::Denial;
    use crate::record::DisclosurePolicy;
    use crate::record::tests::sample_record;

    #[tokio::test]
    async fn appends_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = FileAccessLog::new(&path);
        let record = sample_record("p@ss", DisclosurePolicy::default());

        for outcome in [
            AccessOutcome::WrongPassword,
            AccessOutcome::Success,
            AccessOutcome::Denied(Denial::ViewLimitReached),
        ] {
            let entry = AccessLogEntry::new(
                &record,
                AccessAction::View,
                outcome,
                &RequestContext::anonymous(),
                Utc::now(),
            );
            sink.append(&entry).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: AccessLogEntry = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.outcome, AccessOutcome::Denied(Denial::ViewLimitReached));
        assert!(last.actor.is_none());
    }

    #[tokio::test]
    async fn unwritable_path_is_a_sink_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAccessLog::new(dir.path().join("missing").join("access.log"));
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let entry = AccessLogEntry::new(
            &record,
            AccessAction::View,
            AccessOutcome::Success,
            &RequestContext::anonymous(),
            Utc::now(),
        );
        let err = sink.append(&entry).await.unwrap_err();
        assert!(matches!(err, AuditError::SinkFailure { ref name, .. } if name == "file"));
    }
}
