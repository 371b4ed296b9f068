//! File-backed history journal.
//!
//! The file starts with a header frame naming the journal magic and storage
//! format, followed by one length-prefixed MessagePack frame per
//! [`HistoryEntry`], appended as messages arrive. A torn final frame is
//! ignored on read.

use crate::history::{most_recent, HistoryEntry, HistoryError, HistorySource};
use async_trait::async_trait;
use bytes::BytesMut;
use huddle_protocol::codec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// An append-only journal of history entries.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

const JOURNAL_MAGIC: &str = "huddle-journal";

/// Storage format written by this build. Bumped when [`HistoryEntry`]
/// frames change shape.
pub const JOURNAL_FORMAT: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct JournalHeader {
    magic: String,
    format: u16,
}

impl JournalHeader {
    fn current() -> Self {
        Self {
            magic: JOURNAL_MAGIC.to_string(),
            format: JOURNAL_FORMAT,
        }
    }
}

/// Consume the header frame and return its storage format.
fn check_header(buf: &mut BytesMut) -> Result<u16, HistoryError> {
    let header: JournalHeader = codec::decode_from(buf)
        .map_err(|_| HistoryError::Corrupt("unreadable header"))?
        .ok_or(HistoryError::Corrupt("missing header"))?;
    if header.magic != JOURNAL_MAGIC {
        return Err(HistoryError::Corrupt("not a huddle journal"));
    }
    if header.format != JOURNAL_FORMAT {
        return Err(HistoryError::Incompatible(header.format));
    }
    Ok(header.format)
}

impl Journal {
    /// Open or create the journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is not a journal, or
    /// uses another storage format.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        if file.metadata().await?.len() == 0 {
            file.write_all(&codec::encode(&JournalHeader::current())?)
                .await?;
            file.flush().await?;
            info!(path = %path.display(), format = JOURNAL_FORMAT, "Created journal");
        } else {
            let mut buf = BytesMut::from(&fs::read(&path).await?[..]);
            let format = check_header(&mut buf)?;
            info!(path = %path.display(), format, "Opened journal");
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in the journal, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a frame is malformed.
    pub async fn entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        // Exclude concurrent appends while reading.
        let _file = self.file.lock().await;
        let mut buf = BytesMut::from(&fs::read(&self.path).await?[..]);
        check_header(&mut buf)?;

        let mut entries = Vec::new();
        while let Some(entry) = codec::decode_from::<HistoryEntry>(&mut buf)? {
            entries.push(entry);
        }
        if !buf.is_empty() {
            warn!(path = %self.path.display(), trailing = buf.len(), "Ignoring torn journal frame");
        }
        Ok(entries)
    }
}

#[async_trait]
impl HistorySource for Journal {
    fn name(&self) -> &str {
        "journal"
    }

    async fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let frame = codec::encode(entry)?;
        let mut file = self.file.lock().await;
        file.write_all(&frame).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(
        &self,
        term: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let needle = term.to_lowercase();
        let hits = self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.matches(&needle))
            .collect();
        Ok(most_recent(hits, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::MessageRecord;

    fn entry(from: &str, text: &str) -> HistoryEntry {
        HistoryEntry::new(MessageRecord::group(from, "teamA", text), "teamA")
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("history.journal")).await.unwrap();

        journal.record(&entry("alice", "hello")).await.unwrap();
        journal.record(&entry("bob", "HELLO again")).await.unwrap();
        journal.record(&entry("carol", "bye")).await.unwrap();

        let hits = journal.query("hello", None).await.unwrap();
        assert_eq!(hits.len(), 2);
        let latest = journal.query("hello", Some(1)).await.unwrap();
        assert_eq!(latest[0].record.from_user, "bob");
        assert_eq!(journal.name(), "journal");
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.journal");

        {
            let journal = Journal::open(&path).await.unwrap();
            journal.record(&entry("alice", "persisted")).await.unwrap();
        }

        let journal = Journal::open(&path).await.unwrap();
        assert_eq!(journal.path(), path.as_path());
        let entries = journal.entries().await.unwrap();
        assert_eq!(entries, vec![entry("alice", "persisted")]);
    }

    #[tokio::test]
    async fn test_rejects_other_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.journal");
        let header = JournalHeader {
            format: 9,
            ..JournalHeader::current()
        };
        std::fs::write(&path, codec::encode(&header).unwrap()).unwrap();

        assert!(matches!(
            Journal::open(&path).await,
            Err(HistoryError::Incompatible(9))
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("other.journal");
        let header = JournalHeader {
            magic: "notes".to_string(),
            format: JOURNAL_FORMAT,
        };
        std::fs::write(&path, codec::encode(&header).unwrap()).unwrap();
        assert!(matches!(
            Journal::open(&path).await,
            Err(HistoryError::Corrupt("not a huddle journal"))
        ));

        let path = dir.path().join("text.journal");
        std::fs::write(&path, b"plain text, not frames").unwrap();
        assert!(matches!(Journal::open(&path).await, Err(HistoryError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_torn_frame_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.journal");
        {
            let journal = Journal::open(&path).await.unwrap();
            journal.record(&entry("alice", "whole")).await.unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 42, 1, 2]);
        std::fs::write(&path, bytes).unwrap();

        let journal = Journal::open(&path).await.unwrap();
        assert_eq!(journal.entries().await.unwrap().len(), 1);
    }
}
