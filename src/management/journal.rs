use std::fmt;
use std::hash::Hasher;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use compio::fs;
use metrohash::MetroHash64;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;
use crate::operations::OpSet;

const JOURNAL_FILE_NAME: &str = ".journal";
const CHECKSUM_LEN: usize = 8;
const COMPRESSION_LEVEL: i32 = 3;

/// Rebased operations destined for one node.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PlannedWrite {
    pub identity: String,
    pub id: String,
    pub operations: OpSet,
}

/// What a restructuring was about to do when it started writing.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct JournalEntry {
    pub action: String,
    pub subject: String,
    pub started: String,
    pub writes: Vec<PlannedWrite>,
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of '{}' started at {}",
            self.action, self.subject, self.started
        )?;
        for write in &self.writes {
            let paths: Vec<&str> = write.operations.paths().map(String::as_str).collect();
            writeln!(
                f,
                "  {} ({}): {}",
                write.id,
                write.identity,
                paths.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Recovery record kept in the workspace while a restructuring persists its writes.
///
/// Layout: 8 byte little endian metrohash of the payload, then the zstd compressed bincode
/// encoding of a `JournalEntry`.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join(JOURNAL_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let bytes = Self::encode(entry)?;
        fs::write(&self.path, bytes)
            .await
            .0
            .context(IoSnafu { path: &self.path })?;
        debug!(
            "Recorded journal for {} of '{}' at {}",
            entry.action,
            entry.subject,
            self.path.best_effort_path_display()
        );
        Ok(())
    }

    /// The pending entry, if a restructuring did not finish.
    pub async fn read(&self) -> Result<Option<JournalEntry>, JournalError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Self::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu { path: &self.path }),
        }
    }

    pub async fn clear(&self) -> Result<(), JournalError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared journal");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(IoSnafu { path: &self.path }),
        }
    }

    fn checksum(payload: &[u8]) -> u64 {
        let mut hasher = MetroHash64::default();
        hasher.write(payload);
        hasher.finish()
    }

    fn encode(entry: &JournalEntry) -> Result<Vec<u8>, JournalError> {
        let encoded =
            bincode::encode_to_vec(entry, bincode::config::standard()).context(EncodeSnafu)?;
        let payload = zstd::encode_all(encoded.as_slice(), COMPRESSION_LEVEL)
            .context(CompressionSnafu)?;

        let mut bytes = Vec::with_capacity(CHECKSUM_LEN + payload.len());
        bytes.extend_from_slice(&Self::checksum(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<JournalEntry, JournalError> {
        ensure!(bytes.len() > CHECKSUM_LEN, TruncatedSnafu);
        let (checksum, payload) = bytes.split_at(CHECKSUM_LEN);
        let mut expected = [0u8; CHECKSUM_LEN];
        expected.copy_from_slice(checksum);
        ensure!(
            u64::from_le_bytes(expected) == Self::checksum(payload),
            ChecksumSnafu
        );

        let decoded = zstd::decode_all(payload).context(CompressionSnafu)?;
        let (entry, _) = bincode::decode_from_slice(&decoded, bincode::config::standard())
            .context(DecodeSnafu)?;
        Ok(entry)
    }
}

#[derive(Debug, Snafu)]
pub enum JournalError {
    #[snafu(display("Failed to access the journal at {}", path.best_effort_path_display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to encode the journal"))]
    Encode { source: bincode::error::EncodeError },
    #[snafu(display("Failed to decode the journal"))]
    Decode { source: bincode::error::DecodeError },
    #[snafu(display("Failed to (de)compress the journal"))]
    Compression { source: std::io::Error },
    #[snafu(display("The journal is truncated"))]
    Truncated,
    #[snafu(display("The journal checksum does not match its contents"))]
    Checksum,
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::operations::{DiffGranularity, diff_to_operation};

    fn entry() -> JournalEntry {
        let mut operations = OpSet::new();
        operations.insert(
            "a.txt",
            diff_to_operation("hello world", "hello there world", DiffGranularity::Words),
        );
        JournalEntry {
            action: "merge-up".into(),
            subject: "P2".into(),
            started: "2024-01-01T00:00:00Z".into(),
            writes: vec![PlannedWrite {
                identity: "a4c2a3f0-5d7e-4c41-9a53-0f4f9d7a1e11".into(),
                id: "Sibling".into(),
                operations,
            }],
        }
    }

    #[compio::test]
    async fn record_read_and_clear() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let journal = Journal::new(dir.path());
        assert_eq!(journal.read().await.unwrap(), None);

        journal.record(&entry()).await.unwrap();
        assert_eq!(journal.read().await.unwrap(), Some(entry()));

        journal.clear().await.unwrap();
        assert_eq!(journal.read().await.unwrap(), None);
        journal.clear().await.unwrap();
    }

    #[test]
    fn corrupted_bytes_are_rejected() {
        let mut bytes = Journal::encode(&entry()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            Journal::decode(&bytes),
            Err(JournalError::Checksum)
        ));
        assert!(matches!(
            Journal::decode(&bytes[..4]),
            Err(JournalError::Truncated)
        ));
    }

    #[test]
    fn display_names_every_write() {
        let shown = entry().to_string();
        assert!(shown.starts_with("merge-up of 'P2'"));
        assert!(shown.contains("Sibling"));
        assert!(shown.contains("a.txt"));
    }
}
