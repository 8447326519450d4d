use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::entry::AuditEntry;
use crate::errors::WardenError;

/// `audit.jsonl`: one JSON object per entry, flushed as it is written.
pub struct AuditJournal {
    path: PathBuf,
    file: tokio::fs::File,
}

impl AuditJournal {
    pub async fn open(base_dir: &Path) -> Result<Self, WardenError> {
        let path = base_dir.join("audit.jsonl");
        let file = tokio::fs::OpenOptions::new()
            .create(true).append(true).open(&path).await?;
        Ok(Self { path, file })
    }

    pub async fn append(&mut self, entry: &AuditEntry) -> Result<(), WardenError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a journal back, skipping lines that do not parse.
pub async fn read_journal(path: &Path) -> Result<Vec<AuditEntry>, WardenError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
