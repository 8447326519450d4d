use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::errors::WardenError;

/// Human-readable companion to the JSONL journal.
pub struct WorkflowLogger {
    path: PathBuf,
}

impl WorkflowLogger {
    pub fn new(base_dir: &Path) -> Self {
        Self { path: base_dir.join("workflow.log") }
    }

    pub async fn initialize(&self, run_id: &str) -> Result<(), WardenError> {
        let header = format!(
            "# Warden Workflow Log\n# Run: {}\n# Started: {}\n\n",
            run_id,
            Utc::now().to_rfc3339()
        );
        tokio::fs::write(&self.path, &header).await?;
        Ok(())
    }

    pub async fn log_event(&self, phase: Option<&str>, message: &str) -> Result<(), WardenError> {
        let line = match phase {
            Some(phase) => format!("[{}] [{}] {}\n", Utc::now().format("%H:%M:%S"), phase, message),
            None => format!("[{}] {}\n", Utc::now().format("%H:%M:%S"), message),
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}
