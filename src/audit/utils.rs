use std::path::Path;

use serde::Serialize;
use crate::errors::WardenError;

/// Write to a sibling temp file, then rename over the target.
pub async fn atomic_write(path: &Path, content: &str) -> Result<(), WardenError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("out")
    ));
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Pretty-printed JSON through [`atomic_write`].
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), WardenError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, &json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        atomic_write(&path, "first").await.unwrap();
        atomic_write(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("nested").join("report.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.json");
        write_json(&path, &serde_json::json!({"pending": []})).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["pending"], serde_json::json!([]));
    }
}
