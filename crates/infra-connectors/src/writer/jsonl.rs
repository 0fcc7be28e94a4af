// JSON-lines writer: one document per line, synced per batch
use async_trait::async_trait;
use quarry_core::domain::Item;
use quarry_core::port::{ItemWriter, WriterError};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Appends `{"id": ..., "data": ...}` lines to `path`
pub struct JsonlWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File, WriterError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.unavailable(e))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, err: std::io::Error) -> WriterError {
        WriterError::Unavailable(format!("{}: {}", self.path.display(), err))
    }
}

#[async_trait]
impl ItemWriter for JsonlWriter {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write(&self, items: &[Item]) -> Result<usize, WriterError> {
        let mut buffer = Vec::new();
        for item in items {
            let line = serde_json::json!({"id": item.id, "data": item.data});
            serde_json::to_writer(&mut buffer, &line).map_err(|e| WriterError::Rejected {
                accepted: 0,
                reason: e.to_string(),
            })?;
            buffer.push(b'\n');
        }

        // Batches are serialized through the lock, so lines never interleave
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(WriterError::Unavailable("file not open".to_string()));
        };

        let result = async {
            file.write_all(&buffer).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = result {
            // Reopen on the next batch
            *guard = None;
            return Err(self.unavailable(e));
        }

        debug!(path = %self.path.display(), items = items.len(), "Wrote jsonl batch");
        Ok(items.len())
    }

    async fn flush(&self) -> Result<(), WriterError> {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            file.flush().await.map_err(|e| self.unavailable(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_appends_one_line_per_item_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("items.jsonl");
        let writer = JsonlWriter::new(&path);

        let first = vec![Item::new("a", json!({"n": 1})), Item::new("b", json!({"n": 2}))];
        let second = vec![Item::new("c", json!({"n": 3}))];
        assert_eq!(writer.write(&first).await.unwrap(), 2);
        assert_eq!(writer.write(&second).await.unwrap(), 1);
        writer.flush().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], "a");
        assert_eq!(lines[2]["data"]["n"], 3);
    }

    #[tokio::test]
    async fn test_existing_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        tokio::fs::write(&path, "{\"id\":\"old\",\"data\":null}\n")
            .await
            .unwrap();

        let writer = JsonlWriter::new(&path);
        writer.write(&[Item::new("new", json!(null))]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let writer = JsonlWriter::new(dir.path());
        let err = writer.write(&[Item::new("a", json!(1))]).await.unwrap_err();
        assert!(matches!(err, WriterError::Unavailable(_)));
    }
}
