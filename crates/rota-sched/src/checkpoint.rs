//! File-based checkpoint access for crash recovery.
//!
//! One JSON file per task id under a configurable directory. Recovery only
//! consumes checkpoints; writing them is the business of whatever executes
//! the long-running work.

use std::path::PathBuf;

use async_trait::async_trait;

use rota_types::CheckpointStore;

pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn exists(&self, task_id: i64) -> bool {
        tokio::fs::try_exists(self.path_for(task_id))
            .await
            .unwrap_or(false)
    }

    async fn load(&self, task_id: i64) -> anyhow::Result<Option<String>> {
        let path = self.path_for(task_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rota-ckpt-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let store = FileCheckpointStore::new(temp_dir("missing"));
        assert!(!store.exists(42).await);
        assert!(store.load(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_existing_checkpoint() {
        let dir = temp_dir("load");
        std::fs::write(dir.join("7.json"), "{\"cursor\":\"page-3\"}").unwrap();

        let store = FileCheckpointStore::new(dir.clone());
        assert!(store.exists(7).await);
        let loaded = store.load(7).await.unwrap().unwrap();
        assert!(loaded.contains("page-3"));
        std::fs::remove_dir_all(dir).ok();
    }
}
