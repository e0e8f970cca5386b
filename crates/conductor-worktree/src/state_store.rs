//! A single JSON document, `{ repo_path: { session_name: WorktreeRecord } }`,
//! written atomically via a sibling tempfile + rename.

use crate::error::Result;
use conductor_types::WorktreeRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

type RepoKey = String;
type Document = HashMap<RepoKey, HashMap<String, WorktreeRecord>>;

pub struct WorktreeStateStore {
    path: PathBuf,
    document: RwLock<Document>,
}

fn repo_key(repo_path: &Path) -> String {
    repo_path.to_string_lossy().into_owned()
}

impl WorktreeStateStore {
    /// Loads the document from `path` if present; a missing or
    /// malformed file yields an empty store rather than an error.
    pub async fn load(path: PathBuf) -> Self {
        let document = Self::read_from_disk(&path).unwrap_or_default();
        Self {
            path,
            document: RwLock::new(document),
        }
    }

    fn read_from_disk(path: &Path) -> Option<Document> {
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    async fn persist(&self) -> Result<()> {
        let document = self.document.read().await;
        let json = serde_json::to_string_pretty(&*document)?;
        drop(document);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp_path = self.path.clone();
        let tmp_name = format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("worktrees.json")
        );
        tmp_path.set_file_name(tmp_name);

        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, repo_path: &Path, name: &str) -> Option<WorktreeRecord> {
        let document = self.document.read().await;
        document.get(&repo_key(repo_path))?.get(name).cloned()
    }

    pub async fn upsert(&self, record: WorktreeRecord) -> Result<()> {
        let key = repo_key(&record.repo_path);
        {
            let mut document = self.document.write().await;
            document.entry(key).or_default().insert(record.name.clone(), record);
        }
        self.persist().await
    }

    pub async fn remove(&self, repo_path: &Path, name: &str) -> Result<()> {
        {
            let mut document = self.document.write().await;
            if let Some(repo) = document.get_mut(&repo_key(repo_path)) {
                repo.remove(name);
                if repo.is_empty() {
                    document.remove(&repo_key(repo_path));
                }
            }
        }
        self.persist().await
    }

    pub async fn all_for_repo(&self, repo_path: &Path) -> Vec<WorktreeRecord> {
        let document = self.document.read().await;
        document
            .get(&repo_key(repo_path))
            .map(|repo| repo.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn all(&self) -> Vec<WorktreeRecord> {
        let document = self.document.read().await;
        document
            .values()
            .flat_map(|repo| repo.values().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_types::WorktreeStatus;

    fn sample_record(repo: &Path, name: &str) -> WorktreeRecord {
        WorktreeRecord {
            name: name.to_string(),
            session_id: Some("sess-1".to_string()),
            repo_path: repo.to_path_buf(),
            worktree_path: repo.join(".conductor-worktrees").join(name),
            branch: format!("conductor/{name}"),
            base_branch: "main".to_string(),
            base_commit: "deadbeef".to_string(),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            status: WorktreeStatus::Active,
            commits_ahead: 0,
            has_changes: false,
        }
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worktrees.json");
        let repo = dir.path().join("repo");

        let store = WorktreeStateStore::load(path.clone()).await;
        store.upsert(sample_record(&repo, "feature-x")).await.unwrap();

        let reloaded = WorktreeStateStore::load(path).await;
        let record = reloaded.get(&repo, "feature-x").await.unwrap();
        assert_eq!(record.branch, "conductor/feature-x");
    }

    #[tokio::test]
    async fn missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let store = WorktreeStateStore::load(path).await;
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn remove_drops_empty_repo_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worktrees.json");
        let repo = dir.path().join("repo");

        let store = WorktreeStateStore::load(path).await;
        store.upsert(sample_record(&repo, "only-one")).await.unwrap();
        store.remove(&repo, "only-one").await.unwrap();

        assert!(store.all_for_repo(&repo).await.is_empty());
    }
}
