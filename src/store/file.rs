//! JSON 文件会话存储
//!
//! 每个会话一个文件：`<dir>/<百分号编码的 session_id>.json`；目录不存在时自动创建。
//! 文件读写经 spawn_blocking 执行，不阻塞异步运行时。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::store::{SessionSnapshot, StateStore};

#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 文件名为会话 id 的百分号编码（仅保留 `[A-Za-z0-9-_.~]`），不同 id 不会映射到同一文件
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let name = if session_id.is_empty() {
            "%".to_string()
        } else {
            urlencoding::encode(session_id).into_owned()
        };
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        let path = self.path_for(session_id);
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<SessionSnapshot>> {
            if !path.exists() {
                return Ok(None);
            }
            let data = std::fs::read_to_string(&path)?;
            Ok(Some(serde_json::from_str(&data)?))
        })
        .await?
    }

    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let path = self.path_for(session_id);
        let data = serde_json::to_string_pretty(snapshot)?;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, SessionContext, Task};

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("sessions"));
        let ctx = SessionContext::new("user/42")
            .with_plan(Plan::from_tasks(vec![Task::new("t1", "Validate")]));
        store.save("user/42", &SessionSnapshot::new(ctx.clone())).await.unwrap();

        assert!(store.path_for("user/42").ends_with("user%2F42.json"));
        let loaded = store.load("user/42").await.unwrap().unwrap();
        assert_eq!(loaded.context, ctx);
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_similar_ids_use_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        assert_ne!(store.path_for("a:b"), store.path_for("a_b"));

        let colon = SessionContext::new("a:b").with_mission("first");
        let underscore = SessionContext::new("a_b").with_mission("second");
        store.save("a:b", &SessionSnapshot::new(colon)).await.unwrap();
        store.save("a_b", &SessionSnapshot::new(underscore)).await.unwrap();

        let loaded = store.load("a:b").await.unwrap().unwrap();
        assert_eq!(loaded.context.mission, "first");
        let loaded = store.load("a_b").await.unwrap().unwrap();
        assert_eq!(loaded.context.mission, "second");
    }
}
