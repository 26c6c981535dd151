//! 内存会话存储（进程内，测试与单机演示用）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{SessionSnapshot, StateStore};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SessionContext;

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryStateStore::new();
        assert!(store.load("s1").await.unwrap().is_none());
        let mut ctx = SessionContext::new("s1");
        ctx.version = 3;
        store.save("s1", &SessionSnapshot::new(ctx)).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.context.version, 3);
        assert_eq!(store.len().await, 1);
    }
}
