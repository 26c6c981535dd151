//! 会话状态存储抽象层
//!
//! 统一的 load / save 接口，支持内存、JSON 文件与 SQLite 三种实现；快照结构带 schema 版本，
//! 新增字段均有默认值，旧快照仍可加载。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::SessionContext;

/// 当前快照格式版本
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// 持久化的会话快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
    pub context: SessionContext,
}

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

impl SessionSnapshot {
    pub fn new(context: SessionContext) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            context,
        }
    }
}

/// 会话存储接口（同一 session_id 假定同时只有一个编排器写入，后写覆盖）
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 加载快照；不存在时返回 None
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>>;

    /// 保存快照（覆盖）
    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()>;
}
