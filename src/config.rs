//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLANLOOP__*` 覆盖（双下划线表示嵌套，如 `PLANLOOP__ENGINE__MAX_STEPS=30`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub tools: ToolsSection,
    pub delegation: DelegationSection,
    pub oracle: OracleSection,
    pub store: StoreSection,
}

/// [engine] 段：主循环步数、重试、持久化节奏、预言机超时
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 单次工具调用最多尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// 每隔多少步保存一次快照
    #[serde(default = "default_persist_every")]
    pub persist_every: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default = "default_render_plan")]
    pub render_plan: bool,
    pub system_prompt: Option<String>,
}

fn default_max_steps() -> usize {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_persist_every() -> usize {
    5
}

fn default_history_capacity() -> usize {
    crate::plan::DEFAULT_HISTORY_CAPACITY
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

fn default_agent_name() -> String {
    "orchestrator".to_string()
}

fn default_render_plan() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            persist_every: default_persist_every(),
            history_capacity: default_history_capacity(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
            agent_name: default_agent_name(),
            render_plan: default_render_plan(),
            system_prompt: None,
        }
    }
}

/// [tools] 段：工具超时、同步工具的工作线程数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_worker_threads() -> usize {
    4
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            worker_threads: default_worker_threads(),
        }
    }
}

/// [delegation] 段：子 Agent 默认步数预算、整体超时与暂停会话的保留时长
#[derive(Debug, Clone, Deserialize)]
pub struct DelegationSection {
    #[serde(default = "default_sub_agent_steps")]
    pub default_max_steps: usize,
    #[serde(default = "default_sub_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// 等待用户回答的子会话超过该时长后被清理，其 state_token 失效
    #[serde(default = "default_paused_ttl_secs")]
    pub paused_ttl_secs: u64,
}

fn default_sub_agent_steps() -> usize {
    8
}

fn default_sub_agent_timeout_secs() -> u64 {
    300
}

fn default_paused_ttl_secs() -> u64 {
    3600
}

impl Default for DelegationSection {
    fn default() -> Self {
        Self {
            default_max_steps: default_sub_agent_steps(),
            timeout_secs: default_sub_agent_timeout_secs(),
            paused_ttl_secs: default_paused_ttl_secs(),
        }
    }
}

/// [oracle] 段：mock / openai；API Key 从 OPENAI_API_KEY 读取
#[derive(Debug, Clone, Deserialize)]
pub struct OracleSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// [store] 段：memory / file / sqlite
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// file 后端为目录，sqlite 后端为数据库文件
    pub path: Option<PathBuf>,
}

fn default_backend() -> String {
    "memory".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PLANLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLANLOOP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLANLOOP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder
        .build()
        .map_err(|e| AgentError::ConfigError(e.to_string()))?;
    c.try_deserialize()
        .map_err(|e| AgentError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_steps, 20);
        assert_eq!(cfg.engine.max_attempts, 3);
        assert_eq!(cfg.engine.backoff_base_ms, 1000);
        assert_eq!(cfg.engine.persist_every, 5);
        assert_eq!(cfg.engine.history_capacity, 50);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.delegation.default_max_steps, 8);
        assert_eq!(cfg.delegation.timeout_secs, 300);
        assert_eq!(cfg.delegation.paused_ttl_secs, 3600);
        assert_eq!(cfg.oracle.provider, "mock");
        assert_eq!(cfg.store.backend, "memory");
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nmax_steps = 7\n\n[store]\nbackend = \"sqlite\"\npath = \"state.db\"").unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.engine.max_steps, 7);
        // 未出现的键保持默认
        assert_eq!(cfg.engine.max_attempts, 3);
        assert_eq!(cfg.store.backend, "sqlite");
        assert_eq!(cfg.store.path, Some(PathBuf::from("state.db")));
    }
}
