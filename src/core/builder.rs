//! 引擎构建器：统一的编排器初始化逻辑
//!
//! 由 AppConfig 决定决策预言机（mock / openai）、状态存储（memory / file / sqlite）、
//! 工具执行器超时与工作池；调用方注册函数工具与子 Agent 后 build() 得到 Orchestrator。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::AppConfig;
use crate::core::{AgentError, WorkerPool};
use crate::delegate::SubAgentTool;
use crate::oracle::{DecisionOracle, OpenAiOracle, ScriptedOracle};
use crate::react::{Orchestrator, OrchestratorConfig, ReactEvent};
use crate::store::{FileStateStore, MemoryStateStore, SqliteStateStore, StateStore};
use crate::tools::{FnTool, Tool, ToolExecutor, ToolRegistry};

const DEFAULT_STATE_DIR: &str = "state";
const DEFAULT_SQLITE_PATH: &str = "state/sessions.db";

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    oracle: Option<Arc<dyn DecisionOracle>>,
    store: Option<Arc<dyn StateStore>>,
    registry: ToolRegistry,
    pool: WorkerPool,
    event_tx: Option<tokio::sync::mpsc::UnboundedSender<ReactEvent>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        let pool = WorkerPool::new(config.tools.worker_threads);
        Self {
            config,
            oracle: None,
            store: None,
            registry: ToolRegistry::new(),
            pool,
            event_tx: None,
        }
    }

    /// 覆盖配置中的预言机选择（测试时注入 ScriptedOracle）
    pub fn with_oracle(mut self, oracle: Arc<dyn DecisionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, tx: tokio::sync::mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    /// 注册同步函数工具（共享构建器的工作池）
    pub fn with_fn_tool<F>(mut self, name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.registry
            .register(FnTool::new(name, description, handler).with_pool(self.pool.clone()));
        self
    }

    /// 注册子 Agent：工具集为当前已注册工具按白名单裁剪，因此应在函数工具之后调用
    pub fn with_sub_agent(mut self, name: &str, description: &str, allowed_tools: &[&str]) -> Result<Self, AgentError> {
        let oracle = self.build_oracle()?;
        let delegation = &self.config.delegation;
        let tool = SubAgentTool::new(name, description, oracle, &self.registry, allowed_tools)
            .with_config(OrchestratorConfig::from(&self.config))
            .with_tool_timeout(Duration::from_secs(self.config.tools.tool_timeout_secs))
            .with_max_steps(delegation.default_max_steps)
            .with_timeout(Duration::from_secs(delegation.timeout_secs))
            .with_paused_ttl(Duration::from_secs(delegation.paused_ttl_secs));
        self.registry.register(tool);
        Ok(self)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 决策预言机：显式注入优先，其次按 [oracle].provider
    pub fn build_oracle(&self) -> Result<Arc<dyn DecisionOracle>, AgentError> {
        if let Some(oracle) = &self.oracle {
            return Ok(oracle.clone());
        }
        let section = &self.config.oracle;
        match section.provider.to_lowercase().as_str() {
            "mock" => {
                tracing::warn!("Using scripted mock oracle");
                Ok(Arc::new(ScriptedOracle::new()))
            }
            "openai" => {
                tracing::info!(model = %section.model, "Using OpenAI-compatible oracle");
                Ok(Arc::new(OpenAiOracle::new(
                    section.base_url.as_deref(),
                    &section.model,
                    None,
                )))
            }
            other => Err(AgentError::ConfigError(format!("unknown oracle provider: {other}"))),
        }
    }

    /// 状态存储：显式注入优先，其次按 [store].backend
    pub fn build_store(&self) -> Result<Arc<dyn StateStore>, AgentError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let section = &self.config.store;
        let store: Arc<dyn StateStore> = match section.backend.to_lowercase().as_str() {
            "memory" => Arc::new(MemoryStateStore::new()),
            "file" => {
                let dir = section
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
                Arc::new(FileStateStore::new(dir))
            }
            "sqlite" => {
                let path = section
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH));
                let store = SqliteStateStore::open(&path)
                    .map_err(|e| AgentError::StoreError(e.to_string()))?;
                Arc::new(store)
            }
            other => {
                return Err(AgentError::ConfigError(format!("unknown store backend: {other}")));
            }
        };
        tracing::info!(backend = %section.backend, "state store ready");
        Ok(store)
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let oracle = self.build_oracle()?;
        let store = self.build_store()?;
        let executor = ToolExecutor::new(self.registry, self.config.tools.tool_timeout_secs);
        let mut orchestrator =
            Orchestrator::new(oracle, executor, OrchestratorConfig::from(&self.config)).with_store(store);
        if let Some(tx) = self.event_tx {
            orchestrator = orchestrator.with_event_tx(tx);
        }
        Ok(orchestrator)
    }
}

/// 便捷函数：加载配置（失败时回退默认值）并创建构建器
pub fn create_engine_builder(config_path: Option<PathBuf>) -> EngineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    EngineBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_backend_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.store.backend = "redis".into();
        let err = EngineBuilder::new(cfg).build_store().err().unwrap();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[test]
    fn test_sub_agent_sees_whitelisted_tools_only() {
        let builder = EngineBuilder::new(AppConfig::default())
            .with_fn_tool("lint", "lint", |_| Ok(json!({})))
            .with_fn_tool("deploy", "deploy", |_| Ok(json!({})))
            .with_sub_agent("reviewer", "reviews code", &["lint"])
            .unwrap();
        assert_eq!(builder.registry().tool_names(), vec!["lint", "deploy", "reviewer"]);
    }

    #[tokio::test]
    async fn test_build_with_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.store.backend = "sqlite".into();
        cfg.store.path = Some(dir.path().join("nested").join("s.db"));
        let orchestrator = EngineBuilder::new(cfg).build().unwrap();
        assert_eq!(orchestrator.config().max_steps, 20);
        assert!(dir.path().join("nested").join("s.db").exists());
    }
}
