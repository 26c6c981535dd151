//! 闭包工具：把同步函数包装成 Tool
//!
//! 同步 handler 在 WorkerPool 的阻塞线程上执行，不会卡住 ReAct 主循环。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::WorkerPool;
use crate::tools::{InputSchema, Tool};

type Handler = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// 基于同步闭包的工具
pub struct FnTool {
    name: String,
    description: String,
    aliases: Vec<String>,
    schema: InputSchema,
    timeout: Option<Duration>,
    pool: WorkerPool,
    handler: Arc<Handler>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            aliases: Vec::new(),
            schema: InputSchema::default(),
            timeout: None,
            pool: WorkerPool::default(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 共享工作池（多个 FnTool 共用同一组阻塞线程许可）
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn aliases(&self) -> Vec<String> {
        self.aliases.clone()
    }

    fn input_schema(&self) -> InputSchema {
        self.schema.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, params: Value) -> Result<Value, String> {
        let handler = self.handler.clone();
        self.pool
            .run_blocking(move || handler(params))
            .await
            .map_err(|e| e.to_string())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolExecutor, ToolRegistry};

    #[tokio::test]
    async fn test_fn_tool_runs_on_pool() {
        let tool = FnTool::new("add", "adds a and b", |p| {
            let a = p["a"].as_i64().ok_or("a missing")?;
            let b = p["b"].as_i64().ok_or("b missing")?;
            Ok(serde_json::json!({ "sum": a + b }))
        })
        .with_alias("plus");
        let out = tool.execute(serde_json::json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out["sum"], 5);
    }

    #[tokio::test]
    async fn test_blocking_handler_times_out() {
        let tool = FnTool::new("stall", "blocks", |_| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Value::Null)
        })
        .with_timeout(Duration::from_millis(50));
        let mut reg = ToolRegistry::new();
        reg.register(tool);
        let exec = ToolExecutor::new(reg, 30);
        let start = std::time::Instant::now();
        let out = exec.execute("stall", Value::Null).await;
        assert!(!out.success);
        assert!(start.elapsed() < Duration::from_millis(400));
    }
}
