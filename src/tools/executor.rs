//! 工具执行器
//!
//! 持有 ToolRegistry 与默认超时，execute(tool_name, params) 解析工具、规整参数、校验必填字段，
//! 在独立任务中以超时调用；未知工具、参数非法、超时、失败一律转为结构化 ToolOutcome（从不向上抛错），
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::core::{AgentError, RecoveryEngine};
use crate::tools::{Tool, ToolDescriptor, ToolRegistry};

/// 一次工具调用的结构化结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub success: bool,
    /// 工具原始返回（失败时为 `{success:false, error}`）
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 是否为瞬时故障（超时 / 执行异常），值得重试
    #[serde(default)]
    pub retryable: bool,
    pub duration_ms: u64,
}

impl ToolOutcome {
    fn failure(tool: &str, err: &AgentError, retryable: bool, duration_ms: u64) -> Self {
        let message = err.to_string();
        Self {
            tool: tool.to_string(),
            success: false,
            output: serde_json::json!({ "success": false, "error": message }),
            error: Some(message),
            retryable,
            duration_ms,
        }
    }

    /// 子 Agent 请求用户输入的信号（不视为失败）
    pub fn need_user_input(&self) -> Option<&Value> {
        self.output.get("need_user_input").filter(|v| !v.is_null())
    }

    pub fn state_token(&self) -> Option<&str> {
        self.output.get("state_token").and_then(Value::as_str)
    }

    /// 作为 Observation 记录的字面结果
    pub fn to_observation(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 ToolOutcome
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    recovery: RecoveryEngine,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.resolve(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, params: Value) -> ToolOutcome {
        let start = Instant::now();
        let params = coerce_params(params);
        let params_preview = params_preview(&params);

        let (outcome, label) = self.dispatch(tool_name, params, start).await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome.success,
            "outcome": label,
            "duration_ms": outcome.duration_ms,
            "params_preview": params_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    async fn dispatch(&self, tool_name: &str, params: Value, start: Instant) -> (ToolOutcome, &'static str) {
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let Some(tool) = self.registry.resolve(tool_name) else {
            let err = AgentError::UnknownTool(tool_name.to_string());
            return (ToolOutcome::failure(tool_name, &err, false, elapsed(start)), "unknown");
        };
        let name = tool.name().to_string();

        let missing = tool.input_schema().missing_required(&params);
        if !missing.is_empty() {
            let err = AgentError::InvalidParams(format!("missing required field(s): {}", missing.join(", ")));
            return (ToolOutcome::failure(&name, &err, false, elapsed(start)), "invalid");
        }

        let limit = tool.timeout().unwrap_or(self.timeout);
        let handle = tokio::spawn({
            let tool = tool.clone();
            async move { tool.execute(params).await }
        });
        let abort = handle.abort_handle();

        match timeout(limit, handle).await {
            Ok(Ok(Ok(output))) => {
                let success = output.get("success").and_then(Value::as_bool).unwrap_or(true);
                let error = if success {
                    None
                } else {
                    Some(
                        output
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("tool reported failure")
                            .to_string(),
                    )
                };
                let outcome = ToolOutcome {
                    tool: name,
                    success,
                    output,
                    error,
                    retryable: false,
                    duration_ms: elapsed(start),
                };
                (outcome, if success { "ok" } else { "error" })
            }
            Ok(Ok(Err(message))) => {
                let err = AgentError::ToolExecutionFailed(message);
                let retryable = self.recovery.is_retryable(&err);
                (ToolOutcome::failure(&name, &err, retryable, elapsed(start)), "error")
            }
            Ok(Err(join_err)) => {
                let err = AgentError::ToolExecutionFailed(format!("tool task aborted: {join_err}"));
                let retryable = self.recovery.is_retryable(&err);
                (ToolOutcome::failure(&name, &err, retryable, elapsed(start)), "error")
            }
            Err(_) => {
                abort.abort();
                let err = AgentError::ToolTimeout(format!("{name} exceeded {}ms", limit.as_millis()));
                let retryable = self.recovery.is_retryable(&err);
                (ToolOutcome::failure(&name, &err, retryable, elapsed(start)), "timeout")
            }
        }
    }
}

/// 参数规整：null → `{}`；内容为 JSON 对象的字符串 → 该对象；其他非对象值 → `{"input": <字符串形式>}`
pub fn coerce_params(params: Value) -> Value {
    match params {
        Value::Object(_) => params,
        Value::Null => Value::Object(Default::default()),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(obj @ Value::Object(_)) => obj,
            _ => serde_json::json!({ "input": s }),
        },
        other => serde_json::json!({ "input": other.to_string() }),
    }
}

fn params_preview(params: &Value) -> String {
    let s = params.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::InputSchema;
    use async_trait::async_trait;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
        async fn execute(&self, _params: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct Strict;

    #[async_trait]
    impl Tool for Strict {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            "writes"
        }
        fn input_schema(&self) -> InputSchema {
            InputSchema::new().required_field("path", "target path")
        }
        async fn execute(&self, params: Value) -> Result<Value, String> {
            Ok(serde_json::json!({ "written": params["path"] }))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always errors"
        }
        async fn execute(&self, _params: Value) -> Result<Value, String> {
            Err("disk on fire".to_string())
        }
    }

    fn executor() -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(Sleepy);
        reg.register(Strict);
        reg.register(Broken);
        ToolExecutor::new(reg, 30)
    }

    #[tokio::test]
    async fn test_timeout_returns_structured_failure() {
        let exec = executor();
        let start = Instant::now();
        let out = exec.execute("sleepy", Value::Null).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!out.success);
        assert!(out.retryable);
        assert_eq!(out.output["success"], serde_json::json!(false));
        assert!(out.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured() {
        let out = executor().execute("fake_tool", serde_json::json!({})).await;
        assert!(!out.success);
        assert!(!out.retryable);
        assert!(out.to_observation().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_missing_required_not_retryable() {
        let exec = executor();
        let out = exec.execute("write-file", serde_json::json!({})).await;
        assert!(!out.success);
        assert!(!out.retryable);
        let ok = exec.execute("WRITE_FILE", serde_json::json!({"path": "a.txt"})).await;
        assert!(ok.success);
        assert_eq!(ok.output["written"], "a.txt");
    }

    #[tokio::test]
    async fn test_handler_error_is_retryable() {
        let out = executor().execute("broken", Value::Null).await;
        assert!(!out.success);
        assert!(out.retryable);
        assert!(out.error.unwrap().contains("disk on fire"));
    }

    #[test]
    fn test_coerce_params() {
        assert_eq!(coerce_params(Value::Null), serde_json::json!({}));
        assert_eq!(
            coerce_params(Value::String(r#"{"a":1}"#.into())),
            serde_json::json!({"a": 1})
        );
        assert_eq!(
            coerce_params(Value::String("hello".into())),
            serde_json::json!({"input": "hello"})
        );
        assert_eq!(coerce_params(serde_json::json!([1, 2])), serde_json::json!({"input": "[1,2]"}));
    }
}
