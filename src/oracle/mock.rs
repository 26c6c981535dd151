//! 脚本化决策预言机（用于测试与演示，无需 API）
//!
//! 按调用顺序消费预先排好的回复：
//! - generate_structured_native 依次弹出结构化结果（耗尽后返回错误，走文本兜底）；
//! - select_tool 依次弹出工具选择（耗尽后返回 None）；
//! - generate_text 依次弹出文本（耗尽后返回默认文本）。

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::oracle::{DecisionOracle, Message, ToolSelection};
use crate::tools::ToolDescriptor;

const DEFAULT_TEXT: &str = "继续按计划执行下一步。";

/// 脚本化预言机
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    texts: Mutex<VecDeque<String>>,
    structured: Mutex<VecDeque<Result<Value, AgentError>>>,
    selections: Mutex<VecDeque<Result<Option<ToolSelection>, AgentError>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.texts.get_mut().push_back(text.into());
        self
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured.get_mut().push_back(Ok(value));
        self
    }

    pub fn with_selection(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.selections
            .get_mut()
            .push_back(Ok(Some(ToolSelection::new(name, arguments))));
        self
    }

    /// 让下一次 select_tool 失败（用于测试结构化兜底路径）
    pub fn with_selection_error(mut self, message: impl Into<String>) -> Self {
        self.selections
            .get_mut()
            .push_back(Err(AgentError::OracleError(message.into())));
        self
    }

    /// 剩余未消费的工具选择数
    pub async fn pending_selections(&self) -> usize {
        self.selections.lock().await.len()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn generate_text(&self, _prompt: &str, _system_prompt: &str) -> Result<String, AgentError> {
        Ok(self
            .texts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| DEFAULT_TEXT.to_string()))
    }

    async fn generate_structured_native(
        &self,
        _prompt: &str,
        _schema: &Value,
        _system_prompt: &str,
    ) -> Result<Value, AgentError> {
        self.structured
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::OracleError("script exhausted".to_string())))
    }

    async fn select_tool(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, AgentError> {
        self.selections.lock().await.pop_front().unwrap_or(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_consumed_in_order() {
        let oracle = ScriptedOracle::new()
            .with_selection("validate", json!({}))
            .with_selection("create", json!({"name": "x"}));
        let first = oracle.select_tool("", &[], &[]).await.unwrap().unwrap();
        let second = oracle.select_tool("", &[], &[]).await.unwrap().unwrap();
        assert_eq!(first.name, "validate");
        assert_eq!(second.arguments["name"], "x");
        assert!(oracle.select_tool("", &[], &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_structured_falls_back_to_text() {
        let oracle = ScriptedOracle::new().with_text("{\"ok\": true}");
        let v = oracle
            .generate_structured("p", &json!({}), "")
            .await
            .unwrap();
        assert_eq!(v, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_default_text() {
        let oracle = ScriptedOracle::new();
        assert_eq!(oracle.generate_text("p", "").await.unwrap(), DEFAULT_TEXT);
    }
}
