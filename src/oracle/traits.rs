//! 决策预言机端口
//!
//! 引擎只依赖这一组接口：自由文本生成、按 schema 的结构化生成、从工具描述中选择下一步动作。
//! 所有后端（OpenAI 兼容 / 脚本化 Mock）实现 DecisionOracle。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::oracle::Message;
use crate::tools::ToolDescriptor;

/// select_tool 的结果：选中的工具名与参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolSelection {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// 决策预言机 trait
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// 自由文本生成
    async fn generate_text(&self, prompt: &str, system_prompt: &str) -> Result<String, AgentError>;

    /// 原生结构化输出（function call / JSON mode）；默认不支持
    async fn generate_structured_native(
        &self,
        _prompt: &str,
        _schema: &Value,
        _system_prompt: &str,
    ) -> Result<Value, AgentError> {
        Err(AgentError::OracleError(
            "native structured output not supported".to_string(),
        ))
    }

    /// 结构化生成：先尝试原生路径，失败后退回 schema 引导的纯文本 JSON 解析
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        system_prompt: &str,
    ) -> Result<Value, AgentError> {
        match self
            .generate_structured_native(prompt, schema, system_prompt)
            .await
        {
            Ok(value) => return Ok(value),
            Err(e) => tracing::debug!(error = %e, "native structured output failed, using schema-guided text"),
        }
        let guided = format!(
            "{prompt}\n\nRespond with a single JSON value that conforms to this JSON Schema, and nothing else:\n{}",
            serde_json::to_string_pretty(schema).unwrap_or_default()
        );
        let text = self.generate_text(&guided, system_prompt).await?;
        extract_json(&text)
    }

    /// 从工具描述中选择下一步；None 表示预言机未选择任何工具
    async fn select_tool(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, AgentError>;
}

/// 按 T 的 JsonSchema 生成结构化结果并反序列化
pub async fn generate_typed<T>(
    oracle: &dyn DecisionOracle,
    prompt: &str,
    system_prompt: &str,
) -> Result<T, AgentError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_value(schemars::schema_for!(T))
        .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
    let value = oracle
        .generate_structured(prompt, &schema, system_prompt)
        .await?;
    serde_json::from_value(value.clone())
        .map_err(|e| AgentError::JsonParseError(format!("{e}: {value}")))
}

/// 从模型文本中提取 JSON（```json 代码块、``` 代码块，或首个 `{` 到最后一个 `}`）
pub fn extract_json(text: &str) -> Result<Value, AgentError> {
    let trimmed = text.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        trimmed
    };

    serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TextOnly(String);

    #[async_trait]
    impl DecisionOracle for TextOnly {
        async fn generate_text(&self, _prompt: &str, _system: &str) -> Result<String, AgentError> {
            Ok(self.0.clone())
        }

        async fn select_tool(
            &self,
            _system: &str,
            _messages: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<Option<ToolSelection>, AgentError> {
            Ok(None)
        }
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Answer {
        value: i64,
    }

    #[test]
    fn test_extract_json_fenced() {
        let v = extract_json("Sure:\n```json\n{\"a\": 1}\n```\nbye").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_extract_json_embedded() {
        let v = extract_json("I think {\"tool\": \"echo\"} is best").unwrap();
        assert_eq!(v["tool"], "echo");
    }

    #[test]
    fn test_extract_json_invalid() {
        assert!(matches!(
            extract_json("no json here"),
            Err(AgentError::JsonParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_structured_falls_back_to_text() {
        let oracle = TextOnly("```json\n{\"value\": 7}\n```".to_string());
        let answer: Answer = generate_typed(&oracle, "give me a number", "").await.unwrap();
        assert_eq!(answer.value, 7);
    }

    #[tokio::test]
    async fn test_typed_mismatch_is_parse_error() {
        let oracle = TextOnly("{\"other\": true}".to_string());
        let result: Result<Answer, _> = generate_typed(&oracle, "x", "").await;
        assert!(matches!(result, Err(AgentError::JsonParseError(_))));
    }
}
