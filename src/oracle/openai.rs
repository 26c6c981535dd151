//! OpenAI 兼容决策预言机
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! select_tool 以 prompt 注入工具描述并要求返回 `{"name": ..., "arguments": {...}}`。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::oracle::{extract_json, DecisionOracle, Message, Role, ToolSelection};
use crate::tools::ToolDescriptor;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

/// OpenAI 兼容预言机：持有 Client 与 model 名
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
    pub usage: TokenUsage,
}

impl OpenAiOracle {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::default(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        let oracle_err = |e: async_openai::error::OpenAIError| AgentError::OracleError(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(oracle_err)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(oracle_err)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(oracle_err)?,
                    ),
                })
            })
            .collect()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, AgentError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| AgentError::OracleError(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::OracleError(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

fn with_system(system_prompt: &str, mut rest: Vec<Message>) -> Vec<Message> {
    if !system_prompt.trim().is_empty() {
        rest.insert(0, Message::system(system_prompt));
    }
    rest
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn generate_text(&self, prompt: &str, system_prompt: &str) -> Result<String, AgentError> {
        self.complete(&with_system(system_prompt, vec![Message::user(prompt)]))
            .await
    }

    async fn select_tool(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, AgentError> {
        let catalog = serde_json::to_string_pretty(tools)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        let mut conversation = with_system(system_prompt, messages.to_vec());
        conversation.push(Message::user(format!(
            "Available actions:\n{catalog}\n\nChoose exactly one action. Reply with JSON only: \
             {{\"name\": \"<action name>\", \"arguments\": {{...}}}}. \
             Reply {{\"name\": null}} if no action applies."
        )));

        let text = self.complete(&conversation).await?;
        let value = extract_json(&text)?;
        let Some(name) = value.get("name").and_then(Value::as_str).map(str::trim) else {
            return Ok(None);
        };
        if name.is_empty() {
            return Ok(None);
        }
        let arguments = value.get("arguments").cloned().unwrap_or(Value::Null);
        Ok(Some(ToolSelection::new(name, arguments)))
    }
}
