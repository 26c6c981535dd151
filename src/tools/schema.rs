//! 决策 JSON Schema 生成（schemars 自动生成）
//!
//! 结构化决策兜底路径使用的格式；同一 schema 也拼入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 决策格式：`{"action": "TOOL_CALL", "name": "validate", "params": {...}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DecisionFormat {
    /// TOOL_CALL、ASK_USER、UPDATE_PLAN、ERROR_RECOVERY、COMPLETE 之一
    pub action: String,
    /// TOOL_CALL 时的工具名
    #[serde(default)]
    pub name: Option<String>,
    /// TOOL_CALL 时的工具参数
    #[serde(default)]
    pub params: Option<Value>,
    /// ASK_USER 时向用户提出的问题
    #[serde(default)]
    pub question: Option<String>,
    /// UPDATE_PLAN 时的补丁操作（update / annotate / add / add_subtask / link_dep / unlink_dep）
    #[serde(default)]
    pub ops: Vec<Value>,
    /// COMPLETE 时的总结
    #[serde(default)]
    pub summary: Option<String>,
    /// ERROR_RECOVERY 时的原因
    #[serde(default)]
    pub reason: Option<String>,
}

/// 返回决策格式的 JSON Schema 字符串，可拼入 system prompt
pub fn decision_schema_json() -> String {
    let schema = schema_for!(DecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
