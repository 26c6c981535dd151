//! 子 Agent 工具的输入 / 输出契约
//!
//! 委派本身就是一次普通的工具调用：父编排器注入共享上下文（副本）与显式分配的任务 id，
//! 子 Agent 返回补丁，或请求用户输入并附带 state_token 以便下次恢复。
//! 字段同时接受 camelCase 别名。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{Patch, SessionContext, Task};

/// 父会话共享给子 Agent 的上下文副本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    #[serde(default, alias = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default, alias = "knownAnswersText")]
    pub known_answers_text: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl SharedContext {
    pub fn from_context(ctx: &SessionContext) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            version: ctx.version,
            facts: ctx.facts.clone(),
            known_answers_text: ctx.known_answers_text.clone(),
            tasks: ctx.plan_or_empty().tasks().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(alias = "maxSteps")]
    pub max_steps: usize,
}

/// 子 Agent 输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgentInput {
    /// 子 Agent 的任务（覆盖后的 mission）
    #[serde(default)]
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, alias = "sharedContext")]
    pub shared_context: SharedContext,
    /// 显式分配给子 Agent 的父计划任务；第一个为发起委派的任务
    #[serde(default, alias = "assignedTaskIds")]
    pub assigned_task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(default, alias = "resumeToken", skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<String>,
}

impl SubAgentInput {
    /// 从决策给出的参数构造：保留 task / inputs / budget，注入共享上下文与分配的任务
    pub fn from_call(
        params: &Value,
        shared_context: SharedContext,
        assigned_task_ids: Vec<String>,
        fallback_task: String,
    ) -> Self {
        let task = params
            .get("task")
            .and_then(Value::as_str)
            .or_else(|| params.get("input").and_then(Value::as_str))
            .map(str::to_string)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(fallback_task);
        Self {
            task,
            inputs: params.get("inputs").cloned().filter(|v| !v.is_null()),
            shared_context,
            assigned_task_ids,
            budget: params
                .get("budget")
                .and_then(|b| serde_json::from_value(b.clone()).ok()),
            resume_token: None,
            answers: None,
        }
    }

    /// 决策参数中额外点名的任务 id（`task_ids`）
    pub fn requested_task_ids(params: &Value) -> Vec<String> {
        params
            .get("task_ids")
            .or_else(|| params.get("taskIds"))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 请求用户输入的信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedUserInput {
    pub question: String,
    pub agent: String,
}

/// 子 Agent 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_user_input: Option<NeedUserInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubAgentOutput {
    pub fn completed(patch: Patch, summary: String) -> Self {
        Self {
            success: true,
            patch: Some(patch),
            need_user_input: None,
            state_token: None,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn needs_input(question: String, agent: String, state_token: String) -> Self {
        Self {
            success: false,
            patch: None,
            need_user_input: Some(NeedUserInput { question, agent }),
            state_token: Some(state_token),
            summary: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            patch: None,
            need_user_input: None,
            state_token: None,
            summary: None,
            error: Some(error.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "error": e.to_string() })
        })
    }
}
