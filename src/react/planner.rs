//! Planner：与决策预言机的全部交互
//!
//! 规划前问答（区分阻塞 / 可选问题）、计划引导（任务草稿 + 开放问题）、每步的思考文本与下一步决策。
//! 每次预言机调用都受 oracle_timeout 约束；决策优先走 select_tool，失败后退回 schema 引导的 JSON 决策，
//! 再失败则给出安全默认动作 ERROR_RECOVERY。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::oracle::{generate_typed, DecisionOracle, Message};
use crate::plan::{render_plan, SessionContext, TaskDraft};
use crate::react::{meta_descriptors, Action};
use crate::tools::{decision_schema_json, DecisionFormat, ToolRegistry};

/// 思考失败时的占位文本
pub const THOUGHT_PLACEHOLDER: &str = "（无法生成思考，继续按计划执行）";
/// 注入 prompt 的最近历史条数
const PROMPT_HISTORY: usize = 8;

/// 规划前问答：阻塞问题必须先回答才能开始第一步
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct QuestionTriage {
    #[serde(default)]
    pub blocking: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

/// 计划引导结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlanDraft {
    #[serde(default)]
    pub tasks: Vec<TaskDraft>,
    /// 不阻塞执行的开放问题
    #[serde(default)]
    pub open_questions: Vec<String>,
}

/// Planner：持有预言机、system prompt 与调用超时
pub struct Planner {
    oracle: Arc<dyn DecisionOracle>,
    system_prompt: String,
    timeout: Duration,
}

impl Planner {
    pub fn new(oracle: Arc<dyn DecisionOracle>, system_prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            oracle,
            system_prompt: system_prompt.into(),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| AgentError::OracleTimeout)?
    }

    /// 区分阻塞问题与可选问题
    pub async fn triage(&self, ctx: &SessionContext) -> Result<QuestionTriage, AgentError> {
        let prompt = format!(
            "{}\n\nBefore planning, list the questions you would need answered. \
             Put a question under `blocking` only if not even the first step can be taken without it; \
             everything else goes under `optional`. Return empty lists if nothing is missing.",
            context_prompt(ctx)
        );
        self.bounded(generate_typed::<QuestionTriage>(
            self.oracle.as_ref(),
            &prompt,
            &self.system_prompt,
        ))
        .await
    }

    /// 生成任务草稿
    pub async fn bootstrap(&self, ctx: &SessionContext, registry: &ToolRegistry) -> Result<PlanDraft, AgentError> {
        let prompt = format!(
            "{}\n\nAvailable tools:\n{}\n\nBreak the mission into tasks. Give each task a short id, a title, \
             the tool that satisfies it, and the ids it depends on. List any non-blocking open questions.",
            context_prompt(ctx),
            registry.to_schema_json()
        );
        self.bounded(generate_typed::<PlanDraft>(
            self.oracle.as_ref(),
            &prompt,
            &self.system_prompt,
        ))
        .await
    }

    /// 思考文本（尽力而为：失败返回占位文本，不中断循环）
    pub async fn thought(&self, ctx: &SessionContext) -> String {
        let prompt = format!(
            "{}\n\nThink briefly about what to do next and why.",
            context_prompt(ctx)
        );
        match self
            .bounded(self.oracle.generate_text(&prompt, &self.system_prompt))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => THOUGHT_PLACEHOLDER.to_string(),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "thought generation failed");
                THOUGHT_PLACEHOLDER.to_string()
            }
        }
    }

    /// 决定下一步动作（从不返回错误）
    pub async fn decide(&self, ctx: &SessionContext, thought: &str, registry: &ToolRegistry) -> Action {
        let mut tools = registry.descriptors();
        tools.extend(meta_descriptors());
        let messages = vec![
            Message::user(context_prompt(ctx)),
            Message::assistant(thought.to_string()),
            Message::user("Choose the next action.".to_string()),
        ];

        match self
            .bounded(self.oracle.select_tool(&self.system_prompt, &messages, &tools))
            .await
        {
            Ok(Some(selection)) => return Action::from_selection(selection, registry),
            Ok(None) => tracing::debug!(session_id = %ctx.session_id, "no tool selected, using structured decision"),
            Err(e) => tracing::warn!(session_id = %ctx.session_id, error = %e, "tool selection failed, using structured decision"),
        }

        let prompt = format!(
            "{}\n\nThought: {thought}\n\nAvailable tools:\n{}\n\nDecide the next action. JSON format:\n{}",
            context_prompt(ctx),
            registry.to_schema_json(),
            decision_schema_json()
        );
        match self
            .bounded(generate_typed::<DecisionFormat>(
                self.oracle.as_ref(),
                &prompt,
                &self.system_prompt,
            ))
            .await
        {
            Ok(decision) => Action::from_decision(decision, registry),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "structured decision failed");
                Action::ErrorRecovery {
                    reason: format!("decision unavailable: {e}"),
                }
            }
        }
    }
}

/// 拼装注入 prompt 的会话上下文
pub fn context_prompt(ctx: &SessionContext) -> String {
    let mut out = format!("Mission: {}\n", ctx.mission);
    match (&ctx.plan_view, &ctx.plan) {
        (Some(view), _) => out.push_str(&format!("\n{view}")),
        (None, Some(plan)) => out.push_str(&format!("\n{}", render_plan(plan, ctx.version))),
        (None, None) => out.push_str("\nNo plan yet.\n"),
    }
    if !ctx.facts.is_empty() {
        out.push_str("\nKnown facts:\n");
        for (k, v) in &ctx.facts {
            out.push_str(&format!("- {k}: {v}\n"));
        }
    }
    if !ctx.known_answers_text.trim().is_empty() {
        out.push_str(&format!("\nUser answers:\n{}", ctx.known_answers_text));
    }
    if !ctx.open_questions.is_empty() {
        out.push_str("\nOpen questions:\n");
        for q in &ctx.open_questions {
            out.push_str(&format!("- {q}\n"));
        }
    }
    if let Some(blocker) = &ctx.blocker {
        out.push_str(&format!("\nBlocker ({}): {}\n", blocker.kind, blocker.message));
    }
    let recent = ctx.history.recent(PROMPT_HISTORY);
    if !recent.is_empty() {
        out.push_str("\nRecent actions:\n");
        for entry in recent {
            let preview: String = entry.observation.chars().take(300).collect();
            out.push_str(&format!(
                "- step {} {} {} -> {}\n",
                entry.step, entry.action_type, entry.action_name, preview
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use crate::react::ActionKind;
    use crate::tools::FnTool;
    use serde_json::json;

    fn planner(oracle: ScriptedOracle) -> Planner {
        Planner::new(Arc::new(oracle), "", Duration::from_secs(5))
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(FnTool::new("validate", "validates", |_| Ok(json!({}))));
        reg
    }

    #[tokio::test]
    async fn test_triage_parses_lists() {
        let p = planner(ScriptedOracle::new().with_structured(json!({"blocking": ["Which region?"]})));
        let triage = p.triage(&SessionContext::new("s")).await.unwrap();
        assert_eq!(triage.blocking, vec!["Which region?"]);
        assert!(triage.optional.is_empty());
    }

    #[tokio::test]
    async fn test_decide_falls_back_to_structured() {
        let oracle = ScriptedOracle::new()
            .with_selection_error("function calling unavailable")
            .with_structured(json!({"action": "TOOL_CALL", "name": "validate", "params": {}}));
        let action = planner(oracle).decide(&SessionContext::new("s"), "t", &registry()).await;
        assert_eq!(action.kind(), ActionKind::ToolCall);
    }

    #[tokio::test]
    async fn test_decide_defaults_to_error_recovery() {
        // 选择为空、结构化脚本耗尽、文本兜底不是 JSON
        let oracle = ScriptedOracle::new().with_text("I am not sure");
        let action = planner(oracle).decide(&SessionContext::new("s"), "t", &registry()).await;
        assert_eq!(action.kind(), ActionKind::ErrorRecovery);
    }

    #[tokio::test]
    async fn test_thought_placeholder_on_empty() {
        let p = planner(ScriptedOracle::new().with_text("   "));
        assert_eq!(p.thought(&SessionContext::new("s")).await, THOUGHT_PLACEHOLDER);
    }

    #[test]
    fn test_context_prompt_includes_facts() {
        let mut ctx = SessionContext::new("s").with_mission("ship it");
        ctx.facts.insert("region".into(), "eu".into());
        let prompt = context_prompt(&ctx);
        assert!(prompt.contains("Mission: ship it"));
        assert!(prompt.contains("- region: eu"));
        assert!(prompt.contains("No plan yet."));
    }
}
