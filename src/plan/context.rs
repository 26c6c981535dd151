//! 会话上下文
//!
//! 一次会话的全部可持久化状态：任务计划与版本号、开放问题、用户答案中提取的事实、
//! 待答问题、阻塞提示、有界动作/观察历史（环形缓冲，溢出时丢弃最旧条目）。

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{OrchestratorPhase, StatusSummary};
use crate::plan::{render_plan, Plan};
use crate::react::{ActionKind, LoopGuard};

/// 默认历史容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// 待答问题的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// 规划前必须回答的问题
    Blocking,
    /// 执行过程中决策预言机主动提问
    Clarification,
    /// 补丁版本冲突
    Conflict,
    /// 循环守卫升级
    LoopGuard,
    /// 子 Agent 需要用户输入
    SubAgent,
}

/// 等待用户回答的问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitingUserInput {
    pub question: String,
    pub kind: QuestionKind,
    /// 发起方（子 Agent 名 / 工具名），可选
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub asked_at: DateTime<Utc>,
}

impl AwaitingUserInput {
    pub fn new(question: impl Into<String>, kind: QuestionKind) -> Self {
        Self {
            question: question.into(),
            kind,
            source: None,
            asked_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// 结构化阻塞提示（如循环守卫切换策略）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// 一条动作/观察记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: usize,
    pub action_type: ActionKind,
    pub action_name: String,
    pub observation: String,
    pub at: DateTime<Utc>,
}

/// 有界历史：超过容量时丢弃最旧条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistory {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl ActionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// 最近 n 条（按时间顺序）
    pub fn recent(&self, n: usize) -> Vec<&HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// 暂停中的子 Agent 委派，用于下次用户回答后恢复同一个子 Agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelegation {
    pub tool: String,
    pub task_id: Option<String>,
    pub state_token: String,
}

/// 会话上下文（快照的主体；所有字段带默认值以兼容旧快照）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    #[serde(default)]
    pub mission: String,
    #[serde(default)]
    pub phase: OrchestratorPhase,
    /// None 表示尚未规划（NO_PLAN）
    #[serde(default)]
    pub plan: Option<Plan>,
    /// 每个成功应用的补丁 +1，从不回退
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default)]
    pub known_answers_text: String,
    #[serde(default)]
    pub awaiting_user_input: Option<AwaitingUserInput>,
    #[serde(default)]
    pub blocker: Option<Blocker>,
    #[serde(default)]
    pub history: ActionHistory,
    #[serde(default)]
    pub plan_view: Option<String>,
    /// 已经问过的阻塞问题（回答后不再重复规划前问答）
    #[serde(default)]
    pub asked_blocking_questions: Vec<String>,
    #[serde(default)]
    pub pending_delegation: Option<PendingDelegation>,
    #[serde(default)]
    pub loop_guard: LoopGuard,
    /// 沙箱子会话：从不持久化
    #[serde(default)]
    pub ephemeral: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            mission: String::new(),
            phase: OrchestratorPhase::NoPlan,
            plan: None,
            version: 0,
            open_questions: Vec::new(),
            facts: BTreeMap::new(),
            known_answers_text: String::new(),
            awaiting_user_input: None,
            blocker: None,
            history: ActionHistory::default(),
            plan_view: None,
            asked_blocking_questions: Vec::new(),
            pending_delegation: None,
            loop_guard: LoopGuard::default(),
            ephemeral: false,
        }
    }

    pub fn with_mission(mut self, mission: impl Into<String>) -> Self {
        self.mission = mission.into();
        self
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history.set_capacity(capacity);
        self
    }

    /// 当前计划（未规划时为空计划视图）
    pub fn plan_or_empty(&self) -> Plan {
        self.plan.clone().unwrap_or_default()
    }

    /// 合并开放问题（去重，保持顺序）
    pub fn merge_open_questions<I: IntoIterator<Item = String>>(&mut self, questions: I) {
        for q in questions {
            let q = q.trim().to_string();
            if !q.is_empty() && !self.open_questions.contains(&q) {
                self.open_questions.push(q);
            }
        }
    }

    /// 记录用户回答：追加到 known_answers_text，从 `key: value` / `key = value` 行提取事实，清除待答问题
    pub fn apply_user_answer(&mut self, answer: &str) {
        let answer = answer.trim();
        if let Some(pending) = &self.awaiting_user_input {
            self.known_answers_text
                .push_str(&format!("Q: {}\nA: {}\n", pending.question, answer));
        } else if !answer.is_empty() {
            self.known_answers_text.push_str(&format!("A: {answer}\n"));
        }
        for (k, v) in extract_facts(answer) {
            self.facts.insert(k, v);
        }
        self.awaiting_user_input = None;
        self.blocker = None;
    }

    /// 重新渲染确定性视图
    pub fn rerender(&mut self) {
        self.plan_view = self.plan.as_ref().map(|p| render_plan(p, self.version));
    }

    pub fn status_summary(&self) -> StatusSummary {
        let (completed, failed, total) = match &self.plan {
            Some(p) => (p.completed_count(), p.failed_count(), p.total()),
            None => (0, 0, 0),
        };
        StatusSummary {
            session_id: self.session_id.clone(),
            phase: self.phase,
            version: self.version,
            completed,
            failed,
            total,
            awaiting_question: self
                .awaiting_user_input
                .as_ref()
                .map(|a| a.question.clone()),
        }
    }
}

/// 从自由文本中提取 `key: value` 或 `key = value` 行；key 统一为小写、空白折叠为下划线
pub fn extract_facts(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            let idx = line.find([':', '=', '：'])?;
            let (key, rest) = line.split_at(idx);
            let sep_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            let value = rest[sep_len..].trim();
            let key = key.trim();
            if key.is_empty() || value.is_empty() || key.split_whitespace().count() > 4 {
                return None;
            }
            let key = key
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("_")
                .to_lowercase();
            Some((key, value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: usize) -> HistoryEntry {
        HistoryEntry {
            step,
            action_type: ActionKind::ToolCall,
            action_name: "echo".into(),
            observation: format!("obs {step}"),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_history_drops_oldest() {
        let mut h = ActionHistory::new(3);
        for i in 0..5 {
            h.push(entry(i));
        }
        let steps: Vec<usize> = h.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![2, 3, 4]);
        assert_eq!(h.recent(2).len(), 2);
        assert_eq!(h.recent(2)[0].step, 3);
    }

    #[test]
    fn test_apply_user_answer_extracts_facts() {
        let mut ctx = SessionContext::new("s1");
        ctx.awaiting_user_input = Some(AwaitingUserInput::new(
            "Which region?",
            QuestionKind::Blocking,
        ));
        ctx.apply_user_answer("Region: eu-west-1\nproject name = demo");
        assert!(ctx.awaiting_user_input.is_none());
        assert_eq!(ctx.facts.get("region").map(String::as_str), Some("eu-west-1"));
        assert_eq!(ctx.facts.get("project_name").map(String::as_str), Some("demo"));
        assert!(ctx.known_answers_text.contains("Which region?"));
    }

    #[test]
    fn test_extract_facts_ignores_prose() {
        let facts = extract_facts("please just use the default settings for everything: ok");
        assert!(facts.is_empty());
    }

    #[test]
    fn test_merge_open_questions_dedups() {
        let mut ctx = SessionContext::new("s1");
        ctx.merge_open_questions(vec!["a?".to_string(), "a?".to_string(), " ".to_string()]);
        ctx.merge_open_questions(vec!["b?".to_string()]);
        assert_eq!(ctx.open_questions, vec!["a?", "b?"]);
    }

    #[test]
    fn test_old_snapshot_fields_default() {
        let ctx: SessionContext = serde_json::from_str(r#"{"session_id":"legacy"}"#).unwrap();
        assert_eq!(ctx.version, 0);
        assert!(ctx.plan.is_none());
        assert_eq!(ctx.phase, OrchestratorPhase::NoPlan);
    }
}
