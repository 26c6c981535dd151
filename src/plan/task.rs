//! 任务与计划模型
//!
//! Task / TaskStatus 定义与纯函数查询：按 id 查找、按状态过滤、进度计数、
//! 「下一批可执行」（依赖全部完成的 PENDING 任务）与「被阻塞」（存在失败依赖的 PENDING 任务）。

use std::collections::{BTreeSet, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::normalize_tool_name;

pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// 等待执行
    #[default]
    Pending,
    /// 正在执行（或等待子 Agent 的用户输入）
    InProgress,
    Completed,
    Failed,
    Skipped,
    Blocked,
    /// 标记为待重试
    Retry,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Retry => "RETRY",
        }
    }

    /// 宽松解析：大小写不敏感，`-` / 空格 与 `_` 等价
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_uppercase().replace(['-', ' '], "_");
        match key.as_str() {
            "PENDING" => Some(TaskStatus::Pending),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            "SKIPPED" => Some(TaskStatus::Skipped),
            "BLOCKED" => Some(TaskStatus::Blocked),
            "RETRY" => Some(TaskStatus::Retry),
            _ => None,
        }
    }

    /// 终态：不会再被调度
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划中的单个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 满足该任务的工具 / 动作名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    /// 唯一允许修改该任务的子 Agent；None 表示公共任务
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            tool: None,
            params: None,
            status: TaskStatus::Pending,
            depends_on: BTreeSet::new(),
            owner_agent: None,
            notes: None,
            priority: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_owner(mut self, agent: impl Into<String>) -> Self {
        self.owner_agent = Some(agent.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// 所有权规则：公共任务任何 agent 可改；有 owner 时仅 owner 可改
    pub fn can_be_mutated_by(&self, agent: &str) -> bool {
        match &self.owner_agent {
            None => true,
            Some(owner) => owner == agent,
        }
    }

    /// 追加一行备注
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        match &mut self.notes {
            Some(existing) if !existing.is_empty() => {
                existing.push('\n');
                existing.push_str(note);
            }
            _ => self.notes = Some(note.to_string()),
        }
    }

    fn matches_tool(&self, normalized: &str) -> bool {
        self.tool
            .as_deref()
            .map(|t| normalize_tool_name(t) == normalized)
            .unwrap_or(false)
    }
}

/// 规划阶段由决策预言机给出的任务草稿
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TaskDraft {
    /// 任务 id；缺省时按顺序分配 t1、t2 …
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 用于完成该任务的工具名
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    /// 依赖的任务 id
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// 有序任务列表；任务 id 在同一计划内唯一
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    tasks: Vec<Task>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从任务列表构建；重复 id 只保留第一次出现
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(tasks.len());
        for task in tasks {
            if seen.insert(task.id.clone()) {
                kept.push(task);
            } else {
                tracing::warn!(task_id = %task.id, "duplicate task id dropped from plan");
            }
        }
        Self { tasks: kept }
    }

    /// 从草稿构建：缺失 id 的草稿按位置分配 `t{n}`，并避开已被占用的 id
    pub fn from_drafts(drafts: Vec<TaskDraft>) -> Self {
        let explicit: HashSet<String> = drafts
            .iter()
            .filter_map(|d| d.id.as_ref().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect();
        let mut counter = 0usize;
        let tasks = drafts
            .into_iter()
            .map(|d| {
                let id = match d.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
                    Some(id) => id,
                    None => loop {
                        counter += 1;
                        let candidate = format!("t{counter}");
                        if !explicit.contains(&candidate) {
                            break candidate;
                        }
                    },
                };
                Task {
                    id,
                    title: d.title,
                    description: d.description,
                    tool: d.tool.filter(|t| !t.trim().is_empty()),
                    params: d.params,
                    status: TaskStatus::Pending,
                    depends_on: d.depends_on.into_iter().collect(),
                    owner_agent: None,
                    notes: None,
                    priority: d.priority,
                }
            })
            .collect();
        Self::from_tasks(tasks)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// 追加任务；id 已存在时返回 false 且不修改计划
    pub fn push(&mut self, task: Task) -> bool {
        if self.contains(&task.id) {
            return false;
        }
        self.tasks.push(task);
        true
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status == status).collect()
    }

    pub fn completed_count(&self) -> usize {
        self.by_status(TaskStatus::Completed).len()
    }

    pub fn failed_count(&self) -> usize {
        self.by_status(TaskStatus::Failed).len()
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.find(id).map(|t| t.status)
    }

    /// 依赖全部 COMPLETED 的 PENDING 任务（引用不存在的 id 视为未完成）
    pub fn next_executable(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on
                    .iter()
                    .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
            })
            .collect()
    }

    /// 至少一个依赖 FAILED 的 PENDING 任务
    pub fn blocked(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on
                    .iter()
                    .any(|dep| self.status_of(dep) == Some(TaskStatus::Failed))
            })
            .collect()
    }

    /// 所有任务都进入终态
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// 工具调用对应的目标任务：优先可执行任务，其次任何未完成任务
    pub fn target_for_tool(&self, tool_name: &str) -> Option<&Task> {
        let normalized = normalize_tool_name(tool_name);
        self.next_executable()
            .into_iter()
            .find(|t| t.matches_tool(&normalized))
            .or_else(|| {
                self.tasks
                    .iter()
                    .filter(|t| t.status != TaskStatus::Completed)
                    .find(|t| t.matches_tool(&normalized))
            })
    }

    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> bool {
        match self.find_mut(id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_plan() -> Plan {
        Plan::from_tasks(vec![
            Task::new("t1", "Validate input").with_tool("validate"),
            Task::new("t2", "Create resource")
                .with_tool("create")
                .with_depends_on(["t1"]),
        ])
    }

    #[test]
    fn test_next_executable_follows_dependencies() {
        let mut plan = two_step_plan();
        let next: Vec<&str> = plan.next_executable().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(next, vec!["t1"]);

        plan.set_status("t1", TaskStatus::Completed);
        let next: Vec<&str> = plan.next_executable().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(next, vec!["t2"]);
        assert_eq!(plan.completed_count(), 1);
        assert_eq!(plan.failed_count(), 0);
        assert_eq!(plan.total(), 2);
    }

    #[test]
    fn test_blocked_when_dependency_failed() {
        let mut plan = two_step_plan();
        plan.set_status("t1", TaskStatus::Failed);
        let blocked: Vec<&str> = plan.blocked().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(blocked, vec!["t2"]);
        assert!(plan.next_executable().is_empty());
    }

    #[test]
    fn test_missing_dependency_never_executable() {
        let plan = Plan::from_tasks(vec![Task::new("a", "A").with_depends_on(["ghost"])]);
        assert!(plan.next_executable().is_empty());
        assert!(plan.blocked().is_empty());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let plan = Plan::from_tasks(vec![Task::new("t1", "first"), Task::new("t1", "second")]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.find("t1").unwrap().title, "first");
    }

    #[test]
    fn test_from_drafts_assigns_free_ids() {
        let plan = Plan::from_drafts(vec![
            TaskDraft { title: "a".into(), ..Default::default() },
            TaskDraft { id: Some("t1".into()), title: "b".into(), ..Default::default() },
            TaskDraft { title: "c".into(), ..Default::default() },
        ]);
        let ids: Vec<&str> = plan.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1", "t3"]);
    }

    #[test]
    fn test_target_for_tool_uses_normalized_name() {
        let plan = two_step_plan();
        assert_eq!(plan.target_for_tool("VALIDATE").unwrap().id, "t1");
        // t2 不可执行，但仍是 create 的唯一候选
        assert_eq!(plan.target_for_tool("create").unwrap().id, "t2");
        assert!(plan.target_for_tool("deploy").is_none());
    }

    #[test]
    fn test_status_parse_is_lenient() {
        assert_eq!(TaskStatus::parse("in-progress"), Some(TaskStatus::InProgress));
        assert_eq!(TaskStatus::parse(" completed "), Some(TaskStatus::Completed));
        assert_eq!(TaskStatus::parse("done"), None);
    }

    #[test]
    fn test_ownership_rule() {
        let public = Task::new("t1", "x");
        let owned = Task::new("t2", "y").with_owner("builder");
        assert!(public.can_be_mutated_by("anyone"));
        assert!(owned.can_be_mutated_by("builder"));
        assert!(!owned.can_be_mutated_by("reviewer"));
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_value(TaskStatus::InProgress).unwrap();
        assert_eq!(json, serde_json::json!("IN_PROGRESS"));
    }
}
