//! 补丁合并引擎（乐观并发）
//!
//! 子 Agent 以补丁 `{base_version, agent_name, ops}` 提议修改共享计划：
//! - base_version 与当前版本不同：整体拒绝（VersionConflict），计划不做任何修改；
//! - 否则逐条评估 op，按所有权规则应用或记入 denied（`<op>:<id>:<reason>`），互不影响；
//! - 只要有一条 op 生效，version 恰好 +1（与 op 数量无关），并重新渲染视图。

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::plan::{SessionContext, Task, TaskId, TaskStatus};

/// update op 允许修改的字段
pub const UPDATABLE_FIELDS: [&str; 7] = [
    "title",
    "description",
    "tool",
    "params",
    "status",
    "notes",
    "priority",
];

/// 子 Agent 提交的补丁
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub base_version: u64,
    pub agent_name: String,
    #[serde(default)]
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new(base_version: u64, agent_name: impl Into<String>) -> Self {
        Self {
            base_version,
            agent_name: agent_name.into(),
            ops: Vec::new(),
        }
    }

    pub fn with_op(mut self, op: KnownOp) -> Self {
        self.ops.push(PatchOp::Known(op));
        self
    }
}

/// add / add_subtask 携带的任务；合并到已有任务时，未给出的字段（包括 status）保持原值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl TaskSpec {
    fn append_note(&mut self, note: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        });
    }

    /// 作为新任务插入；未给出 status 时为 PENDING
    fn into_task(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            tool: self.tool,
            params: self.params,
            status: self.status.unwrap_or_default(),
            depends_on: self.depends_on,
            owner_agent: self.owner_agent,
            notes: self.notes,
            priority: self.priority,
        }
    }
}

impl From<Task> for TaskSpec {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            tool: task.tool,
            params: task.params,
            status: Some(task.status),
            depends_on: task.depends_on,
            owner_agent: task.owner_agent,
            notes: task.notes,
            priority: task.priority,
        }
    }
}

/// 补丁中的单条操作：可识别的 op，或原样保留的未知 / 畸形 op（记入 denied）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchOp {
    Known(KnownOp),
    Unsupported(Value),
}

/// 支持的操作集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KnownOp {
    Update {
        task_id: String,
        fields: Map<String, Value>,
    },
    Annotate {
        task_id: String,
        note: String,
    },
    Add {
        task: TaskSpec,
    },
    AddSubtask {
        parent_id: String,
        task: TaskSpec,
    },
    LinkDep {
        task_id: String,
        #[serde(deserialize_with = "one_or_many")]
        depends_on: Vec<String>,
    },
    UnlinkDep {
        task_id: String,
        #[serde(deserialize_with = "one_or_many")]
        depends_on: Vec<String>,
    },
}

impl KnownOp {
    pub fn name(&self) -> &'static str {
        match self {
            KnownOp::Update { .. } => "update",
            KnownOp::Annotate { .. } => "annotate",
            KnownOp::Add { .. } => "add",
            KnownOp::AddSubtask { .. } => "add_subtask",
            KnownOp::LinkDep { .. } => "link_dep",
            KnownOp::UnlinkDep { .. } => "unlink_dep",
        }
    }

    fn target_id(&self) -> &str {
        match self {
            KnownOp::Update { task_id, .. }
            | KnownOp::Annotate { task_id, .. }
            | KnownOp::LinkDep { task_id, .. }
            | KnownOp::UnlinkDep { task_id, .. } => task_id,
            KnownOp::Add { task } => &task.id,
            KnownOp::AddSubtask { parent_id, .. } => parent_id,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// 合并结果（冲突以外的情况总是 success=true）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub success: bool,
    pub applied: usize,
    pub denied: Vec<String>,
    pub new_version: u64,
}

/// 单条 op 被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DenyReason {
    NotFound,
    NotOwner,
    Unsupported,
    MissingId,
    InvalidField,
    NoFields,
}

impl DenyReason {
    fn code(&self) -> &'static str {
        match self {
            DenyReason::NotFound => "not_found",
            DenyReason::NotOwner => "not_owner",
            DenyReason::Unsupported => "unsupported",
            DenyReason::MissingId => "missing_id",
            DenyReason::InvalidField => "invalid_field",
            DenyReason::NoFields => "no_fields",
        }
    }
}

/// 将补丁应用到会话计划上
pub fn apply_patch(ctx: &mut SessionContext, patch: &Patch) -> Result<PatchOutcome, AgentError> {
    apply_patch_with_render(ctx, patch, true)
}

/// 同 apply_patch；render=false 时不刷新视图（沙箱子会话）
pub fn apply_patch_with_render(
    ctx: &mut SessionContext,
    patch: &Patch,
    render: bool,
) -> Result<PatchOutcome, AgentError> {
    if patch.base_version != ctx.version {
        tracing::warn!(
            agent = %patch.agent_name,
            base = patch.base_version,
            current = ctx.version,
            "patch rejected: version conflict"
        );
        return Err(AgentError::VersionConflict {
            base: patch.base_version,
            current: ctx.version,
        });
    }

    let plan = ctx.plan.get_or_insert_with(Default::default);
    let mut applied = 0usize;
    let mut denied = Vec::new();

    for op in &patch.ops {
        match op {
            PatchOp::Known(known) => match apply_op(plan, known, &patch.agent_name) {
                Ok(()) => applied += 1,
                Err(reason) => denied.push(format!(
                    "{}:{}:{}",
                    known.name(),
                    display_id(known.target_id()),
                    reason.code()
                )),
            },
            PatchOp::Unsupported(raw) => {
                let name = raw.get("op").and_then(Value::as_str).unwrap_or("unknown");
                let id = raw
                    .get("task_id")
                    .or_else(|| raw.get("parent_id"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                denied.push(format!(
                    "{}:{}:{}",
                    name,
                    display_id(id),
                    DenyReason::Unsupported.code()
                ));
            }
        }
    }

    if applied > 0 {
        ctx.version += 1;
        if render {
            ctx.rerender();
        }
    }

    tracing::info!(
        agent = %patch.agent_name,
        applied,
        denied = denied.len(),
        version = ctx.version,
        "patch merged"
    );

    Ok(PatchOutcome {
        success: true,
        applied,
        denied,
        new_version: ctx.version,
    })
}

fn display_id(id: &str) -> &str {
    if id.is_empty() {
        "-"
    } else {
        id
    }
}

fn apply_op(plan: &mut crate::plan::Plan, op: &KnownOp, agent: &str) -> Result<(), DenyReason> {
    match op {
        KnownOp::Update { task_id, fields } => {
            let task = owned_task(plan, task_id, agent)?;
            let staged = stage_update(task, fields)?;
            *task = staged;
            Ok(())
        }
        KnownOp::Annotate { task_id, note } => {
            let task = owned_task(plan, task_id, agent)?;
            task.append_note(note);
            Ok(())
        }
        KnownOp::Add { task } => upsert_task(plan, task.clone(), agent),
        KnownOp::AddSubtask { parent_id, task } => {
            if !plan.contains(parent_id) {
                return Err(DenyReason::NotFound);
            }
            let mut task = task.clone();
            task.depends_on.insert(parent_id.clone());
            task.append_note(&format!("subtask_of:{parent_id}"));
            upsert_task(plan, task, agent)
        }
        KnownOp::LinkDep {
            task_id,
            depends_on,
        } => {
            let task = owned_task(plan, task_id, agent)?;
            task.depends_on.extend(depends_on.iter().cloned());
            Ok(())
        }
        KnownOp::UnlinkDep {
            task_id,
            depends_on,
        } => {
            let task = owned_task(plan, task_id, agent)?;
            for dep in depends_on {
                task.depends_on.remove(dep);
            }
            Ok(())
        }
    }
}

fn owned_task<'a>(
    plan: &'a mut crate::plan::Plan,
    task_id: &str,
    agent: &str,
) -> Result<&'a mut Task, DenyReason> {
    let task = plan.find_mut(task_id).ok_or(DenyReason::NotFound)?;
    if !task.can_be_mutated_by(agent) {
        return Err(DenyReason::NotOwner);
    }
    Ok(task)
}

/// 在副本上应用允许的字段；任一字段非法则整条 op 拒绝（不产生部分修改）
fn stage_update(task: &Task, fields: &Map<String, Value>) -> Result<Task, DenyReason> {
    let mut staged = task.clone();
    let mut touched = 0usize;
    for (key, value) in fields {
        if !UPDATABLE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        touched += 1;
        match key.as_str() {
            "title" => staged.title = value.as_str().ok_or(DenyReason::InvalidField)?.to_string(),
            "description" => staged.description = optional_string(value)?,
            "tool" => staged.tool = optional_string(value)?,
            "params" => staged.params = (!value.is_null()).then(|| value.clone()),
            "status" => {
                staged.status = value
                    .as_str()
                    .and_then(TaskStatus::parse)
                    .ok_or(DenyReason::InvalidField)?
            }
            "notes" => staged.notes = optional_string(value)?,
            "priority" => staged.priority = optional_i64(value)?,
            _ => {}
        }
    }
    if touched == 0 {
        return Err(DenyReason::NoFields);
    }
    Ok(staged)
}

fn optional_string(value: &Value) -> Result<Option<String>, DenyReason> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(DenyReason::InvalidField),
    }
}

fn optional_i64(value: &Value) -> Result<Option<i64>, DenyReason> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or(DenyReason::InvalidField),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DenyReason::InvalidField),
        _ => Err(DenyReason::InvalidField),
    }
}

/// add 语义：不存在则插入（未设 owner 时归属提交者），存在则在所有权允许时合并字段
fn upsert_task(plan: &mut crate::plan::Plan, spec: TaskSpec, agent: &str) -> Result<(), DenyReason> {
    if spec.id.trim().is_empty() {
        return Err(DenyReason::MissingId);
    }
    match plan.find_mut(&spec.id) {
        Some(existing) => {
            if !existing.can_be_mutated_by(agent) {
                return Err(DenyReason::NotOwner);
            }
            merge_into(existing, spec);
            Ok(())
        }
        None => {
            let mut task = spec.into_task();
            if task.owner_agent.is_none() {
                task.owner_agent = Some(agent.to_string());
            }
            plan.push(task);
            Ok(())
        }
    }
}

fn merge_into(existing: &mut Task, incoming: TaskSpec) {
    if !incoming.title.trim().is_empty() {
        existing.title = incoming.title;
    }
    if incoming.description.is_some() {
        existing.description = incoming.description;
    }
    if incoming.tool.is_some() {
        existing.tool = incoming.tool;
    }
    if incoming.params.is_some() {
        existing.params = incoming.params;
    }
    if incoming.priority.is_some() {
        existing.priority = incoming.priority;
    }
    if let Some(notes) = incoming.notes {
        existing.append_note(&notes);
    }
    if let Some(status) = incoming.status {
        existing.status = status;
    }
    existing.depends_on.extend(incoming.depends_on);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Plan;
    use serde_json::json;

    fn ctx_with_plan() -> SessionContext {
        let mut ctx = SessionContext::new("s1").with_plan(Plan::from_tasks(vec![
            Task::new("t1", "Validate").with_tool("validate"),
            Task::new("t2", "Create")
                .with_tool("create")
                .with_depends_on(["t1"])
                .with_owner("builder"),
        ]));
        ctx.version = 1;
        ctx
    }

    fn patch(base: u64, agent: &str, ops: Value) -> Patch {
        serde_json::from_value(json!({
            "base_version": base,
            "agent_name": agent,
            "ops": ops,
        }))
        .unwrap()
    }

    #[test]
    fn test_update_bumps_version_once() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "worker",
            json!([{"op": "update", "task_id": "t1", "fields": {"status": "COMPLETED"}}]),
        );
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert_eq!(out.applied, 1);
        assert_eq!(out.new_version, 2);
        assert_eq!(ctx.plan.as_ref().unwrap().find("t1").unwrap().status, TaskStatus::Completed);

        // 同一补丁再次提交：base_version 已过期，整体拒绝
        let before = ctx.plan.clone();
        let err = apply_patch(&mut ctx, &p).unwrap_err();
        assert_eq!(err, AgentError::VersionConflict { base: 1, current: 2 });
        assert_eq!(ctx.plan, before);
        assert_eq!(ctx.version, 2);
    }

    #[test]
    fn test_many_ops_single_bump() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "worker",
            json!([
                {"op": "annotate", "task_id": "t1", "note": "checked"},
                {"op": "update", "task_id": "t1", "fields": {"priority": 2}},
                {"op": "add", "task": {"id": "t3", "title": "Docs"}},
            ]),
        );
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert_eq!(out.applied, 3);
        assert_eq!(ctx.version, 2);
        assert_eq!(
            ctx.plan.as_ref().unwrap().find("t3").unwrap().owner_agent.as_deref(),
            Some("worker")
        );
    }

    #[test]
    fn test_unknown_task_denied_sibling_applies() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "worker",
            json!([
                {"op": "update", "task_id": "t1", "fields": {"status": "COMPLETED"}},
                {"op": "update", "task_id": "ghost", "fields": {"status": "COMPLETED"}},
            ]),
        );
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert!(out.success);
        assert_eq!(out.applied, 1);
        assert_eq!(out.denied, vec!["update:ghost:not_found".to_string()]);
    }

    #[test]
    fn test_foreign_owner_denied() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "reviewer",
            json!([
                {"op": "update", "task_id": "t2", "fields": {"status": "FAILED"}},
                {"op": "annotate", "task_id": "t2", "note": "nope"},
                {"op": "link_dep", "task_id": "t2", "depends_on": "t9"},
                {"op": "annotate", "task_id": "t1", "note": "public is fine"},
            ]),
        );
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert_eq!(out.applied, 1);
        assert_eq!(
            out.denied,
            vec![
                "update:t2:not_owner".to_string(),
                "annotate:t2:not_owner".to_string(),
                "link_dep:t2:not_owner".to_string(),
            ]
        );
        let t2 = ctx.plan.as_ref().unwrap().find("t2").unwrap().clone();
        assert_eq!(t2.status, TaskStatus::Pending);
        assert!(t2.notes.is_none());
    }

    #[test]
    fn test_zero_applicable_ops_is_not_error() {
        let mut ctx = ctx_with_plan();
        let p = patch(1, "worker", json!([{"op": "explode", "task_id": "t1"}]));
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert!(out.success);
        assert_eq!(out.applied, 0);
        assert_eq!(out.denied, vec!["explode:t1:unsupported".to_string()]);
        assert_eq!(out.new_version, 1);
    }

    #[test]
    fn test_add_subtask_links_parent() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "worker",
            json!([{"op": "add_subtask", "parent_id": "t1", "task": {"id": "t1a", "title": "Lint"}}]),
        );
        apply_patch(&mut ctx, &p).unwrap();
        let sub = ctx.plan.as_ref().unwrap().find("t1a").unwrap().clone();
        assert!(sub.depends_on.contains("t1"));
        assert_eq!(sub.notes.as_deref(), Some("subtask_of:t1"));
    }

    #[test]
    fn test_add_existing_merges_instead_of_duplicating() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "worker",
            json!([{"op": "add", "task": {"id": "t1", "title": "Validate v2", "depends_on": ["t0"]}}]),
        );
        apply_patch(&mut ctx, &p).unwrap();
        let plan = ctx.plan.as_ref().unwrap();
        assert_eq!(plan.total(), 2);
        assert_eq!(plan.find("t1").unwrap().title, "Validate v2");
        assert!(plan.find("t1").unwrap().depends_on.contains("t0"));
    }

    #[test]
    fn test_add_merge_keeps_status_unless_given() {
        let mut ctx = ctx_with_plan();
        ctx.plan.as_mut().unwrap().find_mut("t1").unwrap().status = TaskStatus::Completed;

        let p = patch(1, "worker", json!([{"op": "add", "task": {"id": "t1", "title": "Validate v2"}}]));
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert_eq!(out.applied, 1);
        let plan = ctx.plan.as_ref().unwrap();
        assert_eq!(plan.find("t1").unwrap().title, "Validate v2");
        assert_eq!(plan.find("t1").unwrap().status, TaskStatus::Completed);
        let next: Vec<&str> = plan.next_executable().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(next, vec!["t2"]);

        let p = patch(2, "worker", json!([{"op": "add", "task": {"id": "t1", "status": "FAILED"}}]));
        apply_patch(&mut ctx, &p).unwrap();
        let t1 = ctx.plan.as_ref().unwrap().find("t1").unwrap().clone();
        assert_eq!(t1.status, TaskStatus::Failed);
        assert_eq!(t1.title, "Validate v2");
    }

    #[test]
    fn test_invalid_status_denies_whole_op() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "worker",
            json!([{"op": "update", "task_id": "t1", "fields": {"title": "x", "status": "DONE"}}]),
        );
        let out = apply_patch(&mut ctx, &p).unwrap();
        assert_eq!(out.denied, vec!["update:t1:invalid_field".to_string()]);
        assert_eq!(ctx.plan.as_ref().unwrap().find("t1").unwrap().title, "Validate");
    }

    #[test]
    fn test_unlink_dep() {
        let mut ctx = ctx_with_plan();
        let p = patch(
            1,
            "builder",
            json!([{"op": "unlink_dep", "task_id": "t2", "depends_on": ["t1"]}]),
        );
        apply_patch(&mut ctx, &p).unwrap();
        assert!(ctx.plan.as_ref().unwrap().find("t2").unwrap().depends_on.is_empty());
    }

    #[test]
    fn test_applied_patch_rerenders_view() {
        let mut ctx = ctx_with_plan();
        let p = patch(1, "worker", json!([{"op": "annotate", "task_id": "t1", "note": "ok"}]));
        apply_patch(&mut ctx, &p).unwrap();
        assert!(ctx.plan_view.as_deref().unwrap().starts_with("# Plan (v2)"));
    }
}
