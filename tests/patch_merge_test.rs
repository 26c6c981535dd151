//! 补丁合并集成测试：同一基线版本上的并发补丁、所有权、冲突后的用户询问

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use planloop::core::AgentError;
use planloop::oracle::ScriptedOracle;
use planloop::plan::{apply_patch, KnownOp, Patch, Plan, QuestionKind, SessionContext, Task, TaskStatus};
use planloop::tools::{FnTool, Tool, ToolExecutor, ToolKind, ToolRegistry};
use planloop::{Orchestrator, OrchestratorConfig, RunOutcome};
use serde_json::{json, Map, Value};

fn shared_context() -> SessionContext {
    SessionContext::new("s").with_plan(Plan::from_tasks(vec![
        Task::new("t1", "Build"),
        Task::new("t2", "Test").with_owner("tester"),
    ]))
}

fn status_fields(status: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("status".into(), json!(status));
    fields
}

#[test]
fn test_second_patch_on_same_base_is_rejected_whole() {
    let mut ctx = shared_context();
    let builder = Patch::new(0, "builder").with_op(KnownOp::Update {
        task_id: "t1".into(),
        fields: status_fields("COMPLETED"),
    });
    let tester = Patch::new(0, "tester")
        .with_op(KnownOp::Annotate {
            task_id: "t2".into(),
            note: "flaky".into(),
        })
        .with_op(KnownOp::Update {
            task_id: "t2".into(),
            fields: status_fields("FAILED"),
        });

    let first = apply_patch(&mut ctx, &builder).unwrap();
    assert_eq!(first.new_version, 1);

    let before = ctx.plan.clone();
    let err = apply_patch(&mut ctx, &tester).unwrap_err();
    assert_eq!(err, AgentError::VersionConflict { base: 0, current: 1 });
    assert_eq!(ctx.plan, before);
    assert_eq!(ctx.version, 1);

    // 基于最新版本重新提交即可生效
    let retried = Patch { base_version: 1, ..tester };
    let outcome = apply_patch(&mut ctx, &retried).unwrap();
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.new_version, 2);
    let t2 = ctx.plan.as_ref().unwrap().find("t2").unwrap();
    assert_eq!(t2.status, TaskStatus::Failed);
    assert_eq!(t2.notes.as_deref(), Some("flaky"));
}

#[test]
fn test_mixed_patch_applies_allowed_ops_and_bumps_once() {
    let mut ctx = shared_context();
    let patch = Patch::new(0, "builder")
        .with_op(KnownOp::Update {
            task_id: "t2".into(),
            fields: status_fields("SKIPPED"),
        })
        .with_op(KnownOp::Annotate {
            task_id: "t1".into(),
            note: "compiled".into(),
        })
        .with_op(KnownOp::AddSubtask {
            parent_id: "t1".into(),
            task: Task::new("t1a", "Compile docs").into(),
        })
        .with_op(KnownOp::LinkDep {
            task_id: "t1".into(),
            depends_on: vec!["t0".into()],
        });

    let outcome = apply_patch(&mut ctx, &patch).unwrap();
    assert_eq!(outcome.applied, 3);
    assert_eq!(outcome.denied, vec!["update:t2:not_owner"]);
    assert_eq!(ctx.version, 1);

    let plan = ctx.plan.as_ref().unwrap();
    assert_eq!(plan.find("t2").unwrap().status, TaskStatus::Pending);
    let sub = plan.find("t1a").unwrap();
    assert!(sub.depends_on.contains("t1"));
    assert_eq!(sub.owner_agent.as_deref(), Some("builder"));
    assert!(plan.find("t1").unwrap().depends_on.contains("t0"));
}

#[test]
fn test_add_on_finished_task_does_not_reschedule_it() {
    let mut ctx = SessionContext::new("s").with_plan(Plan::from_tasks(vec![
        Task::new("t1", "Validate").with_status(TaskStatus::Completed),
        Task::new("t2", "Create").with_depends_on(["t1"]),
    ]));
    let patch: Patch = serde_json::from_value(json!({
        "base_version": 0,
        "agent_name": "planner",
        "ops": [{"op": "add", "task": {"id": "t1", "title": "Validate v2"}}],
    }))
    .unwrap();

    let outcome = apply_patch(&mut ctx, &patch).unwrap();
    assert_eq!(outcome.applied, 1);
    let plan = ctx.plan.as_ref().unwrap();
    assert_eq!(plan.find("t1").unwrap().status, TaskStatus::Completed);
    let next: Vec<&str> = plan.next_executable().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(next, vec!["t2"]);
}

/// 总是基于过期版本提交补丁的子 Agent
struct StaleAgent;

#[async_trait]
impl Tool for StaleAgent {
    fn name(&self) -> &str {
        "stale_agent"
    }

    fn description(&self) -> &str {
        "returns a patch against an old plan version"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::SubAgent
    }

    async fn execute(&self, _params: Value) -> Result<Value, String> {
        let patch = Patch::new(7, "stale_agent").with_op(KnownOp::Annotate {
            task_id: "t1".into(),
            note: "late".into(),
        });
        Ok(json!({"success": true, "patch": patch, "summary": "done"}))
    }
}

#[tokio::test]
async fn test_conflicting_delegation_asks_user() {
    let mut reg = ToolRegistry::new();
    reg.register(StaleAgent);
    reg.register(FnTool::new("noop", "does nothing", |_| Ok(json!({}))));
    let oracle = ScriptedOracle::new()
        .with_structured(json!({"blocking": []}))
        .with_structured(json!({"tasks": [{"id": "t1", "title": "Delegate", "tool": "stale_agent"}]}))
        .with_selection("stale_agent", json!({}));
    let config = OrchestratorConfig {
        backoff_base: Duration::from_millis(1),
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(Arc::new(oracle), ToolExecutor::new(reg, 5), config);

    let report = orchestrator.run("s-conflict", "delegate the work").await.unwrap();
    match &report.outcome {
        RunOutcome::AwaitingUser(q) => {
            assert_eq!(q.kind, QuestionKind::Conflict);
            assert!(q.question.contains('7'));
        }
        other => panic!("expected conflict question, got {other:?}"),
    }
    let ctx = &report.context;
    assert_eq!(ctx.version, 0);
    let t1 = ctx.plan.as_ref().unwrap().find("t1").unwrap();
    assert_eq!(t1.status, TaskStatus::Pending);
    assert!(!t1.notes.as_deref().unwrap_or_default().contains("late"));
}
