//! 子 Agent 工具
//!
//! 子 Agent 是一个带独立 ReAct 循环的工具：在沙箱会话（ephemeral，从不持久化）中运行，
//! 只能看到白名单内的工具，只能通过补丁修改父计划。暂停时以 state_token 保存子会话，
//! 用户回答后由父编排器携带 resume_token 恢复同一个子会话。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::delegate::{SubAgentInput, SubAgentOutput};
use crate::oracle::DecisionOracle;
use crate::plan::{KnownOp, Patch, Plan, SessionContext, Task, UPDATABLE_FIELDS};
use crate::react::{Orchestrator, OrchestratorConfig, RunOutcome};
use crate::tools::{InputSchema, Tool, ToolExecutor, ToolKind, ToolRegistry};

pub const DEFAULT_SUB_AGENT_STEPS: usize = 8;
pub const DEFAULT_SUB_AGENT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_PAUSED_TTL: Duration = Duration::from_secs(3600);

/// 暂停中的子会话
struct PausedChild {
    ctx: SessionContext,
    base_version: u64,
    assigned: Vec<Task>,
    /// 首次运行时的步数预算，恢复时沿用
    max_steps: usize,
    paused_at: Instant,
}

impl PausedChild {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.paused_at.elapsed() > ttl
    }
}

/// 子 Agent 工具
pub struct SubAgentTool {
    name: String,
    description: String,
    oracle: Arc<dyn DecisionOracle>,
    registry: ToolRegistry,
    config: OrchestratorConfig,
    tool_timeout: Duration,
    default_max_steps: usize,
    timeout: Duration,
    paused_ttl: Duration,
    paused: Mutex<HashMap<String, PausedChild>>,
}

impl SubAgentTool {
    /// `parent_registry` 按 `allowed_tools` 白名单裁剪后作为子 Agent 的工具集
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        description: impl Into<String>,
        oracle: Arc<dyn DecisionOracle>,
        parent_registry: &ToolRegistry,
        allowed_tools: &[S],
    ) -> Self {
        let name = name.into();
        let config = OrchestratorConfig {
            agent_name: name.clone(),
            ephemeral: true,
            render_plan: false,
            max_steps: DEFAULT_SUB_AGENT_STEPS,
            ..Default::default()
        };
        Self {
            name,
            description: description.into(),
            oracle,
            registry: parent_registry.restricted(allowed_tools),
            config,
            tool_timeout: Duration::from_secs(30),
            default_max_steps: DEFAULT_SUB_AGENT_STEPS,
            timeout: DEFAULT_SUB_AGENT_TIMEOUT,
            paused_ttl: DEFAULT_PAUSED_TTL,
            paused: Mutex::new(HashMap::new()),
        }
    }

    /// 子循环的配置模板（agent 名、ephemeral 与 render_plan 始终被覆盖）
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = OrchestratorConfig {
            agent_name: self.name.clone(),
            ephemeral: true,
            render_plan: false,
            ..config
        };
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.default_max_steps = max_steps.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 暂停的子会话超过该时长未被恢复即丢弃
    pub fn with_paused_ttl(mut self, ttl: Duration) -> Self {
        self.paused_ttl = ttl;
        self
    }

    pub fn allowed_tools(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub async fn paused_count(&self) -> usize {
        self.paused.lock().await.len()
    }

    /// 清理过期的暂停子会话，返回清理数量
    pub async fn cleanup_expired(&self) -> usize {
        let mut paused = self.paused.lock().await;
        let before = paused.len();
        paused.retain(|_, child| !child.is_expired(self.paused_ttl));
        let removed = before - paused.len();
        if removed > 0 {
            tracing::info!(agent = %self.name, removed, "expired paused sub-agent sessions dropped");
        }
        removed
    }

    fn child_orchestrator(&self, max_steps: usize) -> Orchestrator {
        let config = OrchestratorConfig {
            max_steps,
            ..self.config.clone()
        };
        Orchestrator::new(
            self.oracle.clone(),
            ToolExecutor::with_timeout(self.registry.clone(), self.tool_timeout),
            config,
        )
    }

    /// 全新子会话：共享上下文副本 + 分配任务的副本
    fn fresh_child(&self, input: &SubAgentInput, max_steps: usize) -> PausedChild {
        let shared = &input.shared_context;
        let session_id = if shared.session_id.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", shared.session_id, self.name)
        };

        let assigned: Vec<Task> = input
            .assigned_task_ids
            .iter()
            .filter_map(|id| shared.tasks.iter().find(|t| &t.id == id).cloned())
            .collect();

        let mut ctx = SessionContext::new(session_id).with_mission(input.task.clone());
        ctx.ephemeral = true;
        ctx.facts = shared.facts.clone();
        ctx.known_answers_text = shared.known_answers_text.clone();
        if let Some(inputs) = &input.inputs {
            ctx.known_answers_text.push_str(&format!("Inputs: {inputs}\n"));
        }
        if !assigned.is_empty() {
            ctx.plan = Some(Plan::from_tasks(assigned.clone()));
        }
        ctx.version = shared.version;

        PausedChild {
            ctx,
            base_version: shared.version,
            assigned,
            max_steps,
            paused_at: Instant::now(),
        }
    }

    async fn run_child(&self, mut child: PausedChild) -> SubAgentOutput {
        let orchestrator = self.child_orchestrator(child.max_steps);
        let run = tokio::time::timeout(self.timeout, orchestrator.run_context(&mut child.ctx)).await;
        let outcome = match run {
            Ok((outcome, steps)) => {
                tracing::info!(agent = %self.name, steps, "sub-agent run finished");
                outcome
            }
            Err(_) => {
                tracing::warn!(agent = %self.name, timeout_secs = self.timeout.as_secs(), "sub-agent timed out");
                return SubAgentOutput::failed(format!(
                    "sub-agent {} exceeded {}s",
                    self.name,
                    self.timeout.as_secs()
                ));
            }
        };

        match outcome {
            RunOutcome::Completed { summary } => {
                let patch = diff_patch(&self.name, child.base_version, &child.assigned, &child.ctx);
                SubAgentOutput::completed(patch, summary)
            }
            RunOutcome::AwaitingUser(question) => {
                let token = uuid::Uuid::new_v4().to_string();
                let text = question.question.clone();
                child.paused_at = Instant::now();
                self.paused.lock().await.insert(token.clone(), child);
                tracing::info!(agent = %self.name, state_token = %token, "sub-agent paused for user input");
                SubAgentOutput::needs_input(text, self.name.clone(), token)
            }
            RunOutcome::StepLimit => {
                SubAgentOutput::failed(format!("sub-agent {} exhausted its step budget", self.name))
            }
            RunOutcome::StrategyChanged { notice } => SubAgentOutput::failed(notice),
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .field("task", "what the sub-agent should accomplish")
            .field("inputs", "extra structured inputs")
            .field("task_ids", "additional plan task ids to assign")
            .field("budget", "{\"max_steps\": n}")
    }

    fn timeout(&self) -> Option<Duration> {
        // 留出余量，让子循环自己的超时先生效
        Some(self.timeout + Duration::from_secs(5))
    }

    fn kind(&self) -> ToolKind {
        ToolKind::SubAgent
    }

    async fn execute(&self, params: Value) -> Result<Value, String> {
        let input: SubAgentInput = match serde_json::from_value(params) {
            Ok(input) => input,
            Err(e) => return Ok(SubAgentOutput::failed(format!("invalid sub-agent input: {e}")).to_value()),
        };
        let budget = input.budget.map(|b| b.max_steps.max(1));
        self.cleanup_expired().await;

        let child = match &input.resume_token {
            Some(token) => {
                let Some(mut child) = self.paused.lock().await.remove(token) else {
                    return Ok(SubAgentOutput::failed(format!("unknown or expired state token: {token}")).to_value());
                };
                if let Some(max_steps) = budget {
                    child.max_steps = max_steps;
                }
                child.ctx.apply_user_answer(input.answers.as_deref().unwrap_or_default());
                child
            }
            None => self.fresh_child(&input, budget.unwrap_or(self.default_max_steps)),
        };

        Ok(self.run_child(child).await.to_value())
    }
}

/// 把子会话对计划的修改还原成父计划上的补丁
///
/// 分配任务上的字段变化 -> update；子会话新建的任务以 `<agent>:<id>` 命名空间加入，
/// 有分配任务时作为第一个分配任务的子任务。
pub fn diff_patch(agent: &str, base_version: u64, assigned: &[Task], ctx: &SessionContext) -> Patch {
    let mut patch = Patch::new(base_version, agent);
    let Some(plan) = &ctx.plan else {
        return patch;
    };

    for before in assigned {
        if let Some(after) = plan.find(&before.id) {
            let fields = changed_fields(before, after);
            if !fields.is_empty() {
                patch = patch.with_op(KnownOp::Update {
                    task_id: before.id.clone(),
                    fields,
                });
            }
        }
    }

    let assigned_ids: HashSet<&str> = assigned.iter().map(|t| t.id.as_str()).collect();
    let created: HashSet<&str> = plan
        .tasks()
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| !assigned_ids.contains(id))
        .collect();
    let parent = assigned.first().map(|t| t.id.clone());

    for task in plan.tasks().iter().filter(|t| created.contains(t.id.as_str())) {
        let mut task = task.clone();
        task.id = format!("{agent}:{}", task.id);
        task.depends_on = task
            .depends_on
            .iter()
            .map(|dep| {
                if created.contains(dep.as_str()) {
                    format!("{agent}:{dep}")
                } else {
                    dep.clone()
                }
            })
            .collect::<BTreeSet<_>>();
        if task.owner_agent.is_none() {
            task.owner_agent = Some(agent.to_string());
        }
        let op = match &parent {
            Some(parent_id) => KnownOp::AddSubtask {
                parent_id: parent_id.clone(),
                task: task.into(),
            },
            None => KnownOp::Add { task: task.into() },
        };
        patch = patch.with_op(op);
    }
    patch
}

fn changed_fields(before: &Task, after: &Task) -> Map<String, Value> {
    let before = serde_json::to_value(before).unwrap_or(Value::Null);
    let after = serde_json::to_value(after).unwrap_or(Value::Null);
    UPDATABLE_FIELDS
        .iter()
        .filter_map(|field| {
            let old = before.get(*field).cloned().unwrap_or(Value::Null);
            let new = after.get(*field).cloned().unwrap_or(Value::Null);
            (old != new).then(|| (field.to_string(), new))
        })
        .collect()
}
