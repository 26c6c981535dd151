//! 编排器：ReAct 主循环与状态机
//!
//! `NoPlan -> Planning -> {AskBlockingQuestions} -> Looping -> {Complete | AwaitingUser}`
//!
//! 每一步：思考（尽力而为）-> 决策（select_tool，失败退回结构化 JSON，再失败 ERROR_RECOVERY）->
//! 执行（瞬时失败最多 3 次、指数退避）-> 记录观察 -> 循环守卫 -> 周期性持久化。
//! 一步之内的任何失败都降级为观察文本、强制询问用户或有界重试，不会中止进程。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{AgentError, OrchestratorPhase, RecoveryAction, RecoveryEngine};
use crate::delegate::{SharedContext, SubAgentInput};
use crate::oracle::DecisionOracle;
use crate::plan::{
    apply_patch_with_render, AwaitingUserInput, Blocker, HistoryEntry, Patch, PatchOp,
    PendingDelegation, Plan, QuestionKind, SessionContext, Task, TaskStatus,
};
use crate::react::{Action, ActionKind, GuardVerdict, Planner, ReactEvent};
use crate::store::{SessionSnapshot, StateStore};
use crate::tools::{ToolExecutor, ToolKind, ToolOutcome, ToolRegistry};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 写入任务备注的结果最大字符数
const NOTE_RESULT_CHARS: usize = 2000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous task orchestrator. Work through the plan one task at a time, \
use the available tools, ask the user only when information is truly missing, and call `complete` when the mission is done.";

/// 编排器配置（由 AppConfig 派生，经构造函数注入）
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_steps: usize,
    /// 单次工具调用的最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 退避基数：第 n 次重试前等待 base * 2^(n-1)
    pub backoff_base: Duration,
    pub persist_every: usize,
    pub history_capacity: usize,
    pub oracle_timeout: Duration,
    /// 编排器自身提交补丁时使用的 agent 名
    pub agent_name: String,
    pub render_plan: bool,
    /// 沙箱子会话：从不持久化
    pub ephemeral: bool,
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            persist_every: 5,
            history_capacity: crate::plan::DEFAULT_HISTORY_CAPACITY,
            oracle_timeout: Duration::from_secs(60),
            agent_name: "orchestrator".to_string(),
            render_plan: true,
            ephemeral: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(cfg: &AppConfig) -> Self {
        let engine = &cfg.engine;
        Self {
            max_steps: engine.max_steps,
            max_attempts: engine.max_attempts.max(1),
            backoff_base: Duration::from_millis(engine.backoff_base_ms),
            persist_every: engine.persist_every,
            history_capacity: engine.history_capacity,
            oracle_timeout: Duration::from_secs(engine.oracle_timeout_secs),
            agent_name: engine.agent_name.clone(),
            render_plan: engine.render_plan,
            ephemeral: false,
            system_prompt: engine
                .system_prompt
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

/// 一次运行的结局
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { summary: String },
    AwaitingUser(AwaitingUserInput),
    /// 达到最大步数
    StepLimit,
    /// 循环守卫第三次触发：已切换策略并中断
    StrategyChanged { notice: String },
}

/// run() 的返回：结局、本次执行的步数与最终上下文
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: usize,
    pub context: SessionContext,
}

enum StepControl {
    Continue,
    Stop(RunOutcome),
}

/// 编排器
pub struct Orchestrator {
    planner: Planner,
    executor: ToolExecutor,
    store: Option<Arc<dyn StateStore>>,
    recovery: RecoveryEngine,
    config: OrchestratorConfig,
    event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn DecisionOracle>, executor: ToolExecutor, config: OrchestratorConfig) -> Self {
        let planner = Planner::new(oracle, config.system_prompt.clone(), config.oracle_timeout);
        Self {
            planner,
            executor,
            store: None,
            recovery: RecoveryEngine::new(),
            config,
            event_tx: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    fn emit(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 加载会话；不存在时新建
    pub async fn load_context(&self, session_id: &str) -> Result<SessionContext, AgentError> {
        let loaded = match &self.store {
            Some(store) => store
                .load(session_id)
                .await
                .map_err(|e| AgentError::StoreError(e.to_string()))?,
            None => None,
        };
        Ok(match loaded {
            Some(snapshot) => snapshot.context,
            None => SessionContext::new(session_id).with_history_capacity(self.config.history_capacity),
        })
    }

    /// 外部请求入口：有待答问题时 request 视为回答（并恢复暂停中的委派），否则视为 mission
    pub async fn run(&self, session_id: &str, request: &str) -> Result<RunReport, AgentError> {
        let mut ctx = self.load_context(session_id).await?;
        tracing::info!(session_id, version = ctx.version, "run started");

        if ctx.awaiting_user_input.is_some() {
            ctx.apply_user_answer(request);
            if let Some(pending) = ctx.pending_delegation.take() {
                if let StepControl::Stop(outcome) = self.resume_delegation(&mut ctx, pending, request).await {
                    self.finish(&mut ctx, &outcome).await;
                    return Ok(RunReport {
                        outcome,
                        steps: 0,
                        context: ctx,
                    });
                }
            }
        } else {
            if ctx.phase == OrchestratorPhase::Complete {
                // 上一个任务已完成：新请求重新规划，版本号继续递增
                ctx.plan = None;
                ctx.plan_view = None;
                ctx.asked_blocking_questions.clear();
                ctx.loop_guard.reset();
            }
            ctx.mission = request.trim().to_string();
            ctx.blocker = None;
        }

        let (outcome, steps) = self.run_context(&mut ctx).await;
        self.finish(&mut ctx, &outcome).await;
        Ok(RunReport {
            outcome,
            steps,
            context: ctx,
        })
    }

    async fn finish(&self, ctx: &mut SessionContext, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Completed { summary } => {
                ctx.phase = OrchestratorPhase::Complete;
                self.emit(ReactEvent::Complete {
                    summary: summary.clone(),
                });
            }
            RunOutcome::AwaitingUser(question) => {
                if ctx.phase != OrchestratorPhase::AskBlockingQuestions {
                    ctx.phase = OrchestratorPhase::AwaitingUser;
                }
                self.emit(ReactEvent::AskUser {
                    question: question.question.clone(),
                });
            }
            RunOutcome::StepLimit | RunOutcome::StrategyChanged { .. } => {}
        }
        self.persist(ctx).await;
    }

    /// 在给定上下文上驱动状态机；返回结局与执行的步数（不负责最终持久化）
    pub async fn run_context(&self, ctx: &mut SessionContext) -> (RunOutcome, usize) {
        if ctx.plan.is_none() {
            ctx.phase = OrchestratorPhase::Planning;
            if let Some(outcome) = self.plan_first_gate(ctx).await {
                return (outcome, 0);
            }
            self.bootstrap_plan(ctx).await;
        }
        ctx.phase = OrchestratorPhase::Looping;

        let registry = self.executor.registry().clone();
        for step in 1..=self.config.max_steps {
            self.emit(ReactEvent::StepUpdate {
                step,
                max_steps: self.config.max_steps,
            });

            let thought = self.planner.thought(ctx).await;
            self.emit(ReactEvent::Thought {
                text: thought.clone(),
            });

            let action = self.planner.decide(ctx, &thought, &registry).await;
            tracing::info!(
                session_id = %ctx.session_id,
                step,
                action = %action.kind(),
                name = action.name(),
                "decision"
            );
            self.emit(ReactEvent::Decision {
                action: action.kind().as_str().to_string(),
                name: action.name().to_string(),
            });

            let (observation, control) = self.execute_action(ctx, &action).await;
            self.emit(ReactEvent::Observation {
                tool: action.name().to_string(),
                preview: preview(&observation),
            });
            record(ctx, step, action.kind(), action.name(), &observation);

            match ctx.loop_guard.check(action.kind(), action.name(), &observation) {
                GuardVerdict::Clear => {}
                GuardVerdict::Escalate { firing, question } => {
                    self.emit(ReactEvent::LoopGuard {
                        firing,
                        escalated: true,
                    });
                    let pending = AwaitingUserInput::new(question, QuestionKind::LoopGuard);
                    ctx.awaiting_user_input = Some(pending.clone());
                    return (RunOutcome::AwaitingUser(pending), step);
                }
                GuardVerdict::BreakCycle { notice } => {
                    self.emit(ReactEvent::LoopGuard {
                        firing: 3,
                        escalated: false,
                    });
                    ctx.blocker = Some(Blocker {
                        kind: "loop_guard".to_string(),
                        message: notice.clone(),
                        hint: Some(format!("avoid repeating {} `{}`", action.kind(), action.name())),
                    });
                    return (RunOutcome::StrategyChanged { notice }, step);
                }
            }

            if let StepControl::Stop(outcome) = control {
                return (outcome, step);
            }

            if self.config.persist_every > 0 && step % self.config.persist_every == 0 {
                self.persist(ctx).await;
            }
        }

        tracing::warn!(session_id = %ctx.session_id, max_steps = self.config.max_steps, "step limit reached");
        (RunOutcome::StepLimit, self.config.max_steps)
    }

    /// 规划前问答：存在阻塞问题时立即停下询问用户，不创建计划
    async fn plan_first_gate(&self, ctx: &mut SessionContext) -> Option<RunOutcome> {
        if !ctx.asked_blocking_questions.is_empty() {
            return None;
        }
        let triage = match self.planner.triage(ctx).await {
            Ok(triage) => triage,
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "question triage failed, planning without it");
                return None;
            }
        };
        ctx.merge_open_questions(triage.optional);
        let blocking: Vec<String> = triage
            .blocking
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if blocking.is_empty() {
            return None;
        }

        let question = if blocking.len() == 1 {
            blocking[0].clone()
        } else {
            blocking
                .iter()
                .enumerate()
                .map(|(i, q)| format!("{}. {q}", i + 1))
                .collect::<Vec<_>>()
                .join("\n")
        };
        ctx.asked_blocking_questions = blocking;
        ctx.phase = OrchestratorPhase::AskBlockingQuestions;
        let pending = AwaitingUserInput::new(question, QuestionKind::Blocking);
        ctx.awaiting_user_input = Some(pending.clone());
        Some(RunOutcome::AwaitingUser(pending))
    }

    /// 计划引导；预言机失败或返回空列表时退化为单任务计划
    async fn bootstrap_plan(&self, ctx: &mut SessionContext) {
        ctx.phase = OrchestratorPhase::Planning;
        let plan = match self.planner.bootstrap(ctx, self.executor.registry()).await {
            Ok(draft) if !draft.tasks.is_empty() => {
                ctx.merge_open_questions(draft.open_questions);
                Plan::from_drafts(draft.tasks)
            }
            Ok(_) => {
                tracing::warn!(session_id = %ctx.session_id, "empty plan draft, using single-task plan");
                single_task_plan(&ctx.mission)
            }
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "plan bootstrap failed, using single-task plan");
                single_task_plan(&ctx.mission)
            }
        };
        tracing::info!(session_id = %ctx.session_id, tasks = plan.total(), "plan bootstrapped");
        ctx.plan = Some(plan);
        self.refresh_view(ctx);
    }

    fn refresh_view(&self, ctx: &mut SessionContext) {
        if self.config.render_plan {
            ctx.rerender();
        }
    }

    async fn execute_action(&self, ctx: &mut SessionContext, action: &Action) -> (String, StepControl) {
        match action {
            Action::ToolCall { name, params } => self.execute_tool_call(ctx, name, params.clone()).await,
            Action::AskUser { question } => {
                let pending = AwaitingUserInput::new(question.clone(), QuestionKind::Clarification);
                ctx.awaiting_user_input = Some(pending.clone());
                (
                    format!("ASK_USER: {question}"),
                    StepControl::Stop(RunOutcome::AwaitingUser(pending)),
                )
            }
            Action::UpdatePlan { ops } => (self.update_plan(ctx, ops.clone()), StepControl::Continue),
            Action::ErrorRecovery { reason } => {
                tracing::warn!(session_id = %ctx.session_id, reason = %reason, "error recovery");
                (format!("ERROR_RECOVERY: {reason}"), StepControl::Continue)
            }
            Action::Complete { summary } => {
                let summary = if summary.trim().is_empty() {
                    ctx.plan_view.clone().unwrap_or_else(|| "mission complete".to_string())
                } else {
                    summary.clone()
                };
                (
                    format!("COMPLETE: {summary}"),
                    StepControl::Stop(RunOutcome::Completed { summary }),
                )
            }
        }
    }

    /// UPDATE_PLAN：以编排器自身的 agent 名、在当前版本上提交补丁
    fn update_plan(&self, ctx: &mut SessionContext, ops: Vec<PatchOp>) -> String {
        let patch = Patch {
            base_version: ctx.version,
            agent_name: self.config.agent_name.clone(),
            ops,
        };
        match apply_patch_with_render(ctx, &patch, self.config.render_plan) {
            Ok(outcome) => {
                self.emit(ReactEvent::PatchApplied {
                    agent: patch.agent_name.clone(),
                    applied: outcome.applied,
                    denied: outcome.denied.clone(),
                    new_version: outcome.new_version,
                });
                serde_json::to_string(&outcome).unwrap_or_default()
            }
            Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }).to_string(),
        }
    }

    async fn execute_tool_call(&self, ctx: &mut SessionContext, name: &str, params: Value) -> (String, StepControl) {
        if ctx.plan.is_none() {
            self.bootstrap_plan(ctx).await;
        }
        let kind = self
            .executor
            .get_tool(name)
            .map(|t| t.kind())
            .unwrap_or_default();

        let task_id = ctx
            .plan
            .as_ref()
            .and_then(|p| p.target_for_tool(name))
            .map(|t| t.id.clone());
        if let Some(id) = &task_id {
            self.set_task_status(ctx, id, TaskStatus::InProgress, None);
        }

        let params = if kind == ToolKind::SubAgent {
            delegation_params(ctx, task_id.as_deref(), &params)
        } else {
            params
        };

        let outcome = self.execute_with_retry(name, params).await;

        if kind == ToolKind::SubAgent {
            return self.handle_delegation_outcome(ctx, name, task_id, outcome);
        }

        let observation = outcome.to_observation();
        if let Some(id) = &task_id {
            let status = if outcome.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            self.set_task_status(ctx, id, status, Some(&observation));
        }
        (observation, StepControl::Continue)
    }

    fn set_task_status(&self, ctx: &mut SessionContext, task_id: &str, status: TaskStatus, note: Option<&str>) {
        if let Some(task) = ctx.plan.as_mut().and_then(|p| p.find_mut(task_id)) {
            task.status = status;
            if let Some(note) = note {
                task.append_note(&truncate(note, NOTE_RESULT_CHARS));
            }
        }
        self.refresh_view(ctx);
    }

    /// 执行工具；仅瞬时失败（超时 / 执行异常）重试，退避 base、2*base、4*base …
    async fn execute_with_retry(&self, name: &str, params: Value) -> ToolOutcome {
        let mut attempt: u32 = 1;
        loop {
            self.emit(ReactEvent::ToolCall {
                tool: name.to_string(),
                params: params.clone(),
            });
            let outcome = self.executor.execute(name, params.clone()).await;
            if outcome.success || !outcome.retryable || attempt >= self.config.max_attempts {
                return outcome;
            }
            let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
            tracing::warn!(
                tool = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = outcome.error.as_deref().unwrap_or(""),
                "tool failed, retrying"
            );
            self.emit(ReactEvent::Retry {
                tool: name.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// 子 Agent 的返回：请求用户输入 / 失败 / 补丁
    fn handle_delegation_outcome(
        &self,
        ctx: &mut SessionContext,
        tool: &str,
        task_id: Option<String>,
        outcome: ToolOutcome,
    ) -> (String, StepControl) {
        let observation = outcome.to_observation();

        if let Some(need) = outcome.need_user_input() {
            let question = need
                .get("question")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| need.to_string());
            if let Some(token) = outcome.state_token() {
                ctx.pending_delegation = Some(PendingDelegation {
                    tool: tool.to_string(),
                    task_id: task_id.clone(),
                    state_token: token.to_string(),
                });
            }
            let pending = AwaitingUserInput::new(question, QuestionKind::SubAgent).with_source(tool);
            ctx.awaiting_user_input = Some(pending.clone());
            return (observation, StepControl::Stop(RunOutcome::AwaitingUser(pending)));
        }

        if !outcome.success {
            if let Some(id) = &task_id {
                self.set_task_status(ctx, id, TaskStatus::Failed, Some(&observation));
            }
            return (observation, StepControl::Continue);
        }

        let patch = match outcome.output.get("patch").cloned().map(serde_json::from_value::<Patch>) {
            Some(Ok(patch)) => patch,
            Some(Err(e)) => {
                if let Some(id) = &task_id {
                    self.set_task_status(ctx, id, TaskStatus::Failed, Some(&format!("invalid patch: {e}")));
                }
                return (format!("{observation}\ninvalid patch: {e}"), StepControl::Continue);
            }
            None => {
                if let Some(id) = &task_id {
                    self.set_task_status(ctx, id, TaskStatus::Completed, Some(&observation));
                }
                return (observation, StepControl::Continue);
            }
        };

        match apply_patch_with_render(ctx, &patch, self.config.render_plan) {
            Ok(merged) => {
                self.emit(ReactEvent::PatchApplied {
                    agent: patch.agent_name.clone(),
                    applied: merged.applied,
                    denied: merged.denied.clone(),
                    new_version: merged.new_version,
                });
                if let Some(id) = &task_id {
                    let still_running = ctx
                        .plan
                        .as_ref()
                        .and_then(|p| p.find(id))
                        .map(|t| t.status == TaskStatus::InProgress)
                        .unwrap_or(false);
                    if still_running {
                        self.set_task_status(
                            ctx,
                            id,
                            TaskStatus::Completed,
                            Some(&format!("delegated to {tool}: {} op(s) applied", merged.applied)),
                        );
                    }
                }
                (
                    serde_json::to_string(&merged).unwrap_or(observation),
                    StepControl::Continue,
                )
            }
            Err(err) => {
                if let AgentError::VersionConflict { base, current } = &err {
                    self.emit(ReactEvent::PatchConflict {
                        agent: patch.agent_name.clone(),
                        base: *base,
                        current: *current,
                    });
                }
                if let Some(id) = &task_id {
                    self.set_task_status(ctx, id, TaskStatus::Pending, Some(&err.to_string()));
                }
                let question = match self.recovery.handle(&err) {
                    RecoveryAction::AskUser(q) => q,
                    _ => err.to_string(),
                };
                let pending = AwaitingUserInput::new(question, QuestionKind::Conflict).with_source(tool);
                ctx.awaiting_user_input = Some(pending.clone());
                (err.to_string(), StepControl::Stop(RunOutcome::AwaitingUser(pending)))
            }
        }
    }

    /// 用户回答后恢复暂停中的子 Agent
    async fn resume_delegation(
        &self,
        ctx: &mut SessionContext,
        pending: PendingDelegation,
        answer: &str,
    ) -> StepControl {
        tracing::info!(session_id = %ctx.session_id, tool = %pending.tool, "resuming delegation");
        let input = SubAgentInput {
            task: ctx.mission.clone(),
            shared_context: SharedContext::from_context(ctx),
            assigned_task_ids: pending.task_id.iter().cloned().collect(),
            resume_token: Some(pending.state_token.clone()),
            answers: Some(answer.to_string()),
            ..Default::default()
        };
        let params = serde_json::to_value(&input).unwrap_or(Value::Null);
        let outcome = self.execute_with_retry(&pending.tool, params).await;
        let (observation, control) =
            self.handle_delegation_outcome(ctx, &pending.tool, pending.task_id.clone(), outcome);
        record(ctx, 0, ActionKind::ToolCall, &pending.tool, &observation);
        control
    }

    /// 保存快照；沙箱会话与未配置存储时跳过，失败只记日志
    async fn persist(&self, ctx: &SessionContext) {
        if ctx.ephemeral || self.config.ephemeral {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        match store.save(&ctx.session_id, &SessionSnapshot::new(ctx.clone())).await {
            Ok(()) => {
                tracing::debug!(session_id = %ctx.session_id, version = ctx.version, "session persisted");
                self.emit(ReactEvent::Persisted { version: ctx.version });
            }
            Err(e) => {
                tracing::error!(session_id = %ctx.session_id, error = %e, "failed to persist session");
                self.emit(ReactEvent::Error {
                    text: format!("persist failed: {e}"),
                });
            }
        }
    }
}

fn record(ctx: &mut SessionContext, step: usize, kind: ActionKind, name: &str, observation: &str) {
    ctx.history.push(HistoryEntry {
        step,
        action_type: kind,
        action_name: name.to_string(),
        observation: observation.to_string(),
        at: chrono::Utc::now(),
    });
}

fn single_task_plan(mission: &str) -> Plan {
    let title = if mission.trim().is_empty() {
        "Complete the request".to_string()
    } else {
        mission.trim().to_string()
    };
    Plan::from_tasks(vec![Task::new("t1", title)])
}

/// 子 Agent 调用参数：注入共享上下文副本与显式分配的任务 id（发起任务在前）
fn delegation_params(ctx: &SessionContext, task_id: Option<&str>, params: &Value) -> Value {
    let plan = ctx.plan_or_empty();
    let mut assigned: Vec<String> = task_id.map(str::to_string).into_iter().collect();
    for id in SubAgentInput::requested_task_ids(params) {
        if plan.contains(&id) && !assigned.contains(&id) {
            assigned.push(id);
        }
    }
    let fallback_task = task_id
        .and_then(|id| plan.find(id))
        .map(|t| t.description.clone().unwrap_or_else(|| t.title.clone()))
        .unwrap_or_else(|| ctx.mission.clone());
    let input = SubAgentInput::from_call(params, SharedContext::from_context(ctx), assigned, fallback_task);
    serde_json::to_value(&input).unwrap_or_else(|_| params.clone())
}

fn preview(text: &str) -> String {
    truncate(text, OBSERVATION_PREVIEW_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
