//! 状态定义：编排器阶段与状态投影
//!
//! 外部只需要轻量的 StatusSummary（阶段、版本、进度、待答问题）；完整状态由 SessionContext 维护并投影到 StatusSummary。

use serde::{Deserialize, Serialize};

/// 编排器状态机阶段
///
/// `NoPlan -> Planning -> {AskBlockingQuestions} -> Looping -> {Complete | AwaitingUser}`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    #[default]
    NoPlan,
    Planning,
    AskBlockingQuestions,
    Looping,
    Complete,
    AwaitingUser,
}

/// 会话状态投影（供 HTTP / CLI 等外层展示）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub session_id: String,
    pub phase: OrchestratorPhase,
    pub version: u64,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub awaiting_question: Option<String>,
}
