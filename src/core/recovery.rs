//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供工具执行器与 ReAct 循环决定是重试、记录观察、询问用户还是降级决策。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ToolTimeout(_) | AgentError::ToolExecutionFailed(_) => {
                RecoveryAction::RetryWithBackoff
            }
            AgentError::UnknownTool(_) | AgentError::InvalidParams(_) => {
                RecoveryAction::ReportObservation
            }
            AgentError::VersionConflict { base, current } => RecoveryAction::AskUser(format!(
                "计划已被其他参与者修改（补丁基于版本 {base}，当前版本 {current}），补丁已整体拒绝。是否基于最新计划重新委派？"
            )),
            AgentError::OracleError(_)
            | AgentError::OracleTimeout
            | AgentError::JsonParseError(_) => RecoveryAction::FallbackDecision,
            AgentError::StoreError(_) | AgentError::ConfigError(_) => {
                RecoveryAction::ReportObservation
            }
        }
    }

    /// 该错误是否值得重试（仅瞬时执行故障）
    pub fn is_retryable(&self, err: &AgentError) -> bool {
        matches!(self.handle(err), RecoveryAction::RetryWithBackoff)
    }
}
