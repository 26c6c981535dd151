//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithBackoff / ReportObservation / AskUser / FallbackDecision。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误（工具、决策预言机、补丁冲突、持久化等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool parameters: {0}")]
    InvalidParams(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Oracle error: {0}")]
    OracleError(String),

    #[error("Oracle timeout")]
    OracleTimeout,

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 补丁 base_version 与当前版本不一致，整体拒绝
    #[error("Version conflict: patch base_version {base} != current version {current}")]
    VersionConflict { base: u64, current: u64 },

    #[error("State store error: {0}")]
    StoreError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 瞬时故障：指数退避后重试
    RetryWithBackoff,
    /// 校验类失败：不重试，直接作为 Observation 记录
    ReportObservation,
    /// 需要用户决策（如补丁冲突）
    AskUser(String),
    /// 结构化决策失败：退回到 schema 引导的 JSON 解析或安全默认动作
    FallbackDecision,
}
