//! ReAct 过程事件：用于流式展示步骤、思考、决策、工具调用、观察与补丁合并

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供外层展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// 预言机的思考内容
    Thought { text: String },
    /// 校验后的决策
    Decision { action: String, name: String },
    /// 调用工具
    ToolCall {
        tool: String,
        params: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 瞬时失败后的重试
    Retry {
        tool: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// 补丁已合并
    PatchApplied {
        agent: String,
        applied: usize,
        denied: Vec<String>,
        new_version: u64,
    },
    /// 补丁版本冲突
    PatchConflict { agent: String, base: u64, current: u64 },
    /// 循环守卫触发（escalated=false 表示已切换策略）
    LoopGuard { firing: u32, escalated: bool },
    /// 等待用户回答
    AskUser { question: String },
    /// 任务完成
    Complete { summary: String },
    /// 会话快照已保存
    Persisted { version: u64 },
    /// 错误
    Error { text: String },
}
