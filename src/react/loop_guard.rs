//! 循环守卫：检测重复的 (动作, 观察) 序列
//!
//! 滑动窗口保存最近 3 个签名 `actionType|actionName|观察前 160 字符（小写、空白折叠）`，
//! 窗口满且三者相同即触发：前两次触发升级为询问用户，第三次重置冷却计数并切换策略中断循环，
//! 不再向用户重复提问。每次触发后清空窗口。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::react::ActionKind;

pub const WINDOW_SIZE: usize = 3;
const OBSERVATION_PREFIX_CHARS: usize = 160;
/// 前几次触发以询问用户的方式升级
const MAX_ESCALATIONS: u32 = 2;

/// 守卫判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Clear,
    /// 第 1、2 次触发：向用户描述重复情况
    Escalate { firing: u32, question: String },
    /// 第 3 次触发：内部切换策略并中断，不再提问
    BreakCycle { notice: String },
}

/// 归一化签名
pub fn signature(kind: ActionKind, name: &str, observation: &str) -> String {
    let collapsed = observation
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let prefix: String = collapsed.chars().take(OBSERVATION_PREFIX_CHARS).collect();
    format!("{}|{}|{}", kind.as_str(), name, prefix)
}

/// 循环守卫（随会话上下文持久化，暂停后恢复仍保留触发计数）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopGuard {
    window: VecDeque<String>,
    cooldown: u32,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已触发次数（切换策略后归零）
    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.cooldown = 0;
    }

    /// 记录一次 (动作, 观察) 并给出判定
    pub fn check(&mut self, kind: ActionKind, name: &str, observation: &str) -> GuardVerdict {
        self.window.push_back(signature(kind, name, observation));
        while self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }

        let repeating = self.window.len() == WINDOW_SIZE
            && self.window.iter().all(|s| Some(s) == self.window.front());
        if !repeating {
            return GuardVerdict::Clear;
        }

        self.window.clear();
        self.cooldown += 1;
        tracing::warn!(action = %kind, name, firing = self.cooldown, "loop guard fired");

        if self.cooldown <= MAX_ESCALATIONS {
            GuardVerdict::Escalate {
                firing: self.cooldown,
                question: format!(
                    "动作 {kind} `{name}` 已连续 {WINDOW_SIZE} 次得到相同结果，似乎陷入了循环。请提供新的信息或指示下一步该怎么做？"
                ),
            }
        } else {
            self.cooldown = 0;
            GuardVerdict::BreakCycle {
                notice: format!(
                    "动作 {kind} `{name}` 反复重复，已切换策略并中断当前循环（不再重复询问）。"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire(guard: &mut LoopGuard) -> GuardVerdict {
        let mut last = GuardVerdict::Clear;
        for _ in 0..WINDOW_SIZE {
            last = guard.check(ActionKind::ToolCall, "search", "No   Results\nfound");
        }
        last
    }

    #[test]
    fn test_signature_normalizes_observation() {
        let a = signature(ActionKind::ToolCall, "search", "No   Results\nfound");
        let b = signature(ActionKind::ToolCall, "search", "no results found");
        assert_eq!(a, b);
        assert_eq!(a, "TOOL_CALL|search|no results found");
    }

    #[test]
    fn test_signature_truncates_observation() {
        let long = "x".repeat(500);
        let sig = signature(ActionKind::ToolCall, "t", &long);
        assert_eq!(sig.len(), "TOOL_CALL|t|".len() + 160);
        // 前 160 字符相同即视为相同
        let other = format!("{}{}", "x".repeat(160), "y".repeat(10));
        assert_eq!(sig, signature(ActionKind::ToolCall, "t", &other));
    }

    #[test]
    fn test_two_identical_do_not_fire() {
        let mut guard = LoopGuard::new();
        assert_eq!(guard.check(ActionKind::ToolCall, "a", "x"), GuardVerdict::Clear);
        assert_eq!(guard.check(ActionKind::ToolCall, "a", "x"), GuardVerdict::Clear);
        assert_eq!(guard.check(ActionKind::ToolCall, "a", "y"), GuardVerdict::Clear);
    }

    #[test]
    fn test_escalate_twice_then_break() {
        let mut guard = LoopGuard::new();
        assert!(matches!(fire(&mut guard), GuardVerdict::Escalate { firing: 1, .. }));
        assert!(matches!(fire(&mut guard), GuardVerdict::Escalate { firing: 2, .. }));
        assert!(matches!(fire(&mut guard), GuardVerdict::BreakCycle { .. }));
        assert_eq!(guard.cooldown(), 0);
    }

    #[test]
    fn test_window_cleared_after_firing() {
        let mut guard = LoopGuard::new();
        fire(&mut guard);
        // 再来两次相同签名不足以再次触发
        assert_eq!(guard.check(ActionKind::ToolCall, "search", "no results found"), GuardVerdict::Clear);
        assert_eq!(guard.check(ActionKind::ToolCall, "search", "no results found"), GuardVerdict::Clear);
    }

    #[test]
    fn test_guard_survives_serialization() {
        let mut guard = LoopGuard::new();
        fire(&mut guard);
        let restored: LoopGuard = serde_json::from_str(&serde_json::to_string(&guard).unwrap()).unwrap();
        assert_eq!(restored.cooldown(), 1);
    }
}
