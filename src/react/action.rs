//! 动作：ReAct 每一步的决策结果
//!
//! 封闭的标签联合 `TOOL_CALL | ASK_USER | UPDATE_PLAN | ERROR_RECOVERY | COMPLETE`。
//! 预言机输出在产生任何副作用前就被校验为 Action；无法识别的工具或缺字段的决策降级为 ERROR_RECOVERY。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::PatchOp;
use crate::oracle::ToolSelection;
use crate::tools::{normalize_tool_name, DecisionFormat, InputSchema, ToolDescriptor, ToolRegistry};

/// 动作类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    ToolCall,
    AskUser,
    UpdatePlan,
    ErrorRecovery,
    Complete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ToolCall => "TOOL_CALL",
            ActionKind::AskUser => "ASK_USER",
            ActionKind::UpdatePlan => "UPDATE_PLAN",
            ActionKind::ErrorRecovery => "ERROR_RECOVERY",
            ActionKind::Complete => "COMPLETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "TOOL_CALL" => Some(ActionKind::ToolCall),
            "ASK_USER" => Some(ActionKind::AskUser),
            "UPDATE_PLAN" => Some(ActionKind::UpdatePlan),
            "ERROR_RECOVERY" => Some(ActionKind::ErrorRecovery),
            "COMPLETE" => Some(ActionKind::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 经过校验的动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall { name: String, params: Value },
    AskUser { question: String },
    UpdatePlan { ops: Vec<PatchOp> },
    ErrorRecovery { reason: String },
    Complete { summary: String },
}

/// 作为伪工具宣告给 select_tool 的元动作
pub const META_ASK_USER: &str = "ask_user";
pub const META_UPDATE_PLAN: &str = "update_plan";
pub const META_COMPLETE: &str = "complete";
pub const META_ERROR_RECOVERY: &str = "error_recovery";

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ToolCall { .. } => ActionKind::ToolCall,
            Action::AskUser { .. } => ActionKind::AskUser,
            Action::UpdatePlan { .. } => ActionKind::UpdatePlan,
            Action::ErrorRecovery { .. } => ActionKind::ErrorRecovery,
            Action::Complete { .. } => ActionKind::Complete,
        }
    }

    /// 动作名：工具调用为工具名，其余为元动作名
    pub fn name(&self) -> &str {
        match self {
            Action::ToolCall { name, .. } => name,
            Action::AskUser { .. } => META_ASK_USER,
            Action::UpdatePlan { .. } => META_UPDATE_PLAN,
            Action::ErrorRecovery { .. } => META_ERROR_RECOVERY,
            Action::Complete { .. } => META_COMPLETE,
        }
    }

    /// 校验 select_tool 的结果
    pub fn from_selection(selection: ToolSelection, registry: &ToolRegistry) -> Action {
        let args = selection.arguments;
        match normalize_tool_name(&selection.name).as_str() {
            META_ASK_USER => ask_user(text_arg(&args, &["question", "input"])),
            META_UPDATE_PLAN => update_plan(args.get("ops").cloned()),
            META_COMPLETE => Action::Complete {
                summary: text_arg(&args, &["summary", "input"]).unwrap_or_default(),
            },
            META_ERROR_RECOVERY => Action::ErrorRecovery {
                reason: text_arg(&args, &["reason", "input"])
                    .unwrap_or_else(|| "oracle requested recovery".to_string()),
            },
            _ => tool_call(&selection.name, args, registry),
        }
    }

    /// 校验结构化兜底路径的决策
    pub fn from_decision(decision: DecisionFormat, registry: &ToolRegistry) -> Action {
        let Some(kind) = ActionKind::parse(&decision.action) else {
            return Action::ErrorRecovery {
                reason: format!("unknown action type: {}", decision.action),
            };
        };
        match kind {
            ActionKind::ToolCall => match decision.name.filter(|n| !n.trim().is_empty()) {
                Some(name) => tool_call(&name, decision.params.unwrap_or(Value::Null), registry),
                None => Action::ErrorRecovery {
                    reason: "TOOL_CALL without tool name".to_string(),
                },
            },
            ActionKind::AskUser => ask_user(decision.question),
            ActionKind::UpdatePlan => update_plan(Some(Value::Array(decision.ops))),
            ActionKind::ErrorRecovery => Action::ErrorRecovery {
                reason: decision
                    .reason
                    .unwrap_or_else(|| "oracle requested recovery".to_string()),
            },
            ActionKind::Complete => Action::Complete {
                summary: decision.summary.unwrap_or_default(),
            },
        }
    }
}

fn text_arg(args: &Value, keys: &[&str]) -> Option<String> {
    if let Value::String(s) = args {
        return Some(s.clone()).filter(|s| !s.trim().is_empty());
    }
    keys.iter()
        .filter_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .find(|s| !s.trim().is_empty())
}

fn ask_user(question: Option<String>) -> Action {
    match question.filter(|q| !q.trim().is_empty()) {
        Some(question) => Action::AskUser { question },
        None => Action::ErrorRecovery {
            reason: "ASK_USER without question".to_string(),
        },
    }
}

fn update_plan(ops: Option<Value>) -> Action {
    let ops: Vec<PatchOp> = match ops {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| serde_json::from_value(v.clone()).unwrap_or(PatchOp::Unsupported(v)))
            .collect(),
        _ => Vec::new(),
    };
    if ops.is_empty() {
        Action::ErrorRecovery {
            reason: "UPDATE_PLAN without ops".to_string(),
        }
    } else {
        Action::UpdatePlan { ops }
    }
}

fn tool_call(name: &str, params: Value, registry: &ToolRegistry) -> Action {
    match registry.resolve(name) {
        Some(tool) => Action::ToolCall {
            name: tool.name().to_string(),
            params,
        },
        None => Action::ErrorRecovery {
            reason: format!("unknown tool: {name}"),
        },
    }
}

/// 元动作的伪工具描述，与真实工具一起交给 select_tool
pub fn meta_descriptors() -> Vec<ToolDescriptor> {
    let describe = |name: &str, description: &str, schema: InputSchema| ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        parameters: schema.to_json_schema(),
    };
    vec![
        describe(
            META_ASK_USER,
            "Ask the user a question when information is missing; ends the current run.",
            InputSchema::new().required_field("question", "question for the user"),
        ),
        describe(
            META_UPDATE_PLAN,
            "Modify the task plan with patch ops (update, annotate, add, add_subtask, link_dep, unlink_dep).",
            InputSchema::new().required_field("ops", "list of patch ops"),
        ),
        describe(
            META_COMPLETE,
            "Finish the mission with a summary.",
            InputSchema::new().field("summary", "final summary"),
        ),
        describe(
            META_ERROR_RECOVERY,
            "Report that no useful action is possible right now.",
            InputSchema::new().field("reason", "why"),
        ),
    ]
}
