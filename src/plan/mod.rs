//! 计划层：任务模型、会话上下文、确定性视图与补丁合并

pub mod context;
pub mod patch;
pub mod render;
pub mod task;

pub use context::{
    extract_facts, ActionHistory, AwaitingUserInput, Blocker, HistoryEntry, PendingDelegation,
    QuestionKind, SessionContext, DEFAULT_HISTORY_CAPACITY,
};
pub use patch::{
    apply_patch, apply_patch_with_render, KnownOp, Patch, PatchOp, PatchOutcome, TaskSpec,
    UPDATABLE_FIELDS,
};
pub use render::render_plan;
pub use task::{Plan, Task, TaskDraft, TaskId, TaskStatus};
