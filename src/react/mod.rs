//! ReAct 层：动作模型、循环守卫、Planner（决策预言机交互）、编排器主循环与过程事件

pub mod action;
pub mod events;
pub mod loop_guard;
pub mod orchestrator;
pub mod planner;

pub use action::{meta_descriptors, Action, ActionKind};
pub use events::ReactEvent;
pub use loop_guard::{GuardVerdict, LoopGuard};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome, RunReport};
pub use planner::{context_prompt, PlanDraft, Planner, QuestionTriage};
