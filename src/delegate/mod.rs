//! 子 Agent 委派：输入输出契约与子 Agent 工具

pub mod sub_agent;
pub mod types;

pub use sub_agent::{diff_patch, SubAgentTool};
pub use types::{Budget, NeedUserInput, SharedContext, SubAgentInput, SubAgentOutput};
