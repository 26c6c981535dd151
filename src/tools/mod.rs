//! 工具层：注册表、执行器（超时 / 校验 / 审计）、闭包工具与决策 schema

pub mod executor;
pub mod function;
pub mod registry;
pub mod schema;

pub use executor::{coerce_params, ToolExecutor, ToolOutcome};
pub use function::FnTool;
pub use registry::{normalize_tool_name, InputSchema, Tool, ToolDescriptor, ToolKind, ToolRegistry};
pub use schema::{decision_schema_json, DecisionFormat};
