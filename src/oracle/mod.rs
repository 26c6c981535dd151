//! 决策预言机：端口定义与实现（OpenAI 兼容 / 脚本化 Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::ScriptedOracle;
pub use openai::OpenAiOracle;
pub use traits::{extract_json, generate_typed, DecisionOracle, ToolSelection};
