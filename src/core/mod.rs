//! 核心层：错误与恢复、阶段与状态投影、同步工具的工作池、引擎构建器

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;
pub mod worker_pool;

pub use builder::{create_engine_builder, EngineBuilder};
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{OrchestratorPhase, StatusSummary};
pub use worker_pool::WorkerPool;
