//! planloop - 自主任务执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、编排阶段、工作池、引擎构建器
//! - **delegate**: 子 Agent 委派（沙箱子循环 + 补丁）
//! - **observability**: tracing 初始化
//! - **oracle**: 决策预言机端口与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **plan**: 任务计划、会话上下文、确定性视图、补丁合并
//! - **react**: 动作、循环守卫、Planner、编排器主循环
//! - **store**: 会话快照存储（内存 / 文件 / SQLite）
//! - **tools**: 工具注册表与执行器

pub mod config;
pub mod core;
pub mod delegate;
pub mod observability;
pub mod oracle;
pub mod plan;
pub mod react;
pub mod store;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{AgentError, EngineBuilder};
pub use crate::react::{Orchestrator, OrchestratorConfig, RunOutcome, RunReport};
