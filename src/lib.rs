//! MedReact - 医学影像 ReAct 智能体
//!
//! 模块划分：
//! - **agent**: 会话入口（AgentComponents、Session::ask）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、循环状态、会话监管、动作调度、组件装配
//! - **llm**: 推理模型客户端抽象与实现（OpenAI 兼容多模态 / Mock）与重试
//! - **memory**: 会话账本、对话消息与账本持久化
//! - **react**: Planner（推理步骤）、Router、ReAct 主循环
//! - **tools**: 动作目录、参数校验、调度器与能力提供方（HTTP / 本地程序 / echo）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{create_agent_components, AgentComponents, Session};
