//! 核心编排层：错误、循环状态、会话监管、动作调度、组件装配

pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use error::{ActionError, AgentError};
pub use orchestrator::{build_catalog, create_llm_from_config, effective_provider};
pub use session_supervisor::SessionSupervisor;
pub use state::LoopState;
pub use task_scheduler::TaskScheduler;
