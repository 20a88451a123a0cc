//! 核心编排层：错误与恢复、阶段定义、运行监管、批量调度、主控循环

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod run_supervisor;
pub mod scheduler;
pub mod state;

pub use error::{GenerationError, HarnessError, RecoveryAction, ToolError};
pub use orchestrator::{
    unresolved_tool_calls, Orchestrator, OrchestratorConfig, DEFAULT_FIRST_AGENT_MESSAGE,
};
pub use recovery::{RecoveryEngine, RetryConfig};
pub use run_supervisor::RunSupervisor;
pub use scheduler::BatchScheduler;
pub use state::Phase;
