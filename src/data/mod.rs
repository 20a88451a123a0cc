//! 数据模型：消息、任务、模拟结果

pub mod message;
pub mod simulation;
pub mod task;

pub use message::{
    collect_tool_calls, now_timestamp, AssistantMessage, Message, SystemMessage, TokenUsage,
    ToolCall, ToolMessage, UserMessage,
};
pub use simulation::{
    ActionCheck, CommunicateCheck, DbCheck, EnvAssertionCheck, Results, RewardInfo, RunInfo,
    RunOutcome, SimulationRun, TerminationReason,
};
pub use task::{
    load_tasks, parse_tasks, Action, Description, EnvAssertion, EnvFunctionCall,
    EvaluationCriteria, InitialState, RewardType, StructuredUserInstructions, Task,
    UserInstructions, UserScenario,
};
