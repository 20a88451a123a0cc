//! 编排器：单次模拟运行的主控循环
//!
//! 在 AGENT_TURN / TOOL_EXECUTION / USER_TURN 之间切换，直到 DONE：
//! - Agent 发起工具调用 → 按声明顺序逐个分发到 Environment，结果全部交回 Agent
//! - Agent 回复文本 → 交给用户模拟器（solo 模式下直接结束）
//! - 用户发出结束标记 → 结束
//!
//! 每次 LLM 生成都有超时与有限次重试；整次运行受 CancellationToken 约束（墙钟超时 / Ctrl+C），
//! 被取消时以 timed_out 结束并保留已产生的轨迹。

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{Agent, AgentState};
use crate::core::{GenerationError, HarnessError, Phase, RecoveryAction, RecoveryEngine, RetryConfig};
use crate::data::{
    now_timestamp, AssistantMessage, Message, SimulationRun, Task, TerminationReason, ToolCall,
};
use crate::environment::{paired_tool_calls, Environment};
use crate::user::{UserSimulator, UserState};

pub const DEFAULT_FIRST_AGENT_MESSAGE: &str = "Hi! How can I help you today?";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 步数上限（每次 Agent / 工具 / 用户回合各计一步）
    pub max_steps: usize,
    /// 连续工具错误上限
    pub max_errors: usize,
    pub seed: Option<u64>,
    /// 单次 LLM 调用超时
    pub llm_timeout: Option<Duration>,
    pub retry: RetryConfig,
    pub solo_mode: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_errors: 10,
            seed: None,
            llm_timeout: Some(Duration::from_secs(60)),
            retry: RetryConfig::default(),
            solo_mode: false,
        }
    }
}

pub struct Orchestrator {
    domain: String,
    task: Task,
    agent: Box<dyn Agent>,
    user: Option<Box<dyn UserSimulator>>,
    environment: Environment,
    config: OrchestratorConfig,
    recovery: RecoveryEngine,
    cancel_token: CancellationToken,
    agent_state: AgentState,
    user_state: UserState,
    trajectory: Vec<Message>,
    /// 下一次 Agent 回合的输入（用户消息或本轮全部工具结果）
    incoming: Vec<Message>,
    phase: Phase,
    step_count: usize,
    consecutive_errors: usize,
    error: Option<String>,
}

impl Orchestrator {
    pub fn new(
        domain: &str,
        task: Task,
        agent: Box<dyn Agent>,
        user: Option<Box<dyn UserSimulator>>,
        environment: Environment,
        config: OrchestratorConfig,
    ) -> Self {
        let recovery = RecoveryEngine::new(config.retry.clone());
        Self {
            domain: domain.to_string(),
            task,
            agent,
            user,
            environment,
            config,
            recovery,
            cancel_token: CancellationToken::new(),
            agent_state: AgentState::default(),
            user_state: UserState::default(),
            trajectory: Vec::new(),
            incoming: Vec::new(),
            phase: Phase::AgentTurn,
            step_count: 0,
            consecutive_errors: 0,
            error: None,
        }
    }

    /// 外部取消（运行超时、批量中止）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trajectory(&self) -> &[Message] {
        &self.trajectory
    }

    /// 运行结束后的环境（最终数据库状态）
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// 执行完整模拟。协议违规与环境初始化失败返回 Err，其余结局都体现在 termination_reason 中。
    pub async fn run(&mut self) -> Result<SimulationRun, HarnessError> {
        let start_time = now_timestamp();
        let started = Instant::now();

        if let Some(seed) = self.config.seed {
            self.agent.set_seed(seed);
            if let Some(user) = self.user.as_mut() {
                user.set_seed(seed);
            }
        }
        self.initialize()?;

        let token = self.cancel_token.clone();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = self.run_loop() => Some(r),
        };
        let termination_reason = match result {
            Some(r) => r?,
            None => {
                tracing::warn!(task_id = %self.task.id, step = self.step_count, "Run cancelled");
                self.error = Some("run cancelled or timed out".to_string());
                TerminationReason::TimedOut
            }
        };
        self.phase = Phase::Done;

        let mut messages = self.trajectory.clone();
        for (idx, message) in messages.iter_mut().enumerate() {
            message.set_turn_idx(Some(idx));
        }

        tracing::info!(
            domain = %self.domain,
            task_id = %self.task.id,
            steps = self.step_count,
            termination = %termination_reason,
            "Simulation finished"
        );

        Ok(SimulationRun {
            id: Uuid::new_v4().to_string(),
            task_id: self.task.id.clone(),
            trial: None,
            seed: self.config.seed,
            start_time,
            end_time: now_timestamp(),
            duration: started.elapsed().as_secs_f64(),
            termination_reason,
            reward_info: None,
            error: self.error.clone(),
            messages,
        })
    }

    /// 设置环境初始状态、初始化双方状态，并由已有对话推出起始阶段
    fn initialize(&mut self) -> Result<(), HarnessError> {
        if !self.config.solo_mode && self.user.is_none() {
            return Err(HarnessError::Protocol(
                "conversational mode requires a user simulator".to_string(),
            ));
        }

        let history: Vec<Message> = self.task.message_history().to_vec();
        paired_tool_calls(&history)?;

        let (init_data, init_actions) = match &self.task.initial_state {
            Some(state) => (
                state.initialization_data.as_ref(),
                state.initialization_actions.as_slice(),
            ),
            None => (None, &[][..]),
        };
        self.environment.set_state(init_data, init_actions, &history)?;

        self.agent_state = self.agent.get_init_state(Some(&history))?;
        self.trajectory = history;

        let Some(last) = self.trajectory.last().cloned() else {
            if self.config.solo_mode {
                self.phase = Phase::AgentTurn;
            } else {
                let greeting = AssistantMessage::text(DEFAULT_FIRST_AGENT_MESSAGE);
                self.agent_state.messages.push(greeting.clone().into());
                self.trajectory.push(greeting.into());
                self.user_state = self.user_init_state(&[])?;
                self.phase = Phase::UserTurn;
            }
            return Ok(());
        };

        self.phase = if !unresolved_tool_calls(&self.trajectory).is_empty() {
            Phase::ToolExecution
        } else {
            Phase::after(&last, self.config.solo_mode)
        };
        if self.phase.is_done() {
            return Err(HarnessError::InvalidTask(format!(
                "{}: message history already ends the conversation",
                self.task.id
            )));
        }

        // 用户回合的输入是最后一条 Agent 消息，不预先放进用户状态
        let user_history = match self.phase {
            Phase::UserTurn => self.trajectory[..self.trajectory.len() - 1].to_vec(),
            _ => self.trajectory.clone(),
        };
        self.user_state = self.user_init_state(&user_history)?;
        Ok(())
    }

    fn user_init_state(&self, history: &[Message]) -> Result<UserState, HarnessError> {
        match self.user.as_ref() {
            Some(user) if !self.config.solo_mode => user.get_init_state(Some(history)),
            _ => Ok(UserState::default()),
        }
    }

    async fn run_loop(&mut self) -> Result<TerminationReason, HarnessError> {
        loop {
            tracing::debug!(task_id = %self.task.id, step = self.step_count, phase = %self.phase, "Step");
            let finished = match self.phase {
                Phase::AgentTurn => self.agent_turn().await?,
                Phase::ToolExecution => self.tool_execution()?,
                Phase::UserTurn => self.user_turn().await?,
                Phase::Done => {
                    return Err(HarnessError::Protocol(
                        "run loop entered DONE without a termination reason".to_string(),
                    ))
                }
            };
            self.step_count += 1;
            if let Some(reason) = finished {
                self.phase = Phase::Done;
                return Ok(reason);
            }

            // 未应答的工具调用必须先执行完，上限检查放到下一个回合边界
            if self.phase == Phase::ToolExecution {
                continue;
            }
            if self.consecutive_errors >= self.config.max_errors {
                return Ok(TerminationReason::TooManyErrors);
            }
            if self.step_count >= self.config.max_steps {
                return Ok(TerminationReason::MaxTurnsExceeded);
            }
        }
    }

    async fn agent_turn(&mut self) -> Result<Option<TerminationReason>, HarnessError> {
        let agent = self.agent.as_ref();
        let incoming = self.incoming.as_slice();
        let state = &self.agent_state;
        let generated = generate_with_retry(&self.recovery, self.config.llm_timeout, "agent", move || {
            agent.generate_next_message(incoming, state)
        })
        .await;

        let (message, state) = match generated {
            Ok(v) => v,
            Err(e) => return Ok(Some(self.infra_error(e))),
        };
        self.agent_state = state;
        self.incoming.clear();

        let stop = self.agent.is_stop(&message);
        let is_tool_call = message.is_tool_call();
        self.trajectory.push(message.into());

        if stop {
            return Ok(Some(TerminationReason::AgentStop));
        }
        if is_tool_call {
            self.phase = Phase::ToolExecution;
            return Ok(None);
        }
        if self.config.solo_mode {
            return Ok(Some(TerminationReason::AgentStop));
        }
        self.phase = Phase::UserTurn;
        Ok(None)
    }

    fn tool_execution(&mut self) -> Result<Option<TerminationReason>, HarnessError> {
        let calls = unresolved_tool_calls(&self.trajectory);
        if calls.is_empty() {
            return Err(HarnessError::Protocol(
                "TOOL_EXECUTION without pending tool calls".to_string(),
            ));
        }
        for call in &calls {
            let response = self.environment.get_response(call);
            if response.id != call.id {
                return Err(HarnessError::Protocol(format!(
                    "tool response id {} does not match call id {}",
                    response.id, call.id
                )));
            }
            if response.error {
                self.consecutive_errors += 1;
            } else {
                self.consecutive_errors = 0;
            }
            let message = Message::Tool(response);
            self.trajectory.push(message.clone());
            self.incoming.push(message);
        }
        self.phase = Phase::AgentTurn;
        Ok(None)
    }

    async fn user_turn(&mut self) -> Result<Option<TerminationReason>, HarnessError> {
        if !unresolved_tool_calls(&self.trajectory).is_empty() {
            return Err(HarnessError::Protocol(
                "user turn requested while tool calls are unresolved".to_string(),
            ));
        }
        let user = match (self.config.solo_mode, self.user.as_deref()) {
            (false, Some(user)) => user,
            _ => {
                return Err(HarnessError::Protocol(
                    "user turn requested without a user simulator".to_string(),
                ))
            }
        };
        let last = self
            .trajectory
            .last()
            .and_then(Message::as_assistant)
            .filter(|m| !m.is_tool_call())
            .cloned()
            .ok_or_else(|| {
                HarnessError::Protocol("user turn must follow an agent text message".to_string())
            })?;

        let incoming = &last;
        let state = &self.user_state;
        let generated = generate_with_retry(&self.recovery, self.config.llm_timeout, "user", move || {
            user.generate_next_message(incoming, state)
        })
        .await;

        let (message, state) = match generated {
            Ok(v) => v,
            Err(e) => return Ok(Some(self.infra_error(e))),
        };
        let stop = user.is_stop(&message);
        self.user_state = state;

        let message = Message::User(message);
        self.trajectory.push(message.clone());
        if stop {
            return Ok(Some(TerminationReason::UserStop));
        }
        self.incoming = vec![message];
        self.phase = Phase::AgentTurn;
        Ok(None)
    }

    fn infra_error(&mut self, err: GenerationError) -> TerminationReason {
        tracing::error!(task_id = %self.task.id, step = self.step_count, error = %err, "Generation failed");
        self.error = Some(err.to_string());
        TerminationReason::InfraError
    }
}

/// 最后一条 Assistant 消息中尚未被 ToolMessage 应答的调用（按声明顺序）
pub fn unresolved_tool_calls(trajectory: &[Message]) -> Vec<ToolCall> {
    let Some(pos) = trajectory
        .iter()
        .rposition(|m| matches!(m, Message::Assistant(_)))
    else {
        return Vec::new();
    };
    let answered: Vec<&str> = trajectory[pos + 1..]
        .iter()
        .filter_map(|m| match m {
            Message::Tool(t) => Some(t.id.as_str()),
            _ => None,
        })
        .collect();
    trajectory[pos]
        .as_assistant()
        .map(|m| {
            m.tool_calls
                .iter()
                .filter(|c| !answered.contains(&c.id.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// 带超时与重试的生成；不可重试或次数耗尽时返回最后一次错误
async fn generate_with_retry<T, F, Fut>(
    recovery: &RecoveryEngine,
    limit: Option<Duration>,
    role: &str,
    mut generate: F,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut attempt = 0;
    loop {
        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, generate())
                .await
                .unwrap_or(Err(GenerationError::Timeout(limit))),
            None => generate().await,
        };
        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        match recovery.handle(&err, attempt) {
            RecoveryAction::Retry { delay } => {
                tracing::warn!(role, attempt, error = %err, "Generation failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            RecoveryAction::Abort => return Err(err),
        }
    }
}
