//! 端到端模拟测试：脚本化 LLM + mock 领域，覆盖编排、工具分发与评分
//!
//! 运行: cargo test --test simulation_test

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tau_harness::agent::LlmAgent;
use tau_harness::core::{HarnessError, Orchestrator, OrchestratorConfig, RetryConfig};
use tau_harness::data::{
    AssistantMessage, Message, RunOutcome, SimulationRun, Task, TerminationReason, ToolCall,
};
use tau_harness::evaluator::{evaluate_simulation, EvaluationType};
use tau_harness::llm::{LlmClient, LlmError, LlmRequest, LlmResponse, ScriptedLlmClient};
use tau_harness::registry::Registry;
use tau_harness::runner::{ClientFactory, RunConfig, Runner};
use tau_harness::user::LlmUserSimulator;

/// 每次调用都返回同一对脚本化客户端，便于事后检查请求
struct FixedFactory {
    agent: Arc<ScriptedLlmClient>,
    user: Arc<ScriptedLlmClient>,
}

impl ClientFactory for FixedFactory {
    fn agent_client(&self, _model: &str) -> Result<Arc<dyn LlmClient>, HarnessError> {
        Ok(self.agent.clone())
    }

    fn user_client(&self, _model: &str) -> Result<Arc<dyn LlmClient>, HarnessError> {
        Ok(self.user.clone())
    }
}

fn registry() -> Arc<Registry> {
    Arc::new(Registry::with_builtin_domains())
}

fn task(id: &str) -> Task {
    registry()
        .get_tasks("mock", Some(&[id.to_string()][..]))
        .unwrap()
        .remove(0)
}

fn fast_config() -> RunConfig {
    RunConfig {
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
        },
        ..RunConfig::default()
    }
}

async fn run_with(
    config: &RunConfig,
    task_id: &str,
    agent: ScriptedLlmClient,
    user: ScriptedLlmClient,
) -> (SimulationRun, Arc<ScriptedLlmClient>, Arc<ScriptedLlmClient>) {
    let agent = Arc::new(agent);
    let user = Arc::new(user);
    let runner = Runner::new(
        registry(),
        Arc::new(FixedFactory {
            agent: Arc::clone(&agent),
            user: Arc::clone(&user),
        }),
    );
    let sim = runner.run_task(config, &task(task_id), Some(7)).await.unwrap();
    (sim, agent, user)
}

fn tool_messages(sim: &SimulationRun) -> Vec<&tau_harness::data::ToolMessage> {
    sim.messages
        .iter()
        .filter_map(|m| match m {
            Message::Tool(t) => Some(t),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_create_task_passes() {
    let agent = ScriptedLlmClient::new("agent")
        .with_tool_call(
            "create_task",
            json!({"user_id": "user_1", "title": "Important Meeting"}),
        )
        .with_text("Your task 'Important Meeting' has been created.");
    let user = ScriptedLlmClient::new("user")
        .with_text("Hello can you help me create a task?")
        .with_text("Thanks! ###STOP###");

    let (sim, _, _) = run_with(&fast_config(), "create_task_1", agent, user).await;

    assert_eq!(sim.termination_reason, TerminationReason::UserStop);
    assert_eq!(sim.outcome(), RunOutcome::Passed);
    assert_eq!(sim.reward(), 1.0);
    let tools = tool_messages(&sim);
    assert_eq!(tools.len(), 1);
    assert!(!tools[0].error);
    assert!(tools[0].content.contains("Important Meeting"));
    // 开场白 + 用户 + 工具调用 + 工具结果 + Agent 文本 + 用户结束
    assert_eq!(sim.messages.len(), 6);
    assert_eq!(sim.messages[0].content(), Some("Hi! How can I help you today?"));
}

#[tokio::test]
async fn test_update_nonexistent_task_fails_and_leaves_db_untouched() {
    let task = task("update_task_status_1");
    let registry = registry();
    let env = registry.get_environment("mock", false).unwrap();
    let initial_hash = env.db_hash().unwrap();

    let agent_client: Arc<dyn LlmClient> = Arc::new(
        ScriptedLlmClient::new("agent")
            .with_tool_call(
                "update_task_status",
                json!({"task_id": "nonexistent", "status": "completed"}),
            )
            .with_text("Sorry, I could not find that task."),
    );
    let user_client: Arc<dyn LlmClient> = Arc::new(
        ScriptedLlmClient::new("user")
            .with_text("Please mark my task as completed.")
            .with_text("Ok. ###STOP###"),
    );
    let agent = LlmAgent::new(agent_client, env.agent_tool_schemas(), env.policy());
    let user = LlmUserSimulator::new(user_client, &task.user_scenario);

    let mut orchestrator = Orchestrator::new(
        "mock",
        task.clone(),
        Box::new(agent),
        Some(Box::new(user)),
        env,
        OrchestratorConfig::default(),
    );
    let sim = orchestrator.run().await.unwrap();

    assert_eq!(sim.termination_reason, TerminationReason::UserStop);
    let tools = tool_messages(&sim);
    assert_eq!(tools.len(), 1);
    assert!(tools[0].error);
    assert_eq!(orchestrator.environment().db_hash().unwrap(), initial_hash);

    let env_constructor = registry.env_constructor("mock").unwrap();
    let reward = evaluate_simulation(
        &sim,
        &task,
        EvaluationType::All,
        false,
        env_constructor.as_ref(),
    )
    .unwrap();
    assert_eq!(reward.reward, 0.0);
    assert!(reward.db_check.as_ref().is_some_and(|c| !c.db_match));
}

#[tokio::test]
async fn test_max_turns_exceeded() {
    let config = RunConfig {
        max_steps: 6,
        ..fast_config()
    };
    let agent = ScriptedLlmClient::new("agent").with_fallback(LlmResponse::tool_calls(vec![
        ToolCall::new("loop", "get_users", json!({})),
    ]));
    let user = ScriptedLlmClient::new("user").with_text("List all users please.");

    let (sim, _, _) = run_with(&config, "get_users_communicate_1", agent, user).await;

    assert_eq!(sim.termination_reason, TerminationReason::MaxTurnsExceeded);
    assert_eq!(sim.outcome(), RunOutcome::MaxTurnsExceeded);
    assert_eq!(sim.reward(), 0.0);
    assert!(!sim.messages.is_empty());
}

#[tokio::test]
async fn test_consecutive_tool_errors_end_run() {
    let config = RunConfig {
        max_errors: 3,
        ..fast_config()
    };
    // 两次失败后一次成功，计数归零；之后连续三次失败才结束
    let agent = ScriptedLlmClient::new("agent")
        .with_tool_call("no_such_tool", json!({}))
        .with_tool_call("no_such_tool", json!({}))
        .with_tool_call("get_users", json!({}))
        .with_fallback(LlmResponse::tool_calls(vec![ToolCall::new(
            "again",
            "no_such_tool",
            json!({}),
        )]));
    let user = ScriptedLlmClient::new("user").with_text("Who is user_1?");

    let (sim, agent, user) = run_with(&config, "get_users_communicate_1", agent, user).await;

    assert_eq!(sim.termination_reason, TerminationReason::TooManyErrors);
    assert_eq!(sim.outcome(), RunOutcome::Failed);
    assert_eq!(sim.reward(), 0.0);
    assert_eq!(agent.call_count(), 6);
    assert_eq!(user.call_count(), 1);
    let errors: Vec<bool> = tool_messages(&sim).iter().map(|t| t.error).collect();
    assert_eq!(errors, vec![true, true, false, true, true, true]);
}

#[tokio::test]
async fn test_solo_mode_issues_only_agent_turns() {
    let config = RunConfig {
        solo_mode: true,
        ..fast_config()
    };
    let agent = ScriptedLlmClient::new("agent")
        .with_tool_call(
            "create_task",
            json!({"user_id": "user_1", "title": "Important Meeting"}),
        )
        .with_tool_call("done", json!({}));
    let user = ScriptedLlmClient::new("user").with_text("should never be asked");

    let (sim, agent, user) = run_with(&config, "create_task_1", agent, user).await;

    assert_eq!(sim.termination_reason, TerminationReason::AgentStop);
    assert_eq!(user.call_count(), 0);
    assert_eq!(agent.call_count(), 2);
    assert!(sim.messages.iter().all(|m| !matches!(m, Message::User(_))));
    assert_eq!(sim.reward(), 1.0);
}

#[tokio::test]
async fn test_tool_results_follow_calls_in_order() {
    let agent = ScriptedLlmClient::new("agent")
        .with_response(LlmResponse::tool_calls(vec![
            ToolCall::new("first", "get_users", json!({})),
            ToolCall::new("second", "no_such_tool", json!({})),
            ToolCall::new("third", "get_users", json!({})),
        ]))
        .with_text("The user is Test User.");
    let user = ScriptedLlmClient::new("user")
        .with_text("What is the name of user_1?")
        .with_text("Great ###STOP###");

    let (sim, agent, _) = run_with(&fast_config(), "get_users_communicate_1", agent, user).await;

    let call_idx = sim
        .messages
        .iter()
        .position(|m| m.as_assistant().is_some_and(AssistantMessage::is_tool_call))
        .unwrap();
    let ids: Vec<_> = sim.messages[call_idx + 1..call_idx + 4]
        .iter()
        .map(|m| match m {
            Message::Tool(t) => (t.id.as_str(), t.error),
            other => panic!("expected tool message, got {}", other.role()),
        })
        .collect();
    assert_eq!(ids, vec![("first", false), ("second", true), ("third", false)]);

    // 三个结果在同一次 Agent 请求中交回
    let requests = agent.requests();
    let tool_results = requests[1]
        .messages
        .iter()
        .filter(|m| matches!(m, Message::Tool(_)))
        .count();
    assert_eq!(tool_results, 3);
    assert_eq!(sim.reward(), 1.0);
}

#[tokio::test]
async fn test_evaluation_is_deterministic() {
    let agent = ScriptedLlmClient::new("agent")
        .with_tool_call(
            "create_task",
            json!({"user_id": "user_1", "title": "Important Meeting"}),
        )
        .with_text("Done.");
    let user = ScriptedLlmClient::new("user")
        .with_text("Create 'Important Meeting' for user_1.")
        .with_text("###STOP###");
    let (sim, _, _) = run_with(&fast_config(), "create_task_1", agent, user).await;

    let task = task("create_task_1");
    let env_constructor = registry().env_constructor("mock").unwrap();
    let first =
        evaluate_simulation(&sim, &task, EvaluationType::All, false, env_constructor.as_ref())
            .unwrap();
    let second =
        evaluate_simulation(&sim, &task, EvaluationType::All, false, env_constructor.as_ref())
            .unwrap();
    assert_eq!(first, second);
    assert_eq!(Some(first), sim.reward_info);
}

#[tokio::test]
async fn test_resume_from_message_history() {
    let agent = ScriptedLlmClient::new("agent")
        .with_tool_call(
            "update_task_status",
            json!({"task_id": "task_2", "status": "completed"}),
        )
        .with_text("task_2 is now completed.");
    let user = ScriptedLlmClient::new("user")
        .with_text("Please mark task_2 as completed.")
        .with_text("Thanks ###STOP###");

    let (sim, agent, _) = run_with(&fast_config(), "resume_from_history_1", agent, user).await;

    let history = task("resume_from_history_1").message_history().len();
    assert_eq!(history, 5);
    assert!(matches!(sim.messages[history], Message::User(_)));
    // Agent 看到了已有对话
    let requests = agent.requests();
    assert!(requests[0]
        .messages
        .iter()
        .any(|m| m.content() == Some("Ok, I've created the task for you. The task ID is task_2.")));
    assert_eq!(sim.termination_reason, TerminationReason::UserStop);
    assert_eq!(sim.reward(), 1.0);
}

#[tokio::test]
async fn test_transient_llm_error_is_retried() {
    let agent = ScriptedLlmClient::new("agent")
        .with_error(LlmError::Server("503 Service Unavailable".into()))
        .with_tool_call(
            "create_task",
            json!({"user_id": "user_1", "title": "Important Meeting"}),
        )
        .with_text("Created.");
    let user = ScriptedLlmClient::new("user")
        .with_text("Create 'Important Meeting' for user_1.")
        .with_text("###STOP###");

    let (sim, agent, _) = run_with(&fast_config(), "create_task_1", agent, user).await;

    assert_eq!(agent.call_count(), 3);
    assert_eq!(sim.outcome(), RunOutcome::Passed);
}

#[tokio::test]
async fn test_fatal_llm_error_is_infra_error() {
    let agent = ScriptedLlmClient::new("agent").with_error(LlmError::Auth("invalid key".into()));
    let user = ScriptedLlmClient::new("user").with_text("Hello");

    let (sim, agent, _) = run_with(&fast_config(), "create_task_1", agent, user).await;

    assert_eq!(agent.call_count(), 1);
    assert_eq!(sim.termination_reason, TerminationReason::InfraError);
    assert_eq!(sim.outcome(), RunOutcome::InfraError);
    assert!(sim.error.is_some());
    assert_eq!(sim.reward(), 0.0);
}

/// 永不返回的模型
struct HangingClient;

#[async_trait]
impl LlmClient for HangingClient {
    fn model(&self) -> &str {
        "hanging"
    }

    async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_cancelled_run_keeps_partial_trajectory() {
    let task = task("create_task_1");
    let env = registry().get_environment("mock", false).unwrap();
    let user_client: Arc<dyn LlmClient> =
        Arc::new(ScriptedLlmClient::new("user").with_text("Hello can you help me create a task?"));
    let agent = LlmAgent::new(Arc::new(HangingClient), env.agent_tool_schemas(), env.policy());
    let user = LlmUserSimulator::new(user_client, &task.user_scenario);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let config = OrchestratorConfig {
        llm_timeout: None,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = Orchestrator::new(
        "mock",
        task,
        Box::new(agent),
        Some(Box::new(user)),
        env,
        config,
    )
    .with_cancel_token(token);
    let sim = orchestrator.run().await.unwrap();

    assert_eq!(sim.termination_reason, TerminationReason::TimedOut);
    assert_eq!(sim.outcome(), RunOutcome::TimedOut);
    // 开场白与用户第一句保留
    assert_eq!(sim.messages.len(), 2);
}

#[tokio::test]
async fn test_run_timeout_from_config() {
    struct HangingFactory;

    impl ClientFactory for HangingFactory {
        fn agent_client(&self, _model: &str) -> Result<Arc<dyn LlmClient>, HarnessError> {
            Ok(Arc::new(HangingClient))
        }

        fn user_client(&self, _model: &str) -> Result<Arc<dyn LlmClient>, HarnessError> {
            Ok(Arc::new(
                ScriptedLlmClient::new("user").with_fallback(LlmResponse::text("Hello")),
            ))
        }
    }

    let config = RunConfig {
        run_timeout_secs: Some(1),
        llm_timeout_secs: None,
        ..fast_config()
    };
    let runner = Runner::new(registry(), Arc::new(HangingFactory));
    let sim = runner
        .run_task(&config, &task("create_task_1"), None)
        .await
        .unwrap();
    assert_eq!(sim.termination_reason, TerminationReason::TimedOut);
    assert_eq!(sim.reward(), 0.0);
}

#[test]
fn test_agent_name_follows_mode() {
    let config = RunConfig::default();
    assert_eq!(config.agent_name(), "llm_agent");
    let solo = RunConfig {
        solo_mode: true,
        ..config
    };
    assert_eq!(solo.agent_name(), "llm_solo_agent");
}
