//! 批量运行：单任务运行 + 评估、基础设施错误重试、有界并发、结果落盘与续跑
//!
//! 每次运行拥有独立的 Environment 与 Agent/User 状态，运行之间不共享可变状态；
//! 只有结果集合由 Mutex 保护，每完成一次运行追加并保存一次。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::agent::{Agent, LlmAgent, LlmSoloAgent};
use crate::core::{
    BatchScheduler, HarnessError, Orchestrator, OrchestratorConfig, RetryConfig, RunSupervisor,
};
use crate::data::{Results, RunInfo, SimulationRun, Task, TerminationReason};
use crate::evaluator::{evaluate_simulation, EvaluationType};
use crate::llm::{LlmClient, OpenAiClient};
use crate::registry::Registry;
use crate::user::{LlmUserSimulator, UserSimulator};

pub const DEFAULT_SEED: u64 = 300;

/// 一次批量运行的完整配置（也是 HTTP /run_domain 的请求体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub domain: String,
    pub task_ids: Option<Vec<String>>,
    pub num_tasks: Option<usize>,
    pub llm_agent: String,
    pub llm_user: String,
    pub num_trials: usize,
    pub max_steps: usize,
    pub max_errors: usize,
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    pub solo_mode: bool,
    pub evaluation_type: EvaluationType,
    pub run_timeout_secs: Option<u64>,
    pub llm_timeout_secs: Option<u64>,
    pub max_infra_retries: usize,
    pub retry: RetryConfig,
    pub save_to: Option<PathBuf>,
    pub resume: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            domain: "mock".to_string(),
            task_ids: None,
            num_tasks: None,
            llm_agent: "gpt-4o-mini".to_string(),
            llm_user: "gpt-4o-mini".to_string(),
            num_trials: 1,
            max_steps: 50,
            max_errors: 10,
            max_concurrency: 3,
            seed: Some(DEFAULT_SEED),
            solo_mode: false,
            evaluation_type: EvaluationType::All,
            run_timeout_secs: None,
            llm_timeout_secs: Some(60),
            max_infra_retries: 2,
            retry: RetryConfig::default(),
            save_to: None,
            resume: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.max_steps == 0 {
            return Err(HarnessError::Config("max_steps must be greater than 0".into()));
        }
        if self.max_errors == 0 {
            return Err(HarnessError::Config("max_errors must be greater than 0".into()));
        }
        if self.num_trials == 0 {
            return Err(HarnessError::Config("num_trials must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn agent_name(&self) -> &'static str {
        if self.solo_mode {
            "llm_solo_agent"
        } else {
            "llm_agent"
        }
    }

    fn run_info(&self) -> RunInfo {
        RunInfo {
            domain: self.domain.clone(),
            agent: self.agent_name().to_string(),
            llm_agent: self.llm_agent.clone(),
            llm_user: self.llm_user.clone(),
            num_trials: self.num_trials,
            max_steps: self.max_steps,
            max_errors: self.max_errors,
            seed: self.seed,
            solo_mode: self.solo_mode,
        }
    }

    fn orchestrator_config(&self, seed: Option<u64>) -> OrchestratorConfig {
        OrchestratorConfig {
            max_steps: self.max_steps,
            max_errors: self.max_errors,
            seed,
            llm_timeout: self.llm_timeout_secs.map(Duration::from_secs),
            retry: self.retry.clone(),
            solo_mode: self.solo_mode,
        }
    }

    /// 每个 trial 的种子：由运行种子确定性派生；未设置种子时不固定
    pub fn trial_seeds(&self) -> Vec<Option<u64>> {
        match self.seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..self.num_trials)
                    .map(|_| Some(rng.gen_range(0..1_000_000)))
                    .collect()
            }
            None => vec![None; self.num_trials],
        }
    }
}

/// 按模型名创建 Agent / User 使用的 LLM 客户端
pub trait ClientFactory: Send + Sync {
    fn agent_client(&self, model: &str) -> Result<Arc<dyn LlmClient>, HarnessError>;
    fn user_client(&self, model: &str) -> Result<Arc<dyn LlmClient>, HarnessError>;
}

/// OpenAI 兼容端点
#[derive(Debug, Clone, Default)]
pub struct OpenAiClientFactory {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub agent_temperature: Option<f32>,
    pub user_temperature: Option<f32>,
}

impl OpenAiClientFactory {
    fn build(&self, model: &str, temperature: Option<f32>) -> Arc<dyn LlmClient> {
        let client = OpenAiClient::new(self.base_url.as_deref(), model, self.api_key.as_deref());
        match temperature {
            Some(t) => Arc::new(client.with_temperature(t)),
            None => Arc::new(client),
        }
    }
}

impl ClientFactory for OpenAiClientFactory {
    fn agent_client(&self, model: &str) -> Result<Arc<dyn LlmClient>, HarnessError> {
        Ok(self.build(model, self.agent_temperature))
    }

    fn user_client(&self, model: &str) -> Result<Arc<dyn LlmClient>, HarnessError> {
        Ok(self.build(model, self.user_temperature))
    }
}

#[derive(Clone)]
pub struct Runner {
    registry: Arc<Registry>,
    factory: Arc<dyn ClientFactory>,
    supervisor: RunSupervisor,
}

impl Runner {
    pub fn new(registry: Arc<Registry>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            registry,
            factory,
            supervisor: RunSupervisor::default(),
        }
    }

    pub fn with_supervisor(mut self, supervisor: RunSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn supervisor(&self) -> &RunSupervisor {
        &self.supervisor
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 运行单个任务一次并评估
    pub async fn run_task(
        &self,
        config: &RunConfig,
        task: &Task,
        seed: Option<u64>,
    ) -> Result<SimulationRun, HarnessError> {
        config.validate()?;
        tracing::info!(domain = %config.domain, task_id = %task.id, agent = config.agent_name(), "Starting simulation");

        let environment = self.registry.get_environment(&config.domain, config.solo_mode)?;
        let tools = environment.agent_tool_schemas();
        let agent_client = self.factory.agent_client(&config.llm_agent)?;

        let agent: Box<dyn Agent> = if config.solo_mode {
            Box::new(LlmSoloAgent::new(agent_client, tools, environment.policy(), task)?)
        } else {
            Box::new(LlmAgent::new(agent_client, tools, environment.policy()))
        };
        let user: Option<Box<dyn UserSimulator>> = if config.solo_mode {
            None
        } else {
            let client = self.factory.user_client(&config.llm_user)?;
            Some(Box::new(LlmUserSimulator::new(client, &task.user_scenario)))
        };

        let token = match config.run_timeout_secs {
            Some(secs) => self
                .supervisor
                .run_token_with_timeout(Some(Duration::from_secs(secs))),
            None => self.supervisor.run_token(),
        };
        let _guard = token.clone().drop_guard();
        let mut orchestrator = Orchestrator::new(
            &config.domain,
            task.clone(),
            agent,
            user,
            environment,
            config.orchestrator_config(seed),
        )
        .with_cancel_token(token);
        let mut simulation = orchestrator.run().await?;

        let env_constructor = self.registry.env_constructor(&config.domain)?;
        let reward_info = evaluate_simulation(
            &simulation,
            task,
            config.evaluation_type,
            config.solo_mode,
            env_constructor.as_ref(),
        )?;
        tracing::info!(
            task_id = %task.id,
            termination = %simulation.termination_reason,
            reward = reward_info.reward,
            "Finished simulation"
        );
        simulation.reward_info = Some(reward_info);
        Ok(simulation)
    }

    /// 基础设施错误按 max_infra_retries 重跑，最后一次的结果原样返回
    pub async fn run_task_with_retries(
        &self,
        config: &RunConfig,
        task: &Task,
        trial: usize,
        seed: Option<u64>,
    ) -> Result<SimulationRun, HarnessError> {
        let mut attempt = 0;
        loop {
            let mut simulation = self.run_task(config, task, seed).await?;
            simulation.trial = Some(trial);
            let retry = simulation.termination_reason == TerminationReason::InfraError
                && attempt < config.max_infra_retries
                && !self.supervisor.is_cancelled();
            if !retry {
                return Ok(simulation);
            }
            attempt += 1;
            tracing::warn!(
                task_id = %task.id,
                trial,
                attempt,
                error = simulation.error.as_deref().unwrap_or(""),
                "Infrastructure error, rerunning"
            );
        }
    }

    /// 运行 tasks × num_trials；save_to 设置时每完成一次运行即保存
    pub async fn run_tasks(
        &self,
        config: &RunConfig,
        tasks: Vec<Task>,
    ) -> Result<Results, HarnessError> {
        config.validate()?;
        let seeds = config.trial_seeds();
        let (results, done) = self.open_results(config, &tasks)?;
        let results = Arc::new(Mutex::new(results));
        let scheduler = BatchScheduler::new(config.max_concurrency);
        let shared_config = Arc::new(config.clone());

        let mut set = JoinSet::new();
        for (trial, seed) in seeds.iter().copied().enumerate() {
            for task in &tasks {
                if done.contains(&(trial, task.id.clone(), seed)) {
                    tracing::info!(task_id = %task.id, trial, "Already done, skipping");
                    continue;
                }
                let runner = self.clone();
                let config = Arc::clone(&shared_config);
                let results = Arc::clone(&results);
                let scheduler = scheduler.clone();
                let task = task.clone();
                set.spawn(async move {
                    let _permit = scheduler.acquire().await?;
                    let simulation = runner
                        .run_task_with_retries(&config, &task, trial, seed)
                        .await?;
                    let mut results = results.lock().await;
                    results.simulations.push(simulation);
                    if let Some(path) = &config.save_to {
                        results.save(path)?;
                    }
                    Ok::<(), HarnessError>(())
                });
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Run failed, aborting batch");
                    set.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    set.abort_all();
                    return Err(HarnessError::Protocol(format!("simulation task panicked: {e}")));
                }
            }
        }

        let mut results = results.lock().await.clone();
        let order = |id: &str| tasks.iter().position(|t| t.id == id).unwrap_or(usize::MAX);
        results
            .simulations
            .sort_by_key(|s| (s.trial.unwrap_or(0), order(s.task_id.as_str())));
        if let Some(path) = &config.save_to {
            results.save(path)?;
        }
        log_summary(&results);
        Ok(results)
    }

    /// 新建结果集，或在 resume 时加载已有文件并返回已完成的 (trial, task_id, seed)
    fn open_results(
        &self,
        config: &RunConfig,
        tasks: &[Task],
    ) -> Result<(Results, HashSet<(usize, String, Option<u64>)>), HarnessError> {
        let info = config.run_info();
        let existing = match &config.save_to {
            Some(path) if path.exists() => {
                if !config.resume {
                    return Err(HarnessError::Config(format!(
                        "{} already exists; enable resume or choose another path",
                        path.display()
                    )));
                }
                Some(Results::load(path)?)
            }
            _ => None,
        };

        let Some(results) = existing else {
            let results = Results::new(info, tasks.to_vec());
            if let Some(path) = &config.save_to {
                tracing::info!(path = %path.display(), "Saving simulation batch");
                results.save(path)?;
            }
            return Ok((results, HashSet::new()));
        };

        if results.info != info {
            return Err(HarnessError::Config(
                "run configuration differs from the saved results".to_string(),
            ));
        }
        let done = results
            .simulations
            .iter()
            .filter_map(|s| s.trial.map(|trial| (trial, s.task_id.clone(), s.seed)))
            .collect();
        tracing::info!(done = results.simulations.len(), "Resuming simulation batch");
        Ok((results, done))
    }

    /// 按配置选取领域任务并批量运行
    pub async fn run_domain(&self, config: &RunConfig) -> Result<Results, HarnessError> {
        let mut tasks = self
            .registry
            .get_tasks(&config.domain, config.task_ids.as_deref())?;
        if config.solo_mode {
            tasks.retain(|task| match LlmSoloAgent::check_valid_task(task) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Skipping task in solo mode");
                    false
                }
            });
        }
        if let Some(n) = config.num_tasks {
            tasks.truncate(n);
        }
        if tasks.is_empty() {
            return Err(HarnessError::Config(format!(
                "no runnable tasks in domain {}",
                config.domain
            )));
        }
        self.run_tasks(config, tasks).await
    }
}

fn log_summary(results: &Results) {
    let counts = results.outcome_counts();
    let summary = counts
        .iter()
        .map(|(outcome, n)| format!("{outcome}={n}"))
        .collect::<Vec<_>>()
        .join(", ");
    tracing::info!(
        simulations = results.simulations.len(),
        average_reward = results.average_reward(),
        outcomes = %summary,
        "Batch finished"
    );
}
