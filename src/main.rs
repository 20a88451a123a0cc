//! tau - 对话智能体评测 CLI
//!
//! 子命令：
//! - `run`：在某个领域上批量模拟并评分
//! - `tasks`：列出领域任务
//! - `evaluate`：对已保存的结果重新评分

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tau_harness::config::load_config;
use tau_harness::core::RunSupervisor;
use tau_harness::data::Results;
use tau_harness::evaluator::{evaluate_simulation, EvaluationType};
use tau_harness::observability;
use tau_harness::registry::Registry;
use tau_harness::runner::Runner;

#[derive(Parser, Debug)]
#[command(name = "tau", version, about = "Conversational agent evaluation harness")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true, env = "TAU_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 运行模拟并评分
    Run(RunArgs),
    /// 列出领域任务
    Tasks {
        #[arg(long)]
        domain: Option<String>,
    },
    /// 对结果文件重新评分
    Evaluate {
        /// 结果文件（JSON）
        path: PathBuf,
        #[arg(long, default_value = "all")]
        evaluation_type: EvaluationType,
        /// 写回新的评分
        #[arg(long)]
        write: bool,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long)]
    domain: Option<String>,
    /// 只运行这些任务（可重复）
    #[arg(long = "task-id")]
    task_ids: Vec<String>,
    #[arg(long)]
    num_tasks: Option<usize>,
    #[arg(long)]
    agent_llm: Option<String>,
    #[arg(long)]
    user_llm: Option<String>,
    #[arg(long)]
    num_trials: Option<usize>,
    #[arg(long)]
    max_steps: Option<usize>,
    #[arg(long)]
    max_errors: Option<usize>,
    #[arg(long)]
    max_concurrency: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    solo: bool,
    #[arg(long)]
    evaluation_type: Option<EvaluationType>,
    /// 单次运行超时（秒）
    #[arg(long)]
    run_timeout: Option<u64>,
    /// 结果文件，默认写入 results_dir 下的时间戳文件
    #[arg(long)]
    save_to: Option<PathBuf>,
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    let registry = Arc::new(Registry::with_builtin_domains());

    match cli.command {
        Command::Tasks { domain } => {
            let domain = domain.unwrap_or_else(|| cfg.run.domain.clone());
            let tasks = registry
                .get_tasks(&domain, None)
                .with_context(|| format!("Failed to load tasks for {domain}"))?;
            for task in tasks {
                let purpose = task
                    .description
                    .as_ref()
                    .and_then(|d| d.purpose.clone())
                    .unwrap_or_default();
                println!("{}\t{}", task.id, purpose);
            }
        }
        Command::Run(args) => {
            let mut run = cfg.run_config();
            if let Some(domain) = args.domain {
                run.domain = domain;
            }
            if !args.task_ids.is_empty() {
                run.task_ids = Some(args.task_ids);
            }
            run.num_tasks = args.num_tasks;
            if let Some(model) = args.agent_llm {
                run.llm_agent = model;
            }
            if let Some(model) = args.user_llm {
                run.llm_user = model;
            }
            if let Some(n) = args.num_trials {
                run.num_trials = n;
            }
            if let Some(n) = args.max_steps {
                run.max_steps = n;
            }
            if let Some(n) = args.max_errors {
                run.max_errors = n;
            }
            if let Some(n) = args.max_concurrency {
                run.max_concurrency = n;
            }
            if args.seed.is_some() {
                run.seed = args.seed;
            }
            run.solo_mode |= args.solo;
            if let Some(t) = args.evaluation_type {
                run.evaluation_type = t;
            }
            if args.run_timeout.is_some() {
                run.run_timeout_secs = args.run_timeout;
            }
            run.resume = args.resume;
            run.save_to = Some(args.save_to.unwrap_or_else(|| {
                let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
                cfg.app
                    .results_dir
                    .join(format!("{stamp}_{}_{}.json", run.domain, run.agent_name()))
            }));

            let supervisor = RunSupervisor::default();
            let runner = Runner::new(registry, Arc::new(cfg.client_factory()))
                .with_supervisor(supervisor.clone());

            let ctrl_c = supervisor.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling running simulations");
                    ctrl_c.cancel();
                }
            });

            let results = runner.run_domain(&run).await.context("Run failed")?;
            if let Some(path) = &run.save_to {
                println!("Saved {} simulations to {}", results.simulations.len(), path.display());
            }
            println!("Average reward: {:.3}", results.average_reward());
        }
        Command::Evaluate {
            path,
            evaluation_type,
            write,
        } => {
            let mut results = Results::load(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let env_constructor = registry.env_constructor(&results.info.domain)?;
            let solo_mode = results.info.solo_mode;
            let tasks = results.tasks.clone();
            for sim in results.simulations.iter_mut() {
                let task = tasks
                    .iter()
                    .find(|t| t.id == sim.task_id)
                    .with_context(|| format!("Task {} missing from results", sim.task_id))?;
                let reward =
                    evaluate_simulation(sim, task, evaluation_type, solo_mode, env_constructor.as_ref())?;
                println!("{}\t{}\t{:.3}", sim.task_id, sim.termination_reason, reward.reward);
                sim.reward_info = Some(reward);
            }
            println!("Average reward: {:.3}", results.average_reward());
            if write {
                results.save(&path)?;
            }
        }
    }

    Ok(())
}
