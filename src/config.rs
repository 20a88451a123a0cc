//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TAU__*` 覆盖（双下划线表示嵌套，如 `TAU__RUN__MAX_STEPS=40`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RetryConfig;
use crate::evaluator::EvaluationType;
use crate::runner::{OpenAiClientFactory, RunConfig, DEFAULT_SEED};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub run: RunSection,
    pub retry: RetryConfig,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 结果文件目录
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            results_dir: default_results_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "tau".to_string()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("data/simulations")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [llm] 段：OpenAI 兼容端点与两侧模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub agent: ModelSection,
    #[serde(default)]
    pub user: ModelSection,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
            agent: ModelSection::default(),
            user: ModelSection::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [llm.agent] / [llm.user]
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [run] 段：批量运行默认值（CLI 参数可覆盖）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub domain: String,
    pub num_trials: usize,
    pub max_steps: usize,
    /// 连续工具错误上限
    pub max_errors: usize,
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    pub solo_mode: bool,
    pub evaluation_type: EvaluationType,
    /// 单次运行墙钟超时（秒），不设则不限
    pub run_timeout_secs: Option<u64>,
    pub max_infra_retries: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            domain: "mock".to_string(),
            num_trials: 1,
            max_steps: 50,
            max_errors: 10,
            max_concurrency: 3,
            seed: Some(DEFAULT_SEED),
            solo_mode: false,
            evaluation_type: EvaluationType::All,
            run_timeout_secs: None,
            max_infra_retries: 2,
        }
    }
}

impl AppConfig {
    /// 由配置得到批量运行参数
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            domain: self.run.domain.clone(),
            task_ids: None,
            num_tasks: None,
            llm_agent: self.llm.agent.model.clone(),
            llm_user: self.llm.user.model.clone(),
            num_trials: self.run.num_trials,
            max_steps: self.run.max_steps,
            max_errors: self.run.max_errors,
            max_concurrency: self.run.max_concurrency,
            seed: self.run.seed,
            solo_mode: self.run.solo_mode,
            evaluation_type: self.run.evaluation_type,
            run_timeout_secs: self.run.run_timeout_secs,
            llm_timeout_secs: Some(self.llm.request_timeout_secs),
            max_infra_retries: self.run.max_infra_retries,
            retry: self.retry.clone(),
            save_to: None,
            resume: false,
        }
    }

    pub fn client_factory(&self) -> OpenAiClientFactory {
        OpenAiClientFactory {
            base_url: self.llm.base_url.clone(),
            api_key: std::env::var(&self.llm.api_key_env).ok(),
            agent_temperature: Some(self.llm.agent.temperature),
            user_temperature: Some(self.llm.user.temperature),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TAU__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TAU__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TAU")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
