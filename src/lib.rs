//! tau - 对话智能体评测框架
//!
//! 模块划分：
//! - **data**: 消息、任务、模拟结果
//! - **environment**: 领域数据库、工具注册与分发
//! - **domains**: 内置领域（mock）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本化）
//! - **agent**: 被测 Agent（对话模式 / solo 模式）
//! - **user**: 用户模拟器
//! - **core**: 编排状态机、错误分类、重试、超时与并发控制
//! - **evaluator**: 动作 / 环境 / 沟通评分
//! - **registry**: 领域注册表
//! - **runner**: 批量运行、续跑、结果保存
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **server**: HTTP 服务（feature = "server"）

pub mod agent;
pub mod config;
pub mod core;
pub mod data;
pub mod domains;
pub mod environment;
pub mod evaluator;
pub mod llm;
pub mod observability;
pub mod registry;
pub mod runner;
#[cfg(feature = "server")]
pub mod server;
pub mod user;
