//! mock 领域：最小的任务管理系统，用于框架自测与示例
//!
//! 数据库、策略与任务集随二进制打包，也可通过 `MockDb::load` 从文件加载其它数据库。

pub mod db;
pub mod tools;

use std::sync::Arc;

use crate::core::HarnessError;
use crate::data::{parse_tasks, Task};
use crate::environment::{Environment, ToolKit};

pub use db::{MockDb, MockTask, MockUser, TaskStatus};

pub const DOMAIN_NAME: &str = "mock";

const DB_JSON: &str = include_str!("../../../data/mock/db.json");
const TASKS_JSON: &str = include_str!("../../../data/mock/tasks.json");
const POLICY: &str = include_str!("../../../data/mock/policy.md");

pub fn policy() -> &'static str {
    POLICY
}

/// 标准初始数据库
pub fn load_db() -> Result<MockDb, HarnessError> {
    Ok(serde_json::from_str(DB_JSON)?)
}

/// 新建一个独立的环境；db 为空时使用标准数据库
pub fn get_environment(db: Option<MockDb>, solo_mode: bool) -> Result<Environment, HarnessError> {
    let db = match db {
        Some(db) => db,
        None => load_db()?,
    };
    let registry = Arc::new(tools::build_registry()?);
    let mut env = Environment::new(
        DOMAIN_NAME,
        POLICY,
        Box::new(ToolKit::new(db, registry)),
        None,
    );
    env.set_solo_mode(solo_mode)?;
    Ok(env)
}

pub fn get_tasks() -> Result<Vec<Task>, HarnessError> {
    parse_tasks(TASKS_JSON)
}
