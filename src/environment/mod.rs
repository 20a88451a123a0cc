//! 环境层：数据库契约、类型化工具注册表、工具箱与分发器

pub mod db;
#[allow(clippy::module_inception)]
pub mod environment;
pub mod registry;
pub mod toolkit;

pub use db::{deep_merge, hash_value, Db};
pub use environment::{paired_tool_calls, to_content, Environment};
pub use registry::{ToolEntry, ToolRegistry, ToolSchema, ToolType};
pub use toolkit::{ToolKit, ToolProvider};
