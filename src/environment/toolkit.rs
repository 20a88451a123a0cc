//! 工具箱：一份数据库 + 共享的工具注册表
//!
//! 每次调用都在数据库副本上执行；write / generic 工具成功后才提交副本，
//! 因此失败的调用不会留下部分修改。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::{HarnessError, ToolError};
use crate::environment::db::Db;
use crate::environment::registry::{ToolRegistry, ToolSchema, ToolType};

/// 对象安全的工具箱接口，Environment 通过它操作任意领域的数据库
pub trait ToolProvider: Send + Sync {
    fn has_tool(&self, name: &str) -> bool;

    fn has_function(&self, name: &str) -> bool;

    fn tool_names(&self) -> Vec<String>;

    fn tool_schemas(&self) -> Vec<ToolSchema>;

    fn tool_type(&self, name: &str) -> Option<ToolType>;

    /// 调用 Agent 可见的工具
    fn use_tool(&mut self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError>;

    /// 调用工具或环境函数（初始化动作、断言）
    fn call_function(&mut self, name: &str, args: &Map<String, Value>)
        -> Result<Value, ToolError>;

    fn db_value(&self) -> Result<Value, HarnessError>;

    fn db_hash(&self) -> Result<String, HarnessError>;

    /// 深度合并部分 JSON 到数据库
    fn update_db(&mut self, patch: &Value) -> Result<(), HarnessError>;

    fn box_clone(&self) -> Box<dyn ToolProvider>;
}

impl Clone for Box<dyn ToolProvider> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

pub struct ToolKit<D: Db> {
    db: D,
    registry: Arc<ToolRegistry<D>>,
}

impl<D: Db> Clone for ToolKit<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<D: Db> ToolKit<D> {
    pub fn new(db: D, registry: Arc<ToolRegistry<D>>) -> Self {
        Self { db, registry }
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    fn invoke(
        &mut self,
        name: &str,
        args: &Map<String, Value>,
        include_functions: bool,
    ) -> Result<Value, ToolError> {
        let entry = if include_functions {
            self.registry.function(name)
        } else {
            self.registry.tool(name)
        }
        .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let mut scratch = self.db.clone();
        let result = entry.call(&mut scratch, args.clone())?;
        if entry.tool_type.commits() {
            self.db = scratch;
        }
        Ok(result)
    }
}

impl<D: Db> ToolProvider for ToolKit<D> {
    fn has_tool(&self, name: &str) -> bool {
        self.registry.tool(name).is_some()
    }

    fn has_function(&self, name: &str) -> bool {
        self.registry.function(name).is_some()
    }

    fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.registry.tool_schemas()
    }

    fn tool_type(&self, name: &str) -> Option<ToolType> {
        self.registry.tool(name).map(|t| t.tool_type)
    }

    fn use_tool(&mut self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        self.invoke(name, args, false)
    }

    fn call_function(
        &mut self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        self.invoke(name, args, true)
    }

    fn db_value(&self) -> Result<Value, HarnessError> {
        self.db.to_value()
    }

    fn db_hash(&self) -> Result<String, HarnessError> {
        self.db.db_hash()
    }

    fn update_db(&mut self, patch: &Value) -> Result<(), HarnessError> {
        self.db = self.db.patched(patch)?;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn ToolProvider> {
        Box::new(self.clone())
    }
}
