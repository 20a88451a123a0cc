//! 工具注册表
//!
//! 每个工具是一个类型化函数 `Fn(&mut D, Args) -> Result<R, ToolError>`：参数结构体同时派生
//! Deserialize 与 JsonSchema，注册时生成参数 schema 并校验名称；调用时按 schema 绑定参数。
//! 「环境函数」（断言、初始化辅助）与工具同表注册，但不暴露给 Agent。

use std::collections::BTreeMap;

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{HarnessError, ToolError};

/// 工具类型：read / think 不会改动数据库，write / generic 成功后提交
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Read,
    Write,
    Think,
    Generic,
}

impl ToolType {
    pub fn commits(self) -> bool {
        matches!(self, ToolType::Write | ToolType::Generic)
    }
}

/// 供 LLM 使用的函数定义
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

type Handler<D> = dyn Fn(&mut D, Map<String, Value>) -> Result<Value, ToolError> + Send + Sync;

pub struct ToolEntry<D> {
    pub schema: ToolSchema,
    pub tool_type: ToolType,
    handler: Box<Handler<D>>,
}

impl<D> ToolEntry<D> {
    pub fn call(&self, db: &mut D, args: Map<String, Value>) -> Result<Value, ToolError> {
        (self.handler)(db, args)
    }
}

/// 按名称存储工具与环境函数
pub struct ToolRegistry<D> {
    tools: BTreeMap<String, ToolEntry<D>>,
    functions: BTreeMap<String, ToolEntry<D>>,
}

impl<D> Default for ToolRegistry<D> {
    fn default() -> Self {
        Self {
            tools: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }
}

impl<D: 'static> ToolRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册对 Agent 可见的工具
    pub fn register<A, R, F>(
        &mut self,
        name: &str,
        description: &str,
        tool_type: ToolType,
        func: F,
    ) -> Result<(), HarnessError>
    where
        A: DeserializeOwned + JsonSchema,
        R: Serialize,
        F: Fn(&mut D, A) -> Result<R, ToolError> + Send + Sync + 'static,
    {
        let entry = build_entry(name, description, tool_type, func)?;
        self.check_name(name)?;
        self.tools.insert(name.to_string(), entry);
        Ok(())
    }

    /// 注册环境函数，只能经 call_function 调用
    ///
    /// 断言用 Read；初始化辅助函数用 Write，成功后改动才会提交。
    pub fn register_function<A, R, F>(
        &mut self,
        name: &str,
        description: &str,
        tool_type: ToolType,
        func: F,
    ) -> Result<(), HarnessError>
    where
        A: DeserializeOwned + JsonSchema,
        R: Serialize,
        F: Fn(&mut D, A) -> Result<R, ToolError> + Send + Sync + 'static,
    {
        let entry = build_entry(name, description, tool_type, func)?;
        self.check_name(name)?;
        self.functions.insert(name.to_string(), entry);
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<(), HarnessError> {
        if self.tools.contains_key(name) || self.functions.contains_key(name) {
            return Err(HarnessError::Registration(format!(
                "duplicate tool name: {name}"
            )));
        }
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolEntry<D>> {
        self.tools.get(name)
    }

    /// 工具或环境函数
    pub fn function(&self, name: &str) -> Option<&ToolEntry<D>> {
        self.tools.get(name).or_else(|| self.functions.get(name))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema.clone()).collect()
    }
}

fn build_entry<D, A, R, F>(
    name: &str,
    description: &str,
    tool_type: ToolType,
    func: F,
) -> Result<ToolEntry<D>, HarnessError>
where
    D: 'static,
    A: DeserializeOwned + JsonSchema,
    R: Serialize,
    F: Fn(&mut D, A) -> Result<R, ToolError> + Send + Sync + 'static,
{
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(HarnessError::Registration(format!(
            "invalid tool name: {name:?}"
        )));
    }
    let parameters = parameters_schema::<A>()?;
    let tool = name.to_string();
    let handler = move |db: &mut D, args: Map<String, Value>| -> Result<Value, ToolError> {
        let parsed: A = serde_json::from_value(Value::Object(args)).map_err(|e| {
            ToolError::InvalidArguments {
                tool: tool.clone(),
                message: e.to_string(),
            }
        })?;
        let result = func(db, parsed)?;
        serde_json::to_value(result).map_err(|e| ToolError::Serialization {
            tool: tool.clone(),
            message: e.to_string(),
        })
    };
    Ok(ToolEntry {
        schema: ToolSchema {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
        tool_type,
        handler: Box::new(handler),
    })
}

/// 参数结构体的 JSON Schema（子 schema 内联，去掉 $schema / title）
fn parameters_schema<A: JsonSchema>() -> Result<Value, HarnessError> {
    let schema = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<A>();
    let mut value = serde_json::to_value(schema)?;
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
        if map.get("type") != Some(&Value::String("object".to_string())) {
            return Err(HarnessError::Registration(
                "tool arguments must be a struct".to_string(),
            ));
        }
        map.entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct AddArgs {
        /// 加数
        amount: i64,
    }

    #[derive(Deserialize, JsonSchema)]
    struct NoArgs {}

    fn registry() -> ToolRegistry<i64> {
        let mut registry = ToolRegistry::new();
        registry
            .register("add", "Add to the counter", ToolType::Write, |db: &mut i64, a: AddArgs| {
                *db += a.amount;
                Ok(*db)
            })
            .unwrap();
        registry
            .register_function("is_zero", "Counter is zero", ToolType::Read, |db: &mut i64, _: NoArgs| {
                Ok(*db == 0)
            })
            .unwrap();
        registry
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_schema_generated_from_args() {
        let registry = registry();
        let schemas = registry.tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "add");
        assert_eq!(schemas[0].parameters["type"], "object");
        assert_eq!(schemas[0].parameters["properties"]["amount"]["description"], "加数");
        assert!(schemas[0].parameters.get("$schema").is_none());
    }

    #[test]
    fn test_call_binds_arguments() {
        let registry = registry();
        let mut db = 1;
        let out = registry.tool("add").unwrap().call(&mut db, args(json!({"amount": 2})));
        assert_eq!(out, Ok(json!(3)));
        assert_eq!(db, 3);
    }

    #[test]
    fn test_unknown_or_missing_arguments_rejected() {
        let registry = registry();
        let mut db = 0;
        let add = registry.tool("add").unwrap();
        assert!(matches!(
            add.call(&mut db, args(json!({"amount": 1, "extra": true}))),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert!(matches!(
            add.call(&mut db, args(json!({}))),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert_eq!(db, 0);
    }

    #[test]
    fn test_functions_hidden_from_tools() {
        let registry = registry();
        assert!(registry.tool("is_zero").is_none());
        assert!(registry.function("is_zero").is_some());
        assert_eq!(registry.tool_names(), vec!["add".to_string()]);
    }

    #[test]
    fn test_registration_rejects_duplicates_and_bad_names() {
        let mut registry = registry();
        let dup = registry.register_function("add", "again", ToolType::Read, |db: &mut i64, _: NoArgs| {
            Ok(*db)
        });
        assert!(matches!(dup, Err(HarnessError::Registration(_))));
        let bad = registry.register("bad name", "x", ToolType::Read, |db: &mut i64, _: NoArgs| {
            Ok(*db)
        });
        assert!(matches!(bad, Err(HarnessError::Registration(_))));
        let not_struct =
            registry.register("scalar", "x", ToolType::Read, |db: &mut i64, _: i64| Ok(*db));
        assert!(matches!(not_struct, Err(HarnessError::Registration(_))));
    }
}
