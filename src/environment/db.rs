//! 领域数据库契约：加载 / 导出 / 哈希 / 补丁合并
//!
//! 按扩展名选择格式：`.toml` 用 toml，其余按 JSON 处理。

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::HarnessError;

/// 领域数据库；每次运行持有一份独立副本
pub trait Db: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn load(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path)?;
        if is_toml(path) {
            toml::from_str(&raw).map_err(|e| HarnessError::Toml(e.to_string()))
        } else {
            Ok(serde_json::from_str(&raw)?)
        }
    }

    fn dump(&self, path: &Path) -> Result<(), HarnessError> {
        let raw = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| HarnessError::Toml(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn to_value(&self) -> Result<Value, HarnessError> {
        Ok(serde_json::to_value(self)?)
    }

    /// 规范 JSON（键有序）的 sha256
    fn db_hash(&self) -> Result<String, HarnessError> {
        Ok(hash_value(&self.to_value()?))
    }

    /// 将部分 JSON 深度合并后返回新实例
    fn patched(&self, patch: &Value) -> Result<Self, HarnessError> {
        let mut value = self.to_value()?;
        deep_merge(&mut value, patch);
        Ok(serde_json::from_value(value)?)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

pub fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// 对象逐键递归合并，其它类型（含数组）整体替换
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        name: String,
        values: BTreeMap<String, i64>,
    }

    impl Db for Counter {}

    fn counter() -> Counter {
        Counter {
            name: "c".into(),
            values: BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]),
        }
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut target = json!({"tasks": {"task_1": {"status": "pending", "title": "T"}}, "list": [1, 2]});
        deep_merge(
            &mut target,
            &json!({"tasks": {"task_1": {"status": "completed"}, "task_2": {"title": "N"}}, "list": [3]}),
        );
        assert_eq!(
            target,
            json!({
                "tasks": {"task_1": {"status": "completed", "title": "T"}, "task_2": {"title": "N"}},
                "list": [3]
            })
        );
    }

    #[test]
    fn test_patched_changes_hash() {
        let db = counter();
        let patched = db.patched(&json!({"values": {"a": 5}})).unwrap();
        assert_eq!(patched.values["a"], 5);
        assert_eq!(patched.values["b"], 2);
        assert_ne!(db.db_hash().unwrap(), patched.db_hash().unwrap());
        assert_eq!(db.db_hash().unwrap(), counter().db_hash().unwrap());
    }

    #[test]
    fn test_load_dump_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["db.json", "db.toml"] {
            let path = dir.path().join(file);
            counter().dump(&path).unwrap();
            assert_eq!(Counter::load(&path).unwrap(), counter());
        }
    }
}
