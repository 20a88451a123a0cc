//! 领域注册表：领域名 → 环境构造器 + 任务加载器

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::HarnessError;
use crate::data::Task;
use crate::domains::mock;
use crate::environment::Environment;
use crate::evaluator::EnvironmentConstructor;

pub type TaskLoader = dyn Fn() -> Result<Vec<Task>, HarnessError> + Send + Sync;

#[derive(Clone)]
struct DomainEntry {
    env_constructor: Arc<EnvironmentConstructor>,
    task_loader: Arc<TaskLoader>,
}

#[derive(Clone, Default)]
pub struct Registry {
    domains: BTreeMap<String, DomainEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置领域（mock）
    pub fn with_builtin_domains() -> Self {
        let mut registry = Self::new();
        registry.domains.insert(
            mock::DOMAIN_NAME.to_string(),
            DomainEntry {
                env_constructor: Arc::new(|solo_mode: bool| mock::get_environment(None, solo_mode)),
                task_loader: Arc::new(mock::get_tasks),
            },
        );
        registry
    }

    pub fn register_domain(
        &mut self,
        name: &str,
        env_constructor: Arc<EnvironmentConstructor>,
        task_loader: Arc<TaskLoader>,
    ) -> Result<(), HarnessError> {
        if self.domains.contains_key(name) {
            return Err(HarnessError::Registration(format!(
                "domain {name} already registered"
            )));
        }
        self.domains.insert(
            name.to_string(),
            DomainEntry {
                env_constructor,
                task_loader,
            },
        );
        tracing::debug!(domain = name, "Domain registered");
        Ok(())
    }

    pub fn domains(&self) -> Vec<String> {
        self.domains.keys().cloned().collect()
    }

    fn entry(&self, domain: &str) -> Result<&DomainEntry, HarnessError> {
        self.domains
            .get(domain)
            .ok_or_else(|| HarnessError::UnknownDomain(domain.to_string()))
    }

    pub fn env_constructor(&self, domain: &str) -> Result<Arc<EnvironmentConstructor>, HarnessError> {
        Ok(Arc::clone(&self.entry(domain)?.env_constructor))
    }

    pub fn get_environment(&self, domain: &str, solo_mode: bool) -> Result<Environment, HarnessError> {
        (self.entry(domain)?.env_constructor)(solo_mode)
    }

    /// 领域的任务列表；给定 task_ids 时按其顺序返回，任一 id 不存在则报错
    pub fn get_tasks(
        &self,
        domain: &str,
        task_ids: Option<&[String]>,
    ) -> Result<Vec<Task>, HarnessError> {
        let tasks = (self.entry(domain)?.task_loader)()?;
        let Some(ids) = task_ids else {
            return Ok(tasks);
        };
        ids.iter()
            .map(|id| {
                tasks
                    .iter()
                    .find(|t| &t.id == id)
                    .cloned()
                    .ok_or_else(|| HarnessError::UnknownTask(format!("{domain}/{id}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_mock_domain() {
        let registry = Registry::with_builtin_domains();
        assert_eq!(registry.domains(), vec!["mock".to_string()]);
        let env = registry.get_environment("mock", false).unwrap();
        assert_eq!(env.domain_name(), "mock");
        assert!(!registry.get_tasks("mock", None).unwrap().is_empty());
    }

    #[test]
    fn test_task_selection() {
        let registry = Registry::with_builtin_domains();
        let ids = vec!["update_task_status_1".to_string(), "create_task_1".to_string()];
        let tasks = registry.get_tasks("mock", Some(&ids)).unwrap();
        assert_eq!(tasks[0].id, "update_task_status_1");
        assert_eq!(tasks[1].id, "create_task_1");

        let missing = vec!["nope".to_string()];
        assert!(matches!(
            registry.get_tasks("mock", Some(&missing)),
            Err(HarnessError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_unknown_and_duplicate_domains() {
        let mut registry = Registry::with_builtin_domains();
        assert!(matches!(
            registry.get_environment("airline", false),
            Err(HarnessError::UnknownDomain(_))
        ));
        let dup = registry.register_domain(
            "mock",
            Arc::new(|solo_mode: bool| mock::get_environment(None, solo_mode)),
            Arc::new(mock::get_tasks),
        );
        assert!(matches!(dup, Err(HarnessError::Registration(_))));
    }
}
