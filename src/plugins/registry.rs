use super::builtin::{ExecutorCommand, StagerCopyInputs, StagerNoResources};
use super::capability::{PluginError, PluginSetup, ResourceStager, ToolExecutor};
use std::collections::BTreeMap;

pub type StagerConstructor =
    Box<dyn Fn(&PluginSetup) -> Result<Box<dyn ResourceStager>, PluginError>>;
pub type ExecutorConstructor =
    Box<dyn Fn(&PluginSetup) -> Result<Box<dyn ToolExecutor>, PluginError>>;

/// Plugin constructors keyed by manifest class name (case-insensitive).
#[derive(Default)]
pub struct PluginRegistry {
    stagers: BTreeMap<String, StagerConstructor>,
    executors: BTreeMap<String, ExecutorConstructor>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("stagers", &self.stagers.keys().collect::<Vec<_>>())
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register_stager("StagerNoResources", |_| Ok(Box::new(StagerNoResources)));
        registry.register_stager("StagerCopyInputs", |setup| {
            Ok(Box::new(StagerCopyInputs::from_setup(setup)?))
        });
        registry.register_executor("ExecutorCommand", |setup| {
            Ok(Box::new(ExecutorCommand::from_setup(setup)?))
        });
        registry
    }

    pub fn register_stager<F>(&mut self, class: &str, constructor: F)
    where
        F: Fn(&PluginSetup) -> Result<Box<dyn ResourceStager>, PluginError> + 'static,
    {
        self.stagers
            .insert(class_key(class), Box::new(constructor));
    }

    pub fn register_executor<F>(&mut self, class: &str, constructor: F)
    where
        F: Fn(&PluginSetup) -> Result<Box<dyn ToolExecutor>, PluginError> + 'static,
    {
        self.executors
            .insert(class_key(class), Box::new(constructor));
    }

    pub fn build_stager(
        &self,
        class: &str,
        setup: &PluginSetup,
    ) -> Result<Box<dyn ResourceStager>, PluginError> {
        let constructor =
            self.stagers
                .get(&class_key(class))
                .ok_or_else(|| PluginError::UnknownClass {
                    class: class.to_string(),
                })?;
        constructor(setup)
    }

    pub fn build_executor(
        &self,
        class: &str,
        setup: &PluginSetup,
    ) -> Result<Box<dyn ToolExecutor>, PluginError> {
        let constructor =
            self.executors
                .get(&class_key(class))
                .ok_or_else(|| PluginError::UnknownClass {
                    class: class.to_string(),
                })?;
        constructor(setup)
    }

    pub fn has_stager(&self, class: &str) -> bool {
        self.stagers.contains_key(&class_key(class))
    }

    pub fn has_executor(&self, class: &str) -> bool {
        self.executors.contains_key(&class_key(class))
    }
}

fn class_key(class: &str) -> String {
    class.trim().to_ascii_lowercase()
}
