use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};

use super::{Manifest, Module};
use crate::errors::EngineError;

/// Fábrica: module_config → instancia de módulo.
pub type ModuleFactory =
    Box<dyn Fn(&BTreeMap<String, Json>) -> Result<Box<dyn Module>, EngineError> + Send + Sync>;

/// Registro nombre → fábrica. Se llena al construir el contexto (registro
/// explícito, sin discovery) y queda inmutable después.
#[derive(Default)]
pub struct ModuleTypeRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleTypeRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register<F>(&mut self, module_type: impl Into<String>, factory: F) -> Result<(), EngineError>
        where F: Fn(&BTreeMap<String, Json>) -> Result<Box<dyn Module>, EngineError> + Send + Sync + 'static
    {
        let name = module_type.into();
        if self.factories.contains_key(&name) {
            return Err(EngineError::DuplicateModuleType(name));
        }
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, module_type: &str) -> bool {
        self.factories.contains_key(module_type)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Reconstruye el módulo descrito por un manifest.
    pub fn resolve(&self, manifest: &Manifest) -> Result<Box<dyn Module>, EngineError> {
        let factory = self.factories
                          .get(&manifest.module_type)
                          .ok_or_else(|| EngineError::UnknownModuleType(manifest.module_type.clone()))?;
        factory(&manifest.module_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleOutputs;
    use crate::values::{ValueMap, ValueSchema};

    struct Echo;
    impl Module for Echo {
        fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
            BTreeMap::from([("a".to_string(), ValueSchema::new("any"))])
        }
        fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
            BTreeMap::from([("y".to_string(), ValueSchema::new("any"))])
        }
        fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
            Ok(BTreeMap::from([("y".to_string(), inputs["a"].payload.clone())]))
        }
    }

    #[test]
    fn duplicate_module_type_fails_fast() {
        let mut reg = ModuleTypeRegistry::new();
        reg.register("echo", |_| Ok(Box::new(Echo))).unwrap();
        let err = reg.register("echo", |_| Ok(Box::new(Echo))).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateModuleType(_)));
    }

    #[test]
    fn resolve_unknown_module_type() {
        let reg = ModuleTypeRegistry::new();
        let err = reg.resolve(&Manifest::new("nope")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownModuleType(_)));
    }
}
