use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

use crate::errors::EngineError;
use crate::hashing;

/// Par (module_type, module_config) que identifica una instancia de módulo.
/// El manifest hash es el hash canónico del par; manifests con el mismo hash
/// deben producir módulos equivalentes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub module_type: String,
    #[serde(default)]
    pub module_config: BTreeMap<String, Json>,
}

impl Manifest {
    pub fn new(module_type: impl Into<String>) -> Self {
        Self { module_type: module_type.into(),
               module_config: BTreeMap::new() }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Json) -> Self {
        self.module_config.insert(key.into(), value);
        self
    }

    pub fn manifest_hash(&self) -> Result<String, EngineError> {
        hashing::hash_value(&json!({
            "module_type": self.module_type,
            "module_config": self.module_config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_order_does_not_change_the_hash() {
        let a = Manifest::new("text.match")
            .with_config("pattern", json!("der"))
            .with_config("limit", json!(10));
        let b = Manifest::new("text.match")
            .with_config("limit", json!(10))
            .with_config("pattern", json!("der"));
        assert_eq!(a.manifest_hash().unwrap(), b.manifest_hash().unwrap());
    }

    #[test]
    fn module_type_changes_the_hash() {
        let a = Manifest::new("logic.and");
        let b = Manifest::new("logic.or");
        assert_ne!(a.manifest_hash().unwrap(), b.manifest_hash().unwrap());
    }
}
