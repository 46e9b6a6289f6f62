use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::errors::EngineError;
use crate::hashing;

/// Schema de un campo: tipo declarado + configuración por instancia.
/// Dos schemas son iguales sii sus codificaciones canónicas coinciden.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueSchema {
    pub type_name: String,
    /// Configuración por instancia del tipo (p. ej. tipo interno de un
    /// contenedor). No todos los tipos la usan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_config: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(default)]
    pub optional: bool,
}

impl ValueSchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(),
               type_config: None,
               doc: None,
               default: None,
               optional: false }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_default(mut self, default: Json) -> Self {
        self.default = Some(default);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Hash canónico del schema. Participa en el value hash.
    pub fn schema_hash(&self) -> Result<String, EngineError> {
        hashing::hash_value(&json!({
            "type_name": self.type_name,
            "type_config": self.type_config,
            "default": self.default,
            "optional": self.optional,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_does_not_affect_schema_hash() {
        let a = ValueSchema::new("string");
        let b = ValueSchema::new("string").with_doc("some human text");
        assert_eq!(a.schema_hash().unwrap(), b.schema_hash().unwrap());
    }

    #[test]
    fn type_config_affects_schema_hash() {
        let a = ValueSchema::new("table");
        let mut b = ValueSchema::new("table");
        b.type_config = Some(serde_json::json!({ "item": "string" }));
        assert_ne!(a.schema_hash().unwrap(), b.schema_hash().unwrap());
    }
}
