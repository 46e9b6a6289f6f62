//! Módulos de texto.

use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

use linaje_core::module::{module_failure_on, Module, ModuleOutputs, ModuleTypeRegistry};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::EngineError;

/// `text.match`: ¿el texto contiene el patrón configurado?
#[derive(Debug)]
struct TextMatch {
    pattern: String,
}

impl Module for TextMatch {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("text".to_string(), ValueSchema::new("string"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("matched".to_string(), ValueSchema::new("boolean"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let text = inputs.get("text")
                         .and_then(|v| v.payload.as_str())
                         .ok_or_else(|| module_failure_on("text", "missing text input"))?;
        Ok(BTreeMap::from([("matched".to_string(), json!(text.contains(&self.pattern)))]))
    }
}

/// `text.concat`: concatena dos strings con un separador configurable.
#[derive(Debug)]
struct TextConcat {
    separator: String,
}

impl Module for TextConcat {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("left".to_string(), ValueSchema::new("string")),
                        ("right".to_string(), ValueSchema::new("string"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("joined".to_string(), ValueSchema::new("string"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let left = inputs.get("left")
                         .and_then(|v| v.payload.as_str())
                         .ok_or_else(|| module_failure_on("left", "missing left input"))?;
        let right = inputs.get("right")
                          .and_then(|v| v.payload.as_str())
                          .ok_or_else(|| module_failure_on("right", "missing right input"))?;
        Ok(BTreeMap::from([("joined".to_string(), json!(format!("{left}{}{right}", self.separator)))]))
    }
}

pub fn register(modules: &mut ModuleTypeRegistry) -> Result<(), EngineError> {
    modules.register("text.match", |config| {
               let pattern = config.get("pattern")
                                   .and_then(Json::as_str)
                                   .ok_or_else(|| EngineError::TypeValidation {
                                       path: "$.pattern".to_string(),
                                       reason: "missing required config option 'pattern'".to_string(),
                                   })?
                                   .to_string();
               Ok(Box::new(TextMatch { pattern }))
           })?;
    modules.register("text.concat", |config| {
               let separator = config.get("separator").and_then(Json::as_str).unwrap_or("").to_string();
               Ok(Box::new(TextConcat { separator }))
           })?;
    Ok(())
}
