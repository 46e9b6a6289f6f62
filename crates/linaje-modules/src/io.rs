//! Onboarding de datos externos.
//!
//! `import.local_file` es la frontera deliberadamente impura del set
//! incluido: lee un archivo del disco (path en el module_config) y lo
//! congela como valor `file`. A partir de ahí todo es content-addressed:
//! el mismo contenido byte a byte produce el mismo value hash.

use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::path::Path;

use linaje_core::module::{module_failure, Module, ModuleOutputs, ModuleTypeRegistry};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::EngineError;

#[derive(Debug)]
struct ImportLocalFile {
    path: String,
}

impl Module for ImportLocalFile {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::new()
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("file".to_string(), ValueSchema::new("file"))])
    }

    fn process(&self, _inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let path = Path::new(&self.path);
        let content = std::fs::read_to_string(path)
            .map_err(|e| module_failure(format!("cannot read '{}': {e}", self.path)))?;
        let name = path.file_name()
                       .and_then(|n| n.to_str())
                       .unwrap_or(&self.path)
                       .to_string();
        Ok(BTreeMap::from([("file".to_string(),
                            json!({ "name": name, "size": content.len(), "content": content }))]))
    }
}

pub fn register(modules: &mut ModuleTypeRegistry) -> Result<(), EngineError> {
    modules.register("import.local_file", |config| {
               let path = config.get("path")
                                .and_then(Json::as_str)
                                .ok_or_else(|| EngineError::TypeValidation {
                                    path: "$.path".to_string(),
                                    reason: "missing required config option 'path'".to_string(),
                                })?
                                .to_string();
               Ok(Box::new(ImportLocalFile { path }))
           })?;
    Ok(())
}
