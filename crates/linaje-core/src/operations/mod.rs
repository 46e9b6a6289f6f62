//! Capa de operaciones: dispatch polimórfico (operación, data type) → manifest.
//!
//! Una operación (`pretty_print`, `serialize`, `extract_metadata`, ...)
//! declara un esqueleto de IO compartido: el campo principal de entrada y el
//! campo de salida. En el arranque del contexto cada módulo anotado aporta
//! una entrada a la tabla de dispatch; invocar la operación resuelve el
//! manifest por el data type del valor principal (subiendo por la cadena de
//! subtipos hasta `any`) y somete un job normal — heredando cache y linaje.

use std::collections::HashMap;

use crate::errors::EngineError;
use crate::module::Manifest;
use crate::types::DataTypeRegistry;

/// Esqueleto de una operación polimórfica.
#[derive(Debug, Clone)]
pub struct OperationType {
    pub name: String,
    /// Campo de input que recibe el valor principal (clave de dispatch).
    pub input_field: String,
    /// Campo de output principal del módulo resuelto.
    pub output_field: String,
    pub doc: String,
}

/// Entrada de dispatch: manifest template + mapeo de campos del esqueleto de
/// la operación a los campos reales del módulo.
#[derive(Debug, Clone)]
pub struct OperationEntry {
    pub manifest: Manifest,
    /// Campo de input del módulo que recibe el valor principal.
    pub input_field: String,
    /// Campo de output del módulo que expone el resultado principal.
    pub output_field: String,
}

#[derive(Default)]
pub struct OperationRegistry {
    types: HashMap<String, OperationType>,
    /// (operación, data type) → entrada de dispatch.
    dispatch: HashMap<(String, String), OperationEntry>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registro con los tipos de operación incluidos de serie.
    pub fn with_builtin_types() -> Self {
        let mut reg = Self::new();
        for (name, input_field, output_field, doc) in [
            ("pretty_print", "value", "rendered", "render a value to human-readable text"),
            ("serialize", "value", "bytes", "serialize a value to its canonical byte form"),
            ("deserialize", "bytes", "value", "rebuild a value from serialized bytes"),
            ("extract_metadata", "value", "metadata", "derive well-known metadata from a value"),
            ("import_data", "source", "value", "onboard external data as a tracked value"),
            ("export_as", "value", "exported", "translate a value to an external representation"),
            ("filter", "value", "filtered", "reduce a value by a predicate"),
        ] {
            reg.register_operation_type(OperationType { name: name.to_string(),
                                                        input_field: input_field.to_string(),
                                                        output_field: output_field.to_string(),
                                                        doc: doc.to_string() })
               .expect("builtin operation types are duplicate-free");
        }
        reg
    }

    pub fn register_operation_type(&mut self, op: OperationType) -> Result<(), EngineError> {
        if self.types.contains_key(&op.name) {
            return Err(EngineError::Internal(format!("operation type '{}' already registered", op.name)));
        }
        self.types.insert(op.name.clone(), op);
        Ok(())
    }

    pub fn operation_type(&self, name: &str) -> Result<&OperationType, EngineError> {
        self.types
            .get(name)
            .ok_or_else(|| EngineError::UnknownOperation(name.to_string()))
    }

    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Asocia un manifest a (operación, data type de dispatch), con los
    /// nombres de campo del esqueleto de la operación.
    pub fn register_entry(&mut self,
                          operation: &str,
                          data_type: &str,
                          manifest: Manifest)
                          -> Result<(), EngineError> {
        let op = self.operation_type(operation)?;
        let input_field = op.input_field.clone();
        let output_field = op.output_field.clone();
        self.register_entry_mapped(operation, data_type, manifest, &input_field, &output_field)
    }

    /// Variante con renombre de campos: el módulo usa sus propios nombres de
    /// input/output y la operación los mapea al invocar.
    pub fn register_entry_mapped(&mut self,
                                 operation: &str,
                                 data_type: &str,
                                 manifest: Manifest,
                                 input_field: &str,
                                 output_field: &str)
                                 -> Result<(), EngineError> {
        // La operación debe existir; el data type se valida al resolver.
        self.operation_type(operation)?;
        let key = (operation.to_string(), data_type.to_string());
        if self.dispatch.contains_key(&key) {
            return Err(EngineError::Internal(format!(
                "operation '{operation}' already has an entry for data type '{data_type}'"
            )));
        }
        self.dispatch.insert(key,
                             OperationEntry { manifest,
                                              input_field: input_field.to_string(),
                                              output_field: output_field.to_string() });
        Ok(())
    }

    /// Entradas registradas de una operación: data type → entrada.
    pub fn entries_for(&self, operation: &str) -> Vec<(String, OperationEntry)> {
        let mut entries: Vec<(String, OperationEntry)> =
            self.dispatch
                .iter()
                .filter(|((op, _), _)| op.as_str() == operation)
                .map(|((_, ty), entry)| (ty.clone(), entry.clone()))
                .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Resuelve la entrada para (operación, tipo del valor), subiendo por la
    /// cadena de subtipos del data type.
    pub fn resolve(&self,
                   operation: &str,
                   data_type: &str,
                   types: &DataTypeRegistry)
                   -> Result<&OperationEntry, EngineError> {
        self.operation_type(operation)?;
        for candidate in types.dispatch_chain(data_type)? {
            if let Some(entry) = self.dispatch.get(&(operation.to_string(), candidate)) {
                return Ok(entry);
            }
        }
        Err(EngineError::OperationNotSupported { operation: operation.to_string(),
                                                 data_type: data_type.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_walks_the_subtype_chain() {
        let types = DataTypeRegistry::with_core_types();
        let mut ops = OperationRegistry::with_builtin_types();
        ops.register_entry("pretty_print", "any", Manifest::new("render.generic")).unwrap();
        ops.register_entry("pretty_print", "table", Manifest::new("render.table")).unwrap();

        // `table` tiene entrada propia; `string` cae en el catch-all de `any`
        let entry = ops.resolve("pretty_print", "table", &types).unwrap();
        assert_eq!(entry.manifest.module_type, "render.table");
        assert_eq!(entry.input_field, "value");
        let entry = ops.resolve("pretty_print", "string", &types).unwrap();
        assert_eq!(entry.manifest.module_type, "render.generic");
    }

    #[test]
    fn missing_entry_is_reported_with_both_keys() {
        let types = DataTypeRegistry::with_core_types();
        let ops = OperationRegistry::with_builtin_types();
        let err = ops.resolve("filter", "table", &types).unwrap_err();
        match err {
            EngineError::OperationNotSupported { operation, data_type } => {
                assert_eq!(operation, "filter");
                assert_eq!(data_type, "table");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_is_rejected_on_registration() {
        let mut ops = OperationRegistry::with_builtin_types();
        let err = ops.register_entry("no_such_op", "any", Manifest::new("m")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperation(_)));
    }
}
