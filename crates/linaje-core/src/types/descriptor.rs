use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::EngineError;
use crate::hashing;

/// Capacidades de un data type. Implementaciones deben ser puras: ninguna
/// función puede depender de estado externo.
pub trait DataType: Send + Sync {
    /// Nombre estable y único dentro del registro.
    fn name(&self) -> &str;

    /// Supertipo directo para el dispatch de operaciones. `None` sólo para
    /// `any` (raíz de la cadena).
    fn subtype_of(&self) -> Option<&str> {
        Some("any")
    }

    /// Valida un payload contra el tipo. El error lleva el path ofensor.
    fn validate(&self, _payload: &Value) -> Result<(), EngineError> {
        Ok(())
    }

    /// Codificación canónica del payload. `Ok(None)` marca el tipo como
    /// opaco: sus valores viven sólo en memoria y persistirlos produce
    /// `OpaqueNotPersistable`.
    fn canonical_bytes(&self, payload: &Value) -> Result<Option<Vec<u8>>, EngineError> {
        hashing::encode_canonical(payload).map(Some)
    }

    /// Propiedades bien conocidas extraídas del payload (entran al metadata
    /// del valor, no al hash).
    fn extract_properties(&self, _payload: &Value) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }
}

/// Helper para errores de validación con path.
pub(crate) fn validation_error(path: &str, reason: impl Into<String>) -> EngineError {
    EngineError::TypeValidation { path: path.to_string(), reason: reason.into() }
}
