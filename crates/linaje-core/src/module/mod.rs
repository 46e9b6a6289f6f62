//! Contrato de módulo y registro de tipos de módulo.
//!
//! Un módulo es la unidad de trabajo abstracta: schemas de entrada/salida
//! tipados + `process` puro respecto a sus inputs. No se almacena nunca: se
//! reconstruye desde su manifest (module_type + module_config). Dos módulos
//! son intercambiables para el cache sii sus manifest hashes coinciden.

mod manifest;
mod registry;

use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::errors::EngineError;
use crate::values::{ValueMap, ValueSchema};

pub use manifest::Manifest;
pub use registry::{ModuleFactory, ModuleTypeRegistry};

/// Payloads de salida crudos, campo → JSON. El motor (no el módulo) los
/// registra como valores con el schema de salida y el linaje del job.
pub type ModuleOutputs = BTreeMap<String, Json>;

/// Unidad de trabajo pura. Los schemas pueden depender del module_config con
/// el que se construyó la instancia.
pub trait Module: Send + Sync + std::fmt::Debug {
    /// Schema de inputs: campo → ValueSchema.
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema>;

    /// Schema de outputs: campo → ValueSchema.
    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema>;

    /// Ejecución pura. Errores de negocio esperables se señalan con
    /// `EngineError::ModuleFailure`; cualquier otro error se trata como
    /// `ModuleCrash` (sin job record).
    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError>;
}

/// Helper para fallos de negocio dentro de un módulo.
pub fn module_failure(reason: impl Into<String>) -> EngineError {
    EngineError::ModuleFailure { reason: reason.into(), field: None }
}

/// Variante con campo ofensor.
pub fn module_failure_on(field: impl Into<String>, reason: impl Into<String>) -> EngineError {
    EngineError::ModuleFailure { reason: reason.into(), field: Some(field.into()) }
}
