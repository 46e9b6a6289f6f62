//! Errores del core y su clasificación.
//!
//! Un único enum cubre todos los fallos observables del motor; la función
//! `classify_error` reduce cada variante a una clase gruesa que usan la capa
//! de persistencia (política de retry) y la CLI (códigos de salida).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
    #[error("type validation failed at '{path}': {reason}")]
    TypeValidation { path: String, reason: String },
    #[error("schema mismatch on field '{field}': expected {expected}, found {found}")]
    SchemaMismatch { field: String, expected: String, found: String },
    #[error("unknown value: {0}")]
    UnknownValue(String),
    #[error("unknown alias: {0}")]
    UnknownAlias(String),
    #[error("duplicate data type: {0}")]
    DuplicateType(String),
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
    #[error("duplicate module type: {0}")]
    DuplicateModuleType(String),
    #[error("unknown module type: {0}")]
    UnknownModuleType(String),
    #[error("unknown operation type: {0}")]
    UnknownOperation(String),
    #[error("no '{operation}' operation registered for data type '{data_type}'")]
    OperationNotSupported { operation: String, data_type: String },
    #[error("module failure: {reason}")]
    ModuleFailure { reason: String, field: Option<String> },
    #[error("module crash: {0}")]
    ModuleCrash(String),
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
    #[error("pipeline contains a cycle through steps {0:?}")]
    PipelineCycle(Vec<String>),
    #[error("step '{step_id}' is not ready, missing inputs: {missing:?}")]
    StepNotReady { step_id: String, missing: Vec<String> },
    #[error("job {job_hash} timed out after {timeout_ms} ms")]
    JobTimeout { job_hash: String, timeout_ms: u64 },
    #[error("job {job_hash} was cancelled before dispatch")]
    JobCancelled { job_hash: String },
    #[error("recorded job {job_hash} is missing stored output '{field}' ({value_hash})")]
    JobOutputMissing { job_hash: String, field: String, value_hash: String },
    #[error("incompatible archive: format version {found}, supported up to {supported}")]
    IncompatibleArchive { found: i64, supported: i64 },
    #[error("archive is locked by another writer")]
    ArchiveLocked,
    #[error("payload of data type '{data_type}' is opaque and cannot be persisted")]
    OpaqueNotPersistable { data_type: String },
    #[error("archive io error: {0}")]
    ArchiveIo(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Clase gruesa de un error, para políticas transversales (retries, exit
/// codes). No forma parte de ningún hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Entrada inválida: schema, tipos, argumentos, declaraciones.
    Validation,
    /// Fallo dentro de un módulo (esperado o crash).
    Module,
    /// Error de archive / IO.
    Io,
    /// Cancelación o timeout cooperativo.
    Cancelled,
    /// Bug del motor.
    Internal,
}

pub fn classify_error(err: &EngineError) -> ErrorClass {
    use EngineError::*;
    match err {
        Canonicalization(_)
        | TypeValidation { .. }
        | SchemaMismatch { .. }
        | UnknownValue(_)
        | UnknownAlias(_)
        | DuplicateType(_)
        | UnknownDataType(_)
        | DuplicateModuleType(_)
        | UnknownModuleType(_)
        | UnknownOperation(_)
        | OperationNotSupported { .. }
        | InvalidPipeline(_)
        | PipelineCycle(_)
        | StepNotReady { .. }
        | OpaqueNotPersistable { .. } => ErrorClass::Validation,
        ModuleFailure { .. } | ModuleCrash(_) => ErrorClass::Module,
        JobOutputMissing { .. } | IncompatibleArchive { .. } | ArchiveLocked | ArchiveIo(_) => ErrorClass::Io,
        JobTimeout { .. } | JobCancelled { .. } => ErrorClass::Cancelled,
        Internal(_) => ErrorClass::Internal,
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ArchiveIo(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_public_contract() {
        assert_eq!(classify_error(&EngineError::PipelineCycle(vec!["a".into()])), ErrorClass::Validation);
        assert_eq!(classify_error(&EngineError::ModuleCrash("boom".into())), ErrorClass::Module);
        assert_eq!(classify_error(&EngineError::ArchiveLocked), ErrorClass::Io);
        assert_eq!(classify_error(&EngineError::JobTimeout { job_hash: "h".into(), timeout_ms: 5 }),
                   ErrorClass::Cancelled);
    }
}
