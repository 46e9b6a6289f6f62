//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y de ahí al
//! `EngineError` del core (clase Io, salvo bloqueos que son retryables).

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use linaje_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("not found")]
    NotFound,
    #[error("archive is locked by another writer")]
    Locked,
    #[error("incompatible archive: format version {found}, supported up to {supported}")]
    IncompatibleArchive { found: i64, supported: i64 },
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                if message.contains("database is locked") || message.contains("database table is locked") {
                    return Self::Locked;
                }
                match kind {
                    DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(message),
                    other => Self::Unknown(format!("db error kind {other:?}: {message}")),
                }
            }
            DieselError::DeserializationError(e) => Self::Corrupt(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Corrupt(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<PersistenceError> for EngineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Locked => EngineError::ArchiveLocked,
            PersistenceError::IncompatibleArchive { found, supported } => {
                EngineError::IncompatibleArchive { found, supported }
            }
            other => EngineError::ArchiveIo(other.to_string()),
        }
    }
}

/// Determina si conviene reintentar con backoff.
pub(crate) fn is_retryable(err: &PersistenceError) -> bool {
    match err {
        PersistenceError::Locked => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("database is locked") || m.contains("busy") || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry acotado con backoff lineal corto (hasta 3 intentos).
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                log::warn!("retryable archive error (attempt {}): {:?} -> sleeping {}ms",
                           attempts + 1,
                           e,
                           delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}
