//! linaje-persistence
//!
//! Backends concretos de la capa de archives del core:
//! - `fs`: archive filesystem content-addressed (sharding por hash, escritura
//!   staged + rename atómico, log de aliases append-only, lock de escritor).
//! - `sqlite`: store relacional embebido en un solo archivo (Diesel),
//!   con migraciones embebidas versionadas y política de retry ante bloqueos.
//! - `config`: resolución de la raíz de datos por contexto desde el entorno.
//!
//! Ambos backends implementan los mismos traits del core que los stores en
//! memoria; el motor no distingue entre ellos.

pub mod config;
pub mod error;
pub mod fs;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use linaje_core::{Context, ContextBuilder, EngineError};

pub use config::{init_dotenv, ContextPaths};
pub use error::PersistenceError;
pub use fs::FilesystemStore;
pub use sqlite::{build_pool, ConnectionProvider, PoolProvider, SqlitePool, SqliteStore};

/// Backend de persistencia de un contexto en disco.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Filesystem,
    Sqlite,
}

/// Ata un `ContextBuilder` a un backend en disco (todas las clases de store
/// sobre el mismo archive).
pub fn bind_backend(builder: ContextBuilder,
                    backend: StoreBackend,
                    paths: &ContextPaths)
                    -> Result<ContextBuilder, EngineError> {
    Ok(match backend {
        StoreBackend::Filesystem => {
            let store = Arc::new(FilesystemStore::open(&paths.store_dir())?);
            builder.with_data_store(store.clone())
                   .with_alias_store(store.clone())
                   .with_job_store(store.clone())
                   .with_workflow_store(store)
        }
        StoreBackend::Sqlite => {
            let store = Arc::new(SqliteStore::open(&paths.db_path())?);
            builder.with_data_store(store.clone())
                   .with_alias_store(store.clone())
                   .with_job_store(store.clone())
                   .with_workflow_store(store)
        }
    })
}

/// Contexto respaldado por un directorio arbitrario (útil en tests y CLI).
pub fn open_context_at(root: &Path,
                       name: &str,
                       backend: StoreBackend)
                       -> Result<ContextBuilder, EngineError> {
    let paths = ContextPaths::at(root, name);
    bind_backend(Context::builder(name), backend, &paths)
}
