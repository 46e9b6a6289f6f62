//! Capa de archives/stores.
//!
//! Un *archive* es una frontera de persistencia de sólo lectura; un *store*
//! es un archive que además acepta escrituras. Los traits viven en el core y
//! las implementaciones concretas (filesystem, relacional embebido) en el
//! crate de persistencia; aquí se incluyen los backends en memoria usados por
//! los tests y por el contexto efímero.
//!
//! Disciplina de escritura: at-most-once por hash de contenido. Escribir dos
//! veces el mismo value hash o job hash es un no-op.

mod bundle;
mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::jobs::JobRecord;
use crate::pipeline::PipelineDeclaration;
use crate::values::StoredValue;

pub use bundle::{export_bundle, import_bundle, ArchiveBundle};
pub use memory::{MemoryAliasStore, MemoryDataStore, MemoryJobStore, MemoryWorkflowStore};

/// Clase de archive (set cerrado).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Data,
    Alias,
    Job,
    Workflow,
    Metadata,
}

/// Identidad + configuración de un archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub archive_id: Uuid,
    pub kind: ArchiveKind,
    pub config: Json,
}

/// Entrada del historial de un alias. El historial es append-only; el mapeo
/// vigente es la entrada de mayor `rev`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub value_id: Uuid,
    pub rev: u64,
    pub ts: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Datos
// ---------------------------------------------------------------------------

pub trait DataArchive: Send + Sync {
    fn info(&self) -> ArchiveInfo;
    fn contains(&self, value_hash: &str) -> Result<bool, EngineError>;
    fn load_value(&self, value_hash: &str) -> Result<Option<StoredValue>, EngineError>;
    /// Hashes de todos los valores almacenados (orden estable).
    fn iter_values(&self) -> Result<Vec<String>, EngineError>;
    /// Búsqueda por value id. Backends con índice propio la sobreescriben;
    /// el default escanea el archive completo.
    fn load_value_by_id(&self, value_id: Uuid) -> Result<Option<StoredValue>, EngineError> {
        for hash in self.iter_values()? {
            if let Some(stored) = self.load_value(&hash)? {
                if stored.value_id == value_id {
                    return Ok(Some(stored));
                }
            }
        }
        Ok(None)
    }
}

pub trait DataStore: DataArchive {
    /// Escritura idempotente: un segundo write del mismo hash es un no-op.
    fn write_value(&self, value: &StoredValue) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------------

pub trait AliasArchive: Send + Sync {
    fn info(&self) -> ArchiveInfo;
    fn lookup_alias(&self, name: &str) -> Result<Option<Uuid>, EngineError>;
    /// Mapeos vigentes (una entrada por alias, la de mayor rev).
    fn list_aliases(&self) -> Result<Vec<AliasEntry>, EngineError>;
    /// Historial completo de un alias, rev ascendente.
    fn alias_history(&self, name: &str) -> Result<Vec<AliasEntry>, EngineError>;
}

pub trait AliasStore: AliasArchive {
    /// Apunta el alias a un nuevo value id; el historial conserva la entrada
    /// anterior.
    fn write_alias(&self, name: &str, value_id: Uuid) -> Result<AliasEntry, EngineError>;
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub trait JobArchive: Send + Sync {
    fn info(&self) -> ArchiveInfo;
    fn lookup_job(&self, job_hash: &str) -> Result<Option<JobRecord>, EngineError>;
    fn list_jobs(&self) -> Result<Vec<String>, EngineError>;
}

pub trait JobStore: JobArchive {
    /// Idempotente por job hash.
    fn record_job(&self, record: &JobRecord) -> Result<(), EngineError>;
    /// Anexa (o reemplaza) el comentario de auditoría de un job ya grabado.
    fn retain_job_comment(&self, job_hash: &str, comment: &str) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// Workflows (declaraciones de pipeline con nombre)
// ---------------------------------------------------------------------------

pub trait WorkflowArchive: Send + Sync {
    fn info(&self) -> ArchiveInfo;
    fn list_pipelines(&self) -> Result<Vec<String>, EngineError>;
    fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDeclaration>, EngineError>;
}

pub trait WorkflowStore: WorkflowArchive {
    fn write_pipeline(&self, declaration: &PipelineDeclaration) -> Result<(), EngineError>;
}
