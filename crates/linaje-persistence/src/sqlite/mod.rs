//! Store relacional embebido (Diesel sobre SQLite, un solo archivo).
//!
//! Paridad 1:1 con los backends en memoria del core: mismos contratos de
//! `DataStore` / `AliasStore` / `JobStore` / `WorkflowStore`, con
//! deduplicación por hash vía PK y el historial de aliases versionado por
//! `rev`. Un único writer por archive (SQLite + busy_timeout); los bloqueos
//! se reintentan con backoff acotado y terminan en `ArchiveLocked` si
//! persisten. Las migraciones embebidas corren al abrir; una
//! `format_version` desconocida hacia adelante es fatal.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::sqlite::SqliteConnection;
use log::debug;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use linaje_core::archive::{AliasArchive, AliasEntry, AliasStore, ArchiveInfo, ArchiveKind,
                           DataArchive, DataStore, JobArchive, JobStore, WorkflowArchive,
                           WorkflowStore};
use linaje_core::constants::ARCHIVE_FORMAT_VERSION;
use linaje_core::jobs::{JobRecord, JobStatus};
use linaje_core::pipeline::PipelineDeclaration;
use linaje_core::values::StoredValue;
use linaje_core::EngineError;

use crate::error::{with_retry, PersistenceError};
use crate::migrations::run_pending_migrations;
use crate::schema::{aliases, archive_meta, jobs, pipelines, values_store};

pub type SqlitePool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type SqlitePooledConnection = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

/// Proveedor abstracto de conexiones (inyectable en tests).
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<SqlitePooledConnection, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: SqlitePool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<SqlitePooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Pragmas aplicados a cada conexión del pool.
#[derive(Debug)]
struct SqlitePragmas;

impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        use diesel::connection::SimpleConnection;
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(r2d2::Error::QueryError)
    }
}

/// Construye el pool sobre el archivo dado y corre migraciones pendientes.
pub fn build_pool(db_path: &Path, max_size: u32) -> Result<SqlitePool, PersistenceError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PersistenceError::TransientIo(format!("create {parent:?}: {e}")))?;
    }
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy().to_string());
    let pool = r2d2::Pool::builder()
        .max_size(max_size.max(1))
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    let mut conn = pool.get()
                       .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
    run_pending_migrations(&mut conn)?;
    Ok(pool)
}

pub struct SqliteStore<P: ConnectionProvider = PoolProvider> {
    provider: P,
    archive_id: Uuid,
    db_path: PathBuf,
}

impl<P: ConnectionProvider> std::fmt::Debug for SqliteStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("archive_id", &self.archive_id)
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl SqliteStore<PoolProvider> {
    /// Abre (o crea) el archive en `db_path`: migraciones + verificación de
    /// versión + identidad del archive.
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        let pool = build_pool(db_path, 4)?;
        Self::with_provider(PoolProvider { pool }, db_path)
    }
}

impl<P: ConnectionProvider> SqliteStore<P> {
    pub fn with_provider(provider: P, db_path: &Path) -> Result<Self, EngineError> {
        let archive_id = Self::init_meta(&provider)?;
        debug!("opened sqlite archive {archive_id} at {db_path:?}");
        Ok(Self { provider,
                  archive_id,
                  db_path: db_path.to_path_buf() })
    }

    fn init_meta(provider: &P) -> Result<Uuid, PersistenceError> {
        let mut conn = provider.connection()?;
        conn.immediate_transaction::<_, PersistenceError, _>(|conn| {
            let version: Option<String> = archive_meta::table.filter(archive_meta::key.eq("format_version"))
                                                             .select(archive_meta::value)
                                                             .first(conn)
                                                             .optional()
                                                             .map_err(PersistenceError::from)?;
            match version {
                Some(raw) => {
                    let found: i64 = raw.parse().map_err(|_| {
                                            PersistenceError::Corrupt(format!("format_version '{raw}'"))
                                        })?;
                    if found > ARCHIVE_FORMAT_VERSION {
                        return Err(PersistenceError::IncompatibleArchive { found,
                                                                           supported: ARCHIVE_FORMAT_VERSION });
                    }
                }
                None => {
                    diesel::insert_into(archive_meta::table)
                        .values((archive_meta::key.eq("format_version"),
                                 archive_meta::value.eq(ARCHIVE_FORMAT_VERSION.to_string())))
                        .execute(conn)
                        .map_err(PersistenceError::from)?;
                }
            }

            let archive_id: Option<String> = archive_meta::table.filter(archive_meta::key.eq("archive_id"))
                                                                .select(archive_meta::value)
                                                                .first(conn)
                                                                .optional()
                                                                .map_err(PersistenceError::from)?;
            match archive_id {
                Some(raw) => Uuid::parse_str(&raw)
                    .map_err(|_| PersistenceError::Corrupt(format!("archive_id '{raw}'"))),
                None => {
                    let id = Uuid::new_v4();
                    diesel::insert_into(archive_meta::table)
                        .values((archive_meta::key.eq("archive_id"), archive_meta::value.eq(id.to_string())))
                        .execute(conn)
                        .map_err(PersistenceError::from)?;
                    Ok(id)
                }
            }
        })
    }

    fn info_for(&self, kind: ArchiveKind) -> ArchiveInfo {
        ArchiveInfo { archive_id: self.archive_id,
                      kind,
                      config: json!({ "backend": "sqlite", "path": self.db_path.to_string_lossy() }) }
    }

    fn conn(&self) -> Result<SqlitePooledConnection, PersistenceError> {
        self.provider.connection()
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
                                     .map_err(|e| PersistenceError::Corrupt(format!("timestamp '{raw}': {e}")))
}

fn status_tag(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Success => "success",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        JobStatus::TimedOut => "timed_out",
    }
}

// ---------------------------------------------------------------------------
// Datos
// ---------------------------------------------------------------------------

impl<P: ConnectionProvider> DataArchive for SqliteStore<P> {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Data)
    }

    fn contains(&self, value_hash: &str) -> Result<bool, EngineError> {
        let found = with_retry(|| {
            let mut conn = self.conn()?;
            values_store::table.filter(values_store::value_hash.eq(value_hash))
                               .count()
                               .get_result::<i64>(&mut conn)
                               .map_err(PersistenceError::from)
        })?;
        Ok(found > 0)
    }

    fn load_value(&self, value_hash: &str) -> Result<Option<StoredValue>, EngineError> {
        let record: Option<String> = with_retry(|| {
            let mut conn = self.conn()?;
            values_store::table.filter(values_store::value_hash.eq(value_hash))
                               .select(values_store::record)
                               .first(&mut conn)
                               .optional()
                               .map_err(PersistenceError::from)
        })?;
        match record {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PersistenceError::Corrupt(format!("value {value_hash}: {e}")).into()),
            None => Ok(None),
        }
    }

    fn iter_values(&self) -> Result<Vec<String>, EngineError> {
        Ok(with_retry(|| {
            let mut conn = self.conn()?;
            values_store::table.select(values_store::value_hash)
                               .order(values_store::value_hash.asc())
                               .load(&mut conn)
                               .map_err(PersistenceError::from)
        })?)
    }

    fn load_value_by_id(&self, value_id: Uuid) -> Result<Option<StoredValue>, EngineError> {
        let record: Option<String> = with_retry(|| {
            let mut conn = self.conn()?;
            values_store::table.filter(values_store::value_id.eq(value_id.to_string()))
                               .select(values_store::record)
                               .first(&mut conn)
                               .optional()
                               .map_err(PersistenceError::from)
        })?;
        match record {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PersistenceError::Corrupt(format!("value id {value_id}: {e}")).into()),
            None => Ok(None),
        }
    }
}

impl<P: ConnectionProvider> DataStore for SqliteStore<P> {
    fn write_value(&self, value: &StoredValue) -> Result<(), EngineError> {
        let record = serde_json::to_string(value).map_err(|e| EngineError::Internal(e.to_string()))?;
        with_retry(|| {
            let mut conn = self.conn()?;
            // dedup por PK: segunda escritura del mismo hash es no-op
            diesel::insert_or_ignore_into(values_store::table)
                .values((values_store::value_hash.eq(&value.value_hash),
                         values_store::value_id.eq(value.value_id.to_string()),
                         values_store::record.eq(&record)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------------

impl<P: ConnectionProvider> AliasArchive for SqliteStore<P> {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Alias)
    }

    fn lookup_alias(&self, name: &str) -> Result<Option<Uuid>, EngineError> {
        let row: Option<String> = with_retry(|| {
            let mut conn = self.conn()?;
            aliases::table.filter(aliases::alias.eq(name))
                          .order(aliases::rev.desc())
                          .select(aliases::value_id)
                          .first(&mut conn)
                          .optional()
                          .map_err(PersistenceError::from)
        })?;
        match row {
            Some(raw) => Uuid::parse_str(&raw)
                .map(Some)
                .map_err(|_| PersistenceError::Corrupt(format!("alias value id '{raw}'")).into()),
            None => Ok(None),
        }
    }

    fn list_aliases(&self) -> Result<Vec<AliasEntry>, EngineError> {
        let rows: Vec<(String, String, i64, String)> = with_retry(|| {
            let mut conn = self.conn()?;
            aliases::table.select((aliases::alias, aliases::value_id, aliases::rev, aliases::ts))
                          .order((aliases::alias.asc(), aliases::rev.asc()))
                          .load(&mut conn)
                          .map_err(PersistenceError::from)
        })?;
        // una entrada por alias: la de mayor rev
        let mut current: Vec<AliasEntry> = Vec::new();
        for (alias, value_id, rev, ts) in rows {
            let entry = AliasEntry { alias,
                                     value_id: Uuid::parse_str(&value_id).map_err(|_| {
                                                   EngineError::ArchiveIo(format!("corrupt alias id '{value_id}'"))
                                               })?,
                                     rev: rev as u64,
                                     ts: parse_ts(&ts)? };
            match current.last_mut() {
                Some(last) if last.alias == entry.alias => *last = entry,
                _ => current.push(entry),
            }
        }
        Ok(current)
    }

    fn alias_history(&self, name: &str) -> Result<Vec<AliasEntry>, EngineError> {
        let rows: Vec<(String, String, i64, String)> = with_retry(|| {
            let mut conn = self.conn()?;
            aliases::table.filter(aliases::alias.eq(name))
                          .select((aliases::alias, aliases::value_id, aliases::rev, aliases::ts))
                          .order(aliases::rev.asc())
                          .load(&mut conn)
                          .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|(alias, value_id, rev, ts)| {
                Ok(AliasEntry { alias,
                                value_id: Uuid::parse_str(&value_id).map_err(|_| {
                                              EngineError::ArchiveIo(format!("corrupt alias id '{value_id}'"))
                                          })?,
                                rev: rev as u64,
                                ts: parse_ts(&ts)? })
            })
            .collect()
    }
}

impl<P: ConnectionProvider> AliasStore for SqliteStore<P> {
    fn write_alias(&self, name: &str, value_id: Uuid) -> Result<AliasEntry, EngineError> {
        let ts = Utc::now();
        let rev = with_retry(|| {
            let mut conn = self.conn()?;
            conn.immediate_transaction::<_, PersistenceError, _>(|conn| {
                let max_rev: Option<i64> = aliases::table.filter(aliases::alias.eq(name))
                                                         .select(diesel::dsl::max(aliases::rev))
                                                         .first(conn)
                                                         .map_err(PersistenceError::from)?;
                let rev = max_rev.unwrap_or(0) + 1;
                diesel::insert_into(aliases::table)
                    .values((aliases::alias.eq(name),
                             aliases::value_id.eq(value_id.to_string()),
                             aliases::rev.eq(rev),
                             aliases::ts.eq(ts.to_rfc3339())))
                    .execute(conn)
                    .map_err(PersistenceError::from)?;
                Ok(rev)
            })
        })?;
        Ok(AliasEntry { alias: name.to_string(),
                        value_id,
                        rev: rev as u64,
                        ts })
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

impl<P: ConnectionProvider> JobArchive for SqliteStore<P> {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Job)
    }

    fn lookup_job(&self, job_hash: &str) -> Result<Option<JobRecord>, EngineError> {
        let record: Option<String> = with_retry(|| {
            let mut conn = self.conn()?;
            jobs::table.filter(jobs::job_hash.eq(job_hash))
                       .select(jobs::record)
                       .first(&mut conn)
                       .optional()
                       .map_err(PersistenceError::from)
        })?;
        match record {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PersistenceError::Corrupt(format!("job {job_hash}: {e}")).into()),
            None => Ok(None),
        }
    }

    fn list_jobs(&self) -> Result<Vec<String>, EngineError> {
        Ok(with_retry(|| {
            let mut conn = self.conn()?;
            jobs::table.select(jobs::job_hash)
                       .order(jobs::job_hash.asc())
                       .load(&mut conn)
                       .map_err(PersistenceError::from)
        })?)
    }
}

impl<P: ConnectionProvider> JobStore for SqliteStore<P> {
    fn record_job(&self, record: &JobRecord) -> Result<(), EngineError> {
        let raw = serde_json::to_string(record).map_err(|e| EngineError::Internal(e.to_string()))?;
        with_retry(|| {
            let mut conn = self.conn()?;
            conn.immediate_transaction::<_, PersistenceError, _>(|conn| {
                let existing: Option<String> = jobs::table.filter(jobs::job_hash.eq(&record.job_hash))
                                                          .select(jobs::status)
                                                          .first(conn)
                                                          .optional()
                                                          .map_err(PersistenceError::from)?;
                // inmutable una vez exitoso; un failed puede ser reemplazado
                if existing.as_deref() == Some("success") {
                    return Ok(());
                }
                diesel::replace_into(jobs::table)
                    .values((jobs::job_hash.eq(&record.job_hash),
                             jobs::status.eq(status_tag(record.status)),
                             jobs::record.eq(&raw)))
                    .execute(conn)
                    .map_err(PersistenceError::from)?;
                Ok(())
            })
        })?;
        Ok(())
    }

    fn retain_job_comment(&self, job_hash: &str, comment: &str) -> Result<(), EngineError> {
        let mut record = self.lookup_job(job_hash)?
                             .ok_or_else(|| EngineError::UnknownValue(format!("job {job_hash}")))?;
        record.comment = comment.to_string();
        let raw = serde_json::to_string(&record).map_err(|e| EngineError::Internal(e.to_string()))?;
        with_retry(|| {
            let mut conn = self.conn()?;
            diesel::update(jobs::table.filter(jobs::job_hash.eq(job_hash)))
                .set(jobs::record.eq(&raw))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

impl<P: ConnectionProvider> WorkflowArchive for SqliteStore<P> {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Workflow)
    }

    fn list_pipelines(&self) -> Result<Vec<String>, EngineError> {
        Ok(with_retry(|| {
            let mut conn = self.conn()?;
            pipelines::table.select(pipelines::name)
                            .order(pipelines::name.asc())
                            .load(&mut conn)
                            .map_err(PersistenceError::from)
        })?)
    }

    fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDeclaration>, EngineError> {
        let raw: Option<String> = with_retry(|| {
            let mut conn = self.conn()?;
            pipelines::table.filter(pipelines::name.eq(name))
                            .select(pipelines::declaration)
                            .first(&mut conn)
                            .optional()
                            .map_err(PersistenceError::from)
        })?;
        match raw {
            Some(raw) => PipelineDeclaration::from_json_str(&raw).map(Some),
            None => Ok(None),
        }
    }
}

impl<P: ConnectionProvider> WorkflowStore for SqliteStore<P> {
    fn write_pipeline(&self, declaration: &PipelineDeclaration) -> Result<(), EngineError> {
        let raw = serde_json::to_string(&declaration.to_json())
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        with_retry(|| {
            let mut conn = self.conn()?;
            diesel::replace_into(pipelines::table)
                .values((pipelines::name.eq(&declaration.pipeline_name), pipelines::declaration.eq(&raw)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(())
    }
}
