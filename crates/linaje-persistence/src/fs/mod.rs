//! Archive filesystem content-addressed.
//!
//! Layout bajo la raíz del store:
//! - `format` — versión del layout; versiones desconocidas se rechazan.
//! - `archive_id` — identidad estable del archive.
//! - `.lock` — lock de escritor único (un proceso escritor por archive).
//! - `values/<s1>/<s2>/<hash>/{meta.json, payload.cbor}` — sharding por
//!   prefijo del digest (salteando el prefijo multihash, común a todos).
//! - `aliases/aliases.log` — historial append-only (JSON lines); el índice
//!   vigente se reconstruye al abrir.
//! - `jobs/<job_hash>.json` — job records.
//! - `workflows/<name>.json` — declaraciones de pipeline.
//!
//! Crash-safety: toda escritura va a un `*.tmp-<uuid>` y se renombra
//! atómicamente; los temporales huérfanos se recolectan al abrir.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

use linaje_core::archive::{AliasArchive, AliasEntry, AliasStore, ArchiveInfo, ArchiveKind,
                           DataArchive, DataStore, JobArchive, JobStore, WorkflowArchive,
                           WorkflowStore};
use linaje_core::constants::ARCHIVE_FORMAT_VERSION;
use linaje_core::hashing;
use linaje_core::jobs::{JobRecord, JobStatus};
use linaje_core::pipeline::PipelineDeclaration;
use linaje_core::values::StoredValue;
use linaje_core::EngineError;

/// Metadatos persistidos junto al payload canónico de cada valor.
#[derive(Serialize, Deserialize)]
struct ValueMeta {
    value_hash: String,
    value_id: Uuid,
    schema: linaje_core::ValueSchema,
    size: u64,
    origin: linaje_core::ValueOrigin,
    metadata: std::collections::BTreeMap<String, serde_json::Value>,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
    archive_id: Uuid,
    /// Índice vigente + historial de aliases, reconstruido del log al abrir.
    aliases: RwLock<HashMap<String, Vec<AliasEntry>>>,
    lock_path: PathBuf,
}

impl FilesystemStore {
    /// Abre (o crea) el archive en `root`. Toma el lock de escritor único:
    /// si otro proceso lo tiene, reintenta con backoff acotado y termina en
    /// `ArchiveLocked`.
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        fs::create_dir_all(root.join("values"))?;
        fs::create_dir_all(root.join("aliases"))?;
        fs::create_dir_all(root.join("jobs"))?;
        fs::create_dir_all(root.join("workflows"))?;

        let format_path = root.join("format");
        match fs::read_to_string(&format_path) {
            Ok(raw) => {
                let found: i64 = raw.trim()
                                    .parse()
                                    .map_err(|_| EngineError::ArchiveIo(format!("corrupt format file: '{raw}'")))?;
                if found > ARCHIVE_FORMAT_VERSION {
                    return Err(EngineError::IncompatibleArchive { found,
                                                                  supported: ARCHIVE_FORMAT_VERSION });
                }
            }
            Err(_) => fs::write(&format_path, format!("{ARCHIVE_FORMAT_VERSION}\n"))?,
        }

        let id_path = root.join("archive_id");
        let archive_id = match fs::read_to_string(&id_path) {
            Ok(raw) => Uuid::parse_str(raw.trim())
                .map_err(|_| EngineError::ArchiveIo(format!("corrupt archive_id: '{raw}'")))?,
            Err(_) => {
                let id = Uuid::new_v4();
                fs::write(&id_path, format!("{id}\n"))?;
                id
            }
        };

        let lock_path = root.join(".lock");
        acquire_writer_lock(&lock_path)?;

        let store = Self { root: root.to_path_buf(),
                           archive_id,
                           aliases: RwLock::new(HashMap::new()),
                           lock_path };
        store.collect_orphan_temps();
        store.rebuild_alias_index()?;
        debug!("opened filesystem archive {archive_id} at {root:?}");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn info_for(&self, kind: ArchiveKind) -> ArchiveInfo {
        ArchiveInfo { archive_id: self.archive_id,
                      kind,
                      config: json!({ "backend": "filesystem", "path": self.root.to_string_lossy() }) }
    }

    /// Directorio de un valor: sharding de dos niveles sobre el digest,
    /// salteando el prefijo multihash (idéntico en todos los hashes).
    fn value_dir(&self, value_hash: &str) -> PathBuf {
        let digest = value_hash.get(4..).unwrap_or(value_hash);
        let s1 = digest.get(0..2).unwrap_or("xx");
        let s2 = digest.get(2..4).unwrap_or("xx");
        self.root.join("values").join(s1).join(s2).join(value_hash)
    }

    fn alias_log_path(&self) -> PathBuf {
        self.root.join("aliases").join("aliases.log")
    }

    fn job_path(&self, job_hash: &str) -> PathBuf {
        self.root.join("jobs").join(format!("{job_hash}.json"))
    }

    fn rebuild_alias_index(&self) -> Result<(), EngineError> {
        let path = self.alias_log_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(&path)?;
        let mut index: HashMap<String, Vec<AliasEntry>> = HashMap::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AliasEntry = serde_json::from_str(line).map_err(|e| {
                EngineError::ArchiveIo(format!("corrupt alias log at line {}: {e}", n + 1))
            })?;
            index.entry(entry.alias.clone()).or_default().push(entry);
        }
        for entries in index.values_mut() {
            entries.sort_by_key(|e| e.rev);
        }
        *self.aliases.write().expect("alias index poisoned") = index;
        Ok(())
    }

    /// Borra temporales huérfanos de escrituras interrumpidas.
    fn collect_orphan_temps(&self) {
        fn walk(dir: &Path) {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => return,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path);
                } else if path.file_name()
                              .and_then(|n| n.to_str())
                              .map(|n| n.contains(".tmp-"))
                              .unwrap_or(false)
                {
                    warn!("removing orphan temp file {path:?}");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        for area in ["values", "jobs", "workflows", "aliases"] {
            walk(&self.root.join(area));
        }
    }
}

/// Escritura atómica: staging a `*.tmp-<uuid>` + rename.
fn atomic_write(target: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let parent = target.parent()
                       .ok_or_else(|| EngineError::ArchiveIo(format!("no parent for {target:?}")))?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!("{}.tmp-{}",
                                  target.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
                                  Uuid::new_v4()));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, target)?;
    Ok(())
}

/// Lock de escritor único con backoff acotado.
fn acquire_writer_lock(lock_path: &Path) -> Result<(), EngineError> {
    let mut attempts = 0;
    loop {
        match fs::OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                return Ok(());
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if attempts >= 5 {
                    return Err(EngineError::ArchiveLocked);
                }
                attempts += 1;
                std::thread::sleep(std::time::Duration::from_millis(50 * attempts));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

impl Drop for FilesystemStore {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

// ---------------------------------------------------------------------------
// Datos
// ---------------------------------------------------------------------------

impl DataArchive for FilesystemStore {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Data)
    }

    fn contains(&self, value_hash: &str) -> Result<bool, EngineError> {
        Ok(self.value_dir(value_hash).join("meta.json").exists())
    }

    fn load_value(&self, value_hash: &str) -> Result<Option<StoredValue>, EngineError> {
        let dir = self.value_dir(value_hash);
        let meta_path = dir.join("meta.json");
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: ValueMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)
            .map_err(|e| EngineError::ArchiveIo(format!("corrupt value meta {value_hash}: {e}")))?;
        let payload_bytes = fs::read(dir.join("payload.cbor"))?;
        let payload = hashing::decode_canonical(&payload_bytes)?;
        Ok(Some(StoredValue { value_hash: meta.value_hash,
                              value_id: meta.value_id,
                              schema: meta.schema,
                              payload,
                              size: meta.size,
                              origin: meta.origin,
                              metadata: meta.metadata,
                              created_at: meta.created_at }))
    }

    fn iter_values(&self) -> Result<Vec<String>, EngineError> {
        let mut hashes = Vec::new();
        let values_root = self.root.join("values");
        for s1 in read_dirs(&values_root)? {
            for s2 in read_dirs(&s1)? {
                for value_dir in read_dirs(&s2)? {
                    if let Some(name) = value_dir.file_name().and_then(|n| n.to_str()) {
                        if value_dir.join("meta.json").exists() {
                            hashes.push(name.to_string());
                        }
                    }
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

impl DataStore for FilesystemStore {
    fn write_value(&self, value: &StoredValue) -> Result<(), EngineError> {
        let dir = self.value_dir(&value.value_hash);
        if dir.join("meta.json").exists() {
            // at-most-once por hash
            return Ok(());
        }
        let payload_bytes = hashing::encode_canonical(&value.payload)?;
        let meta = ValueMeta { value_hash: value.value_hash.clone(),
                               value_id: value.value_id,
                               schema: value.schema.clone(),
                               size: value.size,
                               origin: value.origin.clone(),
                               metadata: value.metadata.clone(),
                               created_at: value.created_at };
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| EngineError::Internal(e.to_string()))?;
        atomic_write(&dir.join("payload.cbor"), &payload_bytes)?;
        atomic_write(&dir.join("meta.json"), &meta_json)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------------

impl AliasArchive for FilesystemStore {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Alias)
    }

    fn lookup_alias(&self, name: &str) -> Result<Option<Uuid>, EngineError> {
        Ok(self.aliases
               .read()
               .expect("alias index poisoned")
               .get(name)
               .and_then(|entries| entries.last())
               .map(|e| e.value_id))
    }

    fn list_aliases(&self) -> Result<Vec<AliasEntry>, EngineError> {
        let mut current: Vec<AliasEntry> = self.aliases
                                               .read()
                                               .expect("alias index poisoned")
                                               .values()
                                               .filter_map(|entries| entries.last().cloned())
                                               .collect();
        current.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(current)
    }

    fn alias_history(&self, name: &str) -> Result<Vec<AliasEntry>, EngineError> {
        Ok(self.aliases
               .read()
               .expect("alias index poisoned")
               .get(name)
               .cloned()
               .unwrap_or_default())
    }
}

impl AliasStore for FilesystemStore {
    fn write_alias(&self, name: &str, value_id: Uuid) -> Result<AliasEntry, EngineError> {
        let mut index = self.aliases.write().expect("alias index poisoned");
        let entries = index.entry(name.to_string()).or_default();
        let entry = AliasEntry { alias: name.to_string(),
                                 value_id,
                                 rev: entries.last().map(|e| e.rev).unwrap_or(0) + 1,
                                 ts: Utc::now() };
        let line = serde_json::to_string(&entry).map_err(|e| EngineError::Internal(e.to_string()))?;
        let mut log = fs::OpenOptions::new().create(true).append(true).open(self.alias_log_path())?;
        writeln!(log, "{line}")?;
        log.sync_all()?;
        entries.push(entry.clone());
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

impl JobArchive for FilesystemStore {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Job)
    }

    fn lookup_job(&self, job_hash: &str) -> Result<Option<JobRecord>, EngineError> {
        let path = self.job_path(job_hash);
        if !path.exists() {
            return Ok(None);
        }
        serde_json::from_str(&fs::read_to_string(&path)?)
            .map(Some)
            .map_err(|e| EngineError::ArchiveIo(format!("corrupt job record {job_hash}: {e}")))
    }

    fn list_jobs(&self) -> Result<Vec<String>, EngineError> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(self.root.join("jobs"))? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(hash) = name.strip_suffix(".json") {
                    hashes.push(hash.to_string());
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}

impl JobStore for FilesystemStore {
    fn record_job(&self, record: &JobRecord) -> Result<(), EngineError> {
        if let Some(existing) = self.lookup_job(&record.job_hash)? {
            // inmutable una vez exitoso; un failed puede ser reemplazado
            if existing.status == JobStatus::Success {
                return Ok(());
            }
        }
        let raw = serde_json::to_vec_pretty(record).map_err(|e| EngineError::Internal(e.to_string()))?;
        atomic_write(&self.job_path(&record.job_hash), &raw)
    }

    fn retain_job_comment(&self, job_hash: &str, comment: &str) -> Result<(), EngineError> {
        let mut record = self.lookup_job(job_hash)?
                             .ok_or_else(|| EngineError::UnknownValue(format!("job {job_hash}")))?;
        record.comment = comment.to_string();
        let raw = serde_json::to_vec_pretty(&record).map_err(|e| EngineError::Internal(e.to_string()))?;
        atomic_write(&self.job_path(job_hash), &raw)
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

impl WorkflowArchive for FilesystemStore {
    fn info(&self) -> ArchiveInfo {
        self.info_for(ArchiveKind::Workflow)
    }

    fn list_pipelines(&self) -> Result<Vec<String>, EngineError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join("workflows"))? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(name) = name.strip_suffix(".json") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDeclaration>, EngineError> {
        let path = self.root.join("workflows").join(format!("{name}.json"));
        if !path.exists() {
            return Ok(None);
        }
        PipelineDeclaration::from_json_str(&fs::read_to_string(&path)?).map(Some)
    }
}

impl WorkflowStore for FilesystemStore {
    fn write_pipeline(&self, declaration: &PipelineDeclaration) -> Result<(), EngineError> {
        let raw = serde_json::to_vec_pretty(&declaration.to_json())
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        atomic_write(&self.root.join("workflows").join(format!("{}.json", declaration.pipeline_name)),
                     &raw)
    }
}
