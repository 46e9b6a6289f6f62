//! Backends en memoria. Paridad 1:1 con los backends persistentes: los tests
//! de contrato corren contra ambos.

use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use uuid::Uuid;

use super::{AliasArchive, AliasEntry, AliasStore, ArchiveInfo, ArchiveKind, DataArchive, DataStore,
            JobArchive, JobStore, WorkflowArchive, WorkflowStore};
use crate::errors::EngineError;
use crate::jobs::JobRecord;
use crate::pipeline::PipelineDeclaration;
use crate::values::StoredValue;

fn memory_info(kind: ArchiveKind) -> ArchiveInfo {
    ArchiveInfo { archive_id: Uuid::new_v4(),
                  kind,
                  config: json!({ "backend": "memory" }) }
}

pub struct MemoryDataStore {
    info: ArchiveInfo,
    values: RwLock<BTreeMap<String, StoredValue>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self { info: memory_info(ArchiveKind::Data),
               values: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataArchive for MemoryDataStore {
    fn info(&self) -> ArchiveInfo {
        self.info.clone()
    }
    fn contains(&self, value_hash: &str) -> Result<bool, EngineError> {
        Ok(self.values.read().expect("poisoned").contains_key(value_hash))
    }
    fn load_value(&self, value_hash: &str) -> Result<Option<StoredValue>, EngineError> {
        Ok(self.values.read().expect("poisoned").get(value_hash).cloned())
    }
    fn iter_values(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.values.read().expect("poisoned").keys().cloned().collect())
    }
}

impl DataStore for MemoryDataStore {
    fn write_value(&self, value: &StoredValue) -> Result<(), EngineError> {
        let mut values = self.values.write().expect("poisoned");
        values.entry(value.value_hash.clone()).or_insert_with(|| value.clone());
        Ok(())
    }
}

pub struct MemoryAliasStore {
    info: ArchiveInfo,
    history: RwLock<HashMap<String, Vec<AliasEntry>>>,
}

impl MemoryAliasStore {
    pub fn new() -> Self {
        Self { info: memory_info(ArchiveKind::Alias),
               history: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryAliasStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasArchive for MemoryAliasStore {
    fn info(&self) -> ArchiveInfo {
        self.info.clone()
    }
    fn lookup_alias(&self, name: &str) -> Result<Option<Uuid>, EngineError> {
        Ok(self.history
               .read()
               .expect("poisoned")
               .get(name)
               .and_then(|entries| entries.last())
               .map(|e| e.value_id))
    }
    fn list_aliases(&self) -> Result<Vec<AliasEntry>, EngineError> {
        let mut current: Vec<AliasEntry> = self.history
                                               .read()
                                               .expect("poisoned")
                                               .values()
                                               .filter_map(|entries| entries.last().cloned())
                                               .collect();
        current.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(current)
    }
    fn alias_history(&self, name: &str) -> Result<Vec<AliasEntry>, EngineError> {
        Ok(self.history.read().expect("poisoned").get(name).cloned().unwrap_or_default())
    }
}

impl AliasStore for MemoryAliasStore {
    fn write_alias(&self, name: &str, value_id: Uuid) -> Result<AliasEntry, EngineError> {
        let mut history = self.history.write().expect("poisoned");
        let entries = history.entry(name.to_string()).or_default();
        let entry = AliasEntry { alias: name.to_string(),
                                 value_id,
                                 rev: entries.len() as u64 + 1,
                                 ts: Utc::now() };
        entries.push(entry.clone());
        Ok(entry)
    }
}

pub struct MemoryJobStore {
    info: ArchiveInfo,
    jobs: RwLock<BTreeMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self { info: memory_info(ArchiveKind::Job),
               jobs: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobArchive for MemoryJobStore {
    fn info(&self) -> ArchiveInfo {
        self.info.clone()
    }
    fn lookup_job(&self, job_hash: &str) -> Result<Option<JobRecord>, EngineError> {
        Ok(self.jobs.read().expect("poisoned").get(job_hash).cloned())
    }
    fn list_jobs(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.jobs.read().expect("poisoned").keys().cloned().collect())
    }
}

impl JobStore for MemoryJobStore {
    fn record_job(&self, record: &JobRecord) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().expect("poisoned");
        // Idempotente sobre jobs exitosos; un record failed puede ser
        // reemplazado por el resultado de un reintento.
        match jobs.get(&record.job_hash) {
            Some(existing) if existing.status == crate::jobs::JobStatus::Success => {}
            _ => {
                jobs.insert(record.job_hash.clone(), record.clone());
            }
        }
        Ok(())
    }
    fn retain_job_comment(&self, job_hash: &str, comment: &str) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().expect("poisoned");
        match jobs.get_mut(job_hash) {
            Some(record) => {
                record.comment = comment.to_string();
                Ok(())
            }
            None => Err(EngineError::UnknownValue(format!("job {job_hash}"))),
        }
    }
}

pub struct MemoryWorkflowStore {
    info: ArchiveInfo,
    pipelines: RwLock<BTreeMap<String, PipelineDeclaration>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self { info: memory_info(ArchiveKind::Workflow),
               pipelines: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for MemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowArchive for MemoryWorkflowStore {
    fn info(&self) -> ArchiveInfo {
        self.info.clone()
    }
    fn list_pipelines(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.pipelines.read().expect("poisoned").keys().cloned().collect())
    }
    fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDeclaration>, EngineError> {
        Ok(self.pipelines.read().expect("poisoned").get(name).cloned())
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    fn write_pipeline(&self, declaration: &PipelineDeclaration) -> Result<(), EngineError> {
        self.pipelines
            .write()
            .expect("poisoned")
            .insert(declaration.pipeline_name.clone(), declaration.clone());
        Ok(())
    }
}
