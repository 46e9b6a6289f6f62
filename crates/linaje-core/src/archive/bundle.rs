//! Export/import de archives como un único blob CBOR canónico.
//!
//! El bundle conserva el set de value hashes, los mapeos alias → value id
//! (historial incluido) y los job records, de modo que exportar y re-importar
//! en un contexto fresco preserva hashes, aliases y jobs (round-trip).

use serde::{Deserialize, Serialize};

use super::{AliasArchive, AliasEntry, AliasStore, DataArchive, DataStore, JobArchive, JobStore};
use crate::constants::ARCHIVE_FORMAT_VERSION;
use crate::errors::EngineError;
use crate::hashing;
use crate::jobs::JobRecord;
use crate::values::StoredValue;

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub format_version: i64,
    pub values: Vec<StoredValue>,
    pub aliases: Vec<AliasEntry>,
    pub jobs: Vec<JobRecord>,
}

/// Serializa el contenido completo de los archives a un blob CBOR.
pub fn export_bundle(data: &dyn DataArchive,
                     aliases: &dyn AliasArchive,
                     jobs: &dyn JobArchive)
                     -> Result<Vec<u8>, EngineError> {
    let mut values = Vec::new();
    for hash in data.iter_values()? {
        if let Some(stored) = data.load_value(&hash)? {
            values.push(stored);
        }
    }

    let mut alias_entries = Vec::new();
    for entry in aliases.list_aliases()? {
        // historial completo, no sólo el mapeo vigente
        alias_entries.extend(aliases.alias_history(&entry.alias)?);
    }

    let mut job_records = Vec::new();
    for job_hash in jobs.list_jobs()? {
        if let Some(record) = jobs.lookup_job(&job_hash)? {
            job_records.push(record);
        }
    }

    let bundle = ArchiveBundle { format_version: ARCHIVE_FORMAT_VERSION,
                                 values,
                                 aliases: alias_entries,
                                 jobs: job_records };
    let json = serde_json::to_value(&bundle).map_err(|e| EngineError::Internal(e.to_string()))?;
    hashing::encode_canonical(&json)
}

/// Importa un blob producido por `export_bundle` en los stores destino.
/// Las escrituras son idempotentes por hash, así que importar dos veces es
/// inocuo. El historial de aliases se reproduce en orden de rev.
pub fn import_bundle(blob: &[u8],
                     data: &dyn DataStore,
                     aliases: &dyn AliasStore,
                     jobs: &dyn JobStore)
                     -> Result<ArchiveBundle, EngineError> {
    let json = hashing::decode_canonical(blob)?;
    let bundle: ArchiveBundle =
        serde_json::from_value(json).map_err(|e| EngineError::ArchiveIo(format!("invalid bundle: {e}")))?;
    if bundle.format_version > ARCHIVE_FORMAT_VERSION {
        return Err(EngineError::IncompatibleArchive { found: bundle.format_version,
                                                      supported: ARCHIVE_FORMAT_VERSION });
    }

    for value in &bundle.values {
        data.write_value(value)?;
    }

    let mut history = bundle.aliases.clone();
    history.sort_by(|a, b| a.alias.cmp(&b.alias).then(a.rev.cmp(&b.rev)));
    for entry in &history {
        // Re-importar es inocuo: se saltan entradas de historial ya presentes.
        let existing = aliases.alias_history(&entry.alias)?;
        if existing.iter().any(|e| e.rev == entry.rev && e.value_id == entry.value_id) {
            continue;
        }
        aliases.write_alias(&entry.alias, entry.value_id)?;
    }

    for record in &bundle.jobs {
        jobs.record_job(record)?;
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{MemoryAliasStore, MemoryDataStore, MemoryJobStore};
    use crate::values::{StoredValue, ValueOrigin, ValueSchema};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn sample_value(payload: serde_json::Value) -> StoredValue {
        let bytes = crate::hashing::encode_canonical(&payload).unwrap();
        StoredValue { value_hash: crate::hashing::hash_bytes(&bytes),
                      value_id: Uuid::new_v4(),
                      schema: ValueSchema::new("any"),
                      payload,
                      size: bytes.len() as u64,
                      origin: ValueOrigin::External { label: "test".to_string() },
                      metadata: BTreeMap::new(),
                      created_at: Utc::now() }
    }

    #[test]
    fn round_trip_preserves_hashes_aliases_and_jobs() {
        let data = MemoryDataStore::new();
        let aliases = MemoryAliasStore::new();
        let jobs = MemoryJobStore::new();

        let v = sample_value(json!({ "x": 1 }));
        data.write_value(&v).unwrap();
        aliases.write_alias("my_value", v.value_id).unwrap();
        let record = JobRecord { job_hash: "1e20ff".to_string(),
                                 manifest_hash: "1e20aa".to_string(),
                                 module_type: "noop".to_string(),
                                 module_config: BTreeMap::new(),
                                 inputs: BTreeMap::new(),
                                 outputs: BTreeMap::from([("y".to_string(), v.value_hash.clone())]),
                                 output_ids: BTreeMap::new(),
                                 started_at: Utc::now(),
                                 finished_at: Utc::now(),
                                 runtime_ms: 3,
                                 comment: String::new(),
                                 status: crate::jobs::JobStatus::Success,
                                 error: None };
        jobs.record_job(&record).unwrap();

        let blob = export_bundle(&data, &aliases, &jobs).unwrap();

        let data2 = MemoryDataStore::new();
        let aliases2 = MemoryAliasStore::new();
        let jobs2 = MemoryJobStore::new();
        import_bundle(&blob, &data2, &aliases2, &jobs2).unwrap();

        assert_eq!(data2.iter_values().unwrap(), data.iter_values().unwrap());
        assert_eq!(aliases2.lookup_alias("my_value").unwrap(), Some(v.value_id));
        assert_eq!(jobs2.lookup_job("1e20ff").unwrap().unwrap().outputs, record.outputs);
    }

    #[test]
    fn forward_version_is_rejected() {
        let data = MemoryDataStore::new();
        let aliases = MemoryAliasStore::new();
        let jobs = MemoryJobStore::new();
        let bundle = ArchiveBundle { format_version: ARCHIVE_FORMAT_VERSION + 1,
                                     values: vec![],
                                     aliases: vec![],
                                     jobs: vec![] };
        let json = serde_json::to_value(&bundle).unwrap();
        let blob = crate::hashing::encode_canonical(&json).unwrap();
        let err = import_bundle(&blob, &data, &aliases, &jobs).unwrap_err();
        assert!(matches!(err, EngineError::IncompatibleArchive { .. }));
    }
}
