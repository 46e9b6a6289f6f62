//! Contrato del store relacional embebido: paridad con el backend en memoria.

use chrono::Utc;
use diesel::prelude::*;
use linaje_persistence::{build_pool, SqliteStore};
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;
use uuid::Uuid;

use linaje_core::archive::{AliasArchive, AliasStore, DataArchive, DataStore, JobArchive, JobStore,
                           WorkflowArchive, WorkflowStore};
use linaje_core::pipeline::PipelineDeclaration;
use linaje_core::values::{StoredValue, ValueOrigin, ValueSchema};
use linaje_core::{EngineError, JobRecord, JobStatus};

fn sample_value(payload: serde_json::Value) -> StoredValue {
    let bytes = linaje_core::hashing::encode_canonical(&payload).unwrap();
    StoredValue { value_hash: linaje_core::hashing::hash_bytes(&bytes),
                  value_id: Uuid::new_v4(),
                  schema: ValueSchema::new("any"),
                  payload,
                  size: bytes.len() as u64,
                  origin: ValueOrigin::External { label: "test".to_string() },
                  metadata: BTreeMap::new(),
                  created_at: Utc::now() }
}

#[test]
fn value_roundtrip_with_dedup_and_id_lookup() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("archive.db")).unwrap();

    let v = sample_value(json!({ "columns": ["a"], "rows": [[1]] }));
    store.write_value(&v).unwrap();
    store.write_value(&v).unwrap();

    assert!(store.contains(&v.value_hash).unwrap());
    assert_eq!(store.iter_values().unwrap().len(), 1);

    let by_hash = store.load_value(&v.value_hash).unwrap().unwrap();
    assert_eq!(by_hash.payload, v.payload);
    let by_id = store.load_value_by_id(v.value_id).unwrap().unwrap();
    assert_eq!(by_id.value_hash, v.value_hash);
}

#[test]
fn alias_history_is_versioned_by_rev() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("archive.db")).unwrap();
    let v1 = Uuid::new_v4();
    let v2 = Uuid::new_v4();

    store.write_alias("tabla", v1).unwrap();
    store.write_alias("tabla", v2).unwrap();
    store.write_alias("otra", v1).unwrap();

    assert_eq!(store.lookup_alias("tabla").unwrap(), Some(v2));
    assert_eq!(store.lookup_alias("missing").unwrap(), None);

    let history = store.alias_history("tabla").unwrap();
    assert_eq!(history.iter().map(|e| e.rev).collect::<Vec<_>>(), vec![1, 2]);

    // list_aliases: sólo el mapeo vigente de cada alias
    let current = store.list_aliases().unwrap();
    assert_eq!(current.len(), 2);
    let tabla = current.iter().find(|e| e.alias == "tabla").unwrap();
    assert_eq!(tabla.value_id, v2);
}

#[test]
fn job_records_persist_and_success_is_immutable() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("archive.db")).unwrap();

    let mut record = JobRecord { job_hash: "1e20ff".to_string(),
                                 manifest_hash: "1e20aa".to_string(),
                                 module_type: "test.module".to_string(),
                                 module_config: BTreeMap::new(),
                                 inputs: BTreeMap::from([("a".to_string(), "1e20a1".to_string())]),
                                 outputs: BTreeMap::from([("y".to_string(), "1e20b1".to_string())]),
                                 output_ids: BTreeMap::new(),
                                 started_at: Utc::now(),
                                 finished_at: Utc::now(),
                                 runtime_ms: 5,
                                 comment: "original".to_string(),
                                 status: JobStatus::Success,
                                 error: None };
    store.record_job(&record).unwrap();

    record.comment = "rewrite attempt".to_string();
    store.record_job(&record).unwrap();
    assert_eq!(store.lookup_job("1e20ff").unwrap().unwrap().comment, "original");

    // el comentario sólo cambia por la vía explícita
    store.retain_job_comment("1e20ff", "curated comment").unwrap();
    assert_eq!(store.lookup_job("1e20ff").unwrap().unwrap().comment, "curated comment");
    assert_eq!(store.list_jobs().unwrap(), vec!["1e20ff".to_string()]);
}

#[test]
fn pipelines_are_stored_by_name() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("archive.db")).unwrap();

    let decl = PipelineDeclaration::from_json(&json!({
        "pipeline_name": "logic.nand",
        "steps": [
            { "step_id": "and", "module_type": "logic.and" },
            { "step_id": "not", "module_type": "logic.not", "input_links": { "a": "and.y" } }
        ]
    })).unwrap();
    store.write_pipeline(&decl).unwrap();

    assert_eq!(store.list_pipelines().unwrap(), vec!["logic.nand".to_string()]);
    let loaded = store.get_pipeline("logic.nand").unwrap().unwrap();
    assert_eq!(loaded.steps.len(), 2);
    assert!(store.get_pipeline("missing").unwrap().is_none());
}

#[test]
fn reopening_preserves_archive_identity() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("archive.db");
    let first_id = {
        let store = SqliteStore::open(&db).unwrap();
        DataArchive::info(&store).archive_id
    };
    let store = SqliteStore::open(&db).unwrap();
    assert_eq!(DataArchive::info(&store).archive_id, first_id);
}

#[test]
fn unknown_forward_format_version_is_fatal() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("archive.db");
    {
        let _store = SqliteStore::open(&db).unwrap();
    }
    // adulterar la versión hacia adelante
    {
        let pool = build_pool(&db, 1).unwrap();
        let mut conn = pool.get().unwrap();
        diesel::sql_query("UPDATE archive_meta SET value = '999' WHERE key = 'format_version'")
            .execute(&mut conn)
            .unwrap();
    }
    let err = SqliteStore::open(&db).unwrap_err();
    assert!(matches!(err, EngineError::IncompatibleArchive { found: 999, .. }));
}
