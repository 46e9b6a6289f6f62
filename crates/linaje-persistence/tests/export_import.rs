//! Round-trip de export/import entre contextos respaldados en disco, y
//! linaje total: todo valor no-externo resuelve a su job record.

use linaje_core::module::{Module, ModuleOutputs};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::{Context, EngineError, Manifest, ValueOrigin};
use linaje_persistence::{open_context_at, StoreBackend};
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[derive(Debug)]
struct Doubler;
impl Module for Doubler {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("n".to_string(), ValueSchema::new("integer"))])
    }
    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("doubled".to_string(), ValueSchema::new("integer"))])
    }
    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let n = inputs["n"].payload.as_i64().unwrap();
        Ok(BTreeMap::from([("doubled".to_string(), json!(n * 2))]))
    }
}

fn disk_context(root: &std::path::Path, backend: StoreBackend) -> Context {
    let mut builder = open_context_at(root, "test", backend).unwrap();
    builder.modules_mut().register("math.double", |_| Ok(Box::new(Doubler))).unwrap();
    builder.build()
}

#[test]
fn export_import_round_trip_across_fs_contexts() {
    let src_dir = TempDir::new().unwrap();
    let dst_dir = TempDir::new().unwrap();

    let src = disk_context(src_dir.path(), StoreBackend::Filesystem);
    let manifest = Manifest::new("math.double");
    let n = src.register_external(&ValueSchema::new("integer"), json!(21), "user").unwrap();
    src.store_value(&n, Some("the_input")).unwrap();
    let exec = src.run_job(&manifest, &BTreeMap::from([("n".to_string(), n.clone())]), "double it")
                  .unwrap();
    assert_eq!(exec.outputs["doubled"].payload, json!(42));

    let blob = src.export_archive().unwrap();

    let dst = disk_context(dst_dir.path(), StoreBackend::Filesystem);
    dst.import_archive(&blob).unwrap();

    // hashes, aliases y job records idénticos en el contexto fresco
    assert_eq!(dst.data_store().iter_values().unwrap(),
               src.data_store().iter_values().unwrap());
    assert_eq!(dst.resolve_alias("the_input").unwrap(), n.id);
    let record = dst.get_job_record(&exec.job_hash).unwrap().unwrap();
    assert_eq!(record.outputs["doubled"], exec.outputs["doubled"].value_hash);

    // re-someter el mismo job en el destino se sirve del cache importado
    let n2 = dst.get_value("alias:the_input").unwrap();
    let again = dst.run_job(&manifest, &BTreeMap::from([("n".to_string(), n2)]), "").unwrap();
    assert!(again.from_cache);
    assert_eq!(again.job_hash, exec.job_hash);
}

#[test]
fn export_import_bridges_backends() {
    let src_dir = TempDir::new().unwrap();
    let dst_dir = TempDir::new().unwrap();

    let src = disk_context(src_dir.path(), StoreBackend::Filesystem);
    let v = src.register_external(&ValueSchema::new("string"), json!("cross"), "user").unwrap();
    src.store_value(&v, Some("ported")).unwrap();
    let blob = src.export_archive().unwrap();

    // el bundle es agnóstico del backend: fs → sqlite
    let dst = disk_context(dst_dir.path(), StoreBackend::Sqlite);
    dst.import_archive(&blob).unwrap();
    assert_eq!(dst.resolve_alias("ported").unwrap(), v.id);
    assert_eq!(dst.get_value("alias:ported").unwrap().value_hash, v.value_hash);
}

#[test]
fn every_job_produced_value_resolves_to_its_record() {
    let dir = TempDir::new().unwrap();
    let ctx = disk_context(dir.path(), StoreBackend::Sqlite);
    let manifest = Manifest::new("math.double");
    let n = ctx.register_external(&ValueSchema::new("integer"), json!(5), "user").unwrap();
    ctx.run_job(&manifest, &BTreeMap::from([("n".to_string(), n)]), "lineage").unwrap();

    // linaje total sobre el contenido persistido
    for hash in ctx.data_store().iter_values().unwrap() {
        let stored = ctx.data_store().load_value(&hash).unwrap().unwrap();
        if let ValueOrigin::Job { job_hash, output } = stored.origin {
            let record = ctx.get_job_record(&job_hash)
                            .unwrap()
                            .unwrap_or_else(|| panic!("job {job_hash} missing for value {hash}"));
            assert_eq!(record.outputs[&output], hash);
        }
    }
}
