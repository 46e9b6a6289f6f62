//! API del contexto: aliases con historial, export/import y operaciones.

use linaje_core::module::{Module, ModuleOutputs};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::{Context, EngineError, Manifest};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug)]
struct UpperModule;
impl Module for UpperModule {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("value".to_string(), ValueSchema::new("string"))])
    }
    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("rendered".to_string(), ValueSchema::new("string"))])
    }
    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let s = inputs["value"].payload.as_str().unwrap();
        Ok(BTreeMap::from([("rendered".to_string(), json!(s.to_uppercase()))]))
    }
}

fn context_with_render() -> Context {
    let mut builder = Context::builder("api");
    builder.modules_mut().register("render.upper", |_| Ok(Box::new(UpperModule))).unwrap();
    builder.operations_mut()
           .register_entry("pretty_print", "string", Manifest::new("render.upper"))
           .unwrap();
    builder.build()
}

#[test]
fn alias_points_to_latest_value_and_keeps_history() {
    let ctx = Context::in_memory();
    let schema = ValueSchema::new("string");
    let v1 = ctx.register_external(&schema, json!("first"), "user").unwrap();
    let v2 = ctx.register_external(&schema, json!("second"), "user").unwrap();

    ctx.store_value(&v1, Some("my_table")).unwrap();
    assert_eq!(ctx.resolve_alias("my_table").unwrap(), v1.id);

    // re-apuntar avanza el historial sin perder la entrada vieja
    ctx.store_value(&v2, Some("my_table")).unwrap();
    assert_eq!(ctx.resolve_alias("my_table").unwrap(), v2.id);
    let history = ctx.alias_history("my_table").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].value_id, v1.id);
    assert_eq!(history[1].value_id, v2.id);

    // resolución vía referencia `alias:`
    let resolved = ctx.get_value("alias:my_table").unwrap();
    assert_eq!(resolved.id, v2.id);

    let err = ctx.resolve_alias("missing").unwrap_err();
    assert!(matches!(err, EngineError::UnknownAlias(_)));
}

#[test]
fn stored_values_dedup_on_disk_surface() {
    let ctx = Context::in_memory();
    let schema = ValueSchema::new("dict");
    let a = ctx.register_external(&schema, json!({ "k": 1 }), "user").unwrap();
    let b = ctx.register_external(&schema, json!({ "k": 1 }), "user").unwrap();
    assert_eq!(a.value_hash, b.value_hash);

    ctx.store_value(&a, None).unwrap();
    ctx.store_value(&b, None).unwrap();
    assert_eq!(ctx.data_store().iter_values().unwrap().len(), 1);
}

#[test]
fn opaque_values_cannot_be_stored() {
    let ctx = Context::in_memory();
    let opaque = ctx.register_external(&ValueSchema::new("opaque"), json!({ "handle": 7 }), "user")
                    .unwrap();
    let err = ctx.store_value(&opaque, None).unwrap_err();
    assert!(matches!(err, EngineError::OpaqueNotPersistable { data_type } if data_type == "opaque"));
}

#[test]
fn export_import_round_trip_preserves_everything() {
    let ctx = Context::in_memory();
    let schema = ValueSchema::new("string");
    let v = ctx.register_external(&schema, json!("exported"), "user").unwrap();
    ctx.store_value(&v, Some("the_value")).unwrap();

    let blob = ctx.export_archive().unwrap();

    let fresh = Context::in_memory();
    fresh.import_archive(&blob).unwrap();

    assert_eq!(fresh.resolve_alias("the_value").unwrap(), v.id);
    assert_eq!(fresh.data_store().iter_values().unwrap(),
               ctx.data_store().iter_values().unwrap());
    // el valor rehidratado conserva hash y payload
    let rehydrated = fresh.get_value("alias:the_value").unwrap();
    assert_eq!(rehydrated.value_hash, v.value_hash);
    assert_eq!(rehydrated.payload, json!("exported"));
}

#[test]
fn apply_operation_dispatches_by_value_type() {
    let ctx = context_with_render();
    let value = ctx.register_external(&ValueSchema::new("string"), json!("quiet"), "user").unwrap();

    let (execution, output_field) =
        ctx.apply_operation("pretty_print", &value, BTreeMap::new(), "render it").unwrap();
    assert_eq!(output_field, "rendered");
    assert_eq!(execution.outputs["rendered"].payload, json!("QUIET"));

    // la operación hereda el cache de jobs
    let (again, _) = ctx.apply_operation("pretty_print", &value, BTreeMap::new(), "").unwrap();
    assert!(again.from_cache);
    assert_eq!(again.job_hash, execution.job_hash);
}

#[test]
fn apply_operation_without_entry_fails_with_both_keys() {
    let ctx = context_with_render();
    let value = ctx.register_external(&ValueSchema::new("boolean"), json!(true), "user").unwrap();
    let err = ctx.apply_operation("pretty_print", &value, BTreeMap::new(), "").unwrap_err();
    assert!(matches!(err,
                     EngineError::OperationNotSupported { ref data_type, .. } if data_type == "boolean"));
}

#[test]
fn named_pipelines_are_validated_before_registration() {
    let ctx = Context::in_memory();
    let bad = linaje_core::PipelineDeclaration::from_json(&json!({
        "pipeline_name": "broken",
        "steps": [ { "step_id": "s1", "module_type": "does.not.exist" } ]
    })).unwrap();
    assert!(ctx.register_pipeline(&bad).is_err());
    // nada quedó registrado
    assert!(ctx.list_pipelines().unwrap().is_empty());
}
