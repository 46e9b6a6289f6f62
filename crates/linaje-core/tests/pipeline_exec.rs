//! Ejecución de pipelines end-to-end con stores en memoria (escenario NAND).

use linaje_core::module::{Module, ModuleOutputs};
use linaje_core::pipeline::{FieldRef, PipelineDeclaration, PipelineListener, SlotStatus};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::{Context, EngineError};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct AndModule;
impl Module for AndModule {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("a".to_string(), ValueSchema::new("boolean")),
                        ("b".to_string(), ValueSchema::new("boolean"))])
    }
    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("y".to_string(), ValueSchema::new("boolean"))])
    }
    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let a = inputs["a"].payload.as_bool().unwrap();
        let b = inputs["b"].payload.as_bool().unwrap();
        Ok(BTreeMap::from([("y".to_string(), json!(a && b))]))
    }
}

#[derive(Debug)]
struct NotModule;
impl Module for NotModule {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("a".to_string(), ValueSchema::new("boolean"))])
    }
    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("y".to_string(), ValueSchema::new("boolean"))])
    }
    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let a = inputs["a"].payload.as_bool().unwrap();
        Ok(BTreeMap::from([("y".to_string(), json!(!a))]))
    }
}

fn logic_context() -> Context {
    let mut builder = Context::builder("logic");
    builder.modules_mut().register("logic.and", |_| Ok(Box::new(AndModule))).unwrap();
    builder.modules_mut().register("logic.not", |_| Ok(Box::new(NotModule))).unwrap();
    builder.build()
}

fn nand_declaration() -> PipelineDeclaration {
    PipelineDeclaration::from_json(&json!({
        "pipeline_name": "logic.nand",
        "doc": "NAND armado con AND + NOT",
        "steps": [
            { "step_id": "and", "module_type": "logic.and" },
            { "step_id": "not", "module_type": "logic.not",
              "input_links": { "a": "and.y" } }
        ]
    })).unwrap()
}

#[test]
fn nand_pipeline_computes_and_reruns_without_cache_reuse() {
    let ctx = logic_context();
    let decl = nand_declaration();

    // true AND true → NOT → false
    let outputs = ctx.run_pipeline(&decl,
                                   BTreeMap::from([("a".to_string(), json!(true)),
                                                   ("b".to_string(), json!(true))]),
                                   "nand run 1",
                                   false)
                     .unwrap();
    assert_eq!(outputs["y"].payload, json!(false));

    // inputs distintos ⇒ jobs distintos (nada viene del cache)
    let structure = Arc::new(ctx.compile_pipeline(&decl).unwrap());
    let mut controller = ctx.create_controller(structure, false).unwrap();
    controller.set_pipeline_inputs(BTreeMap::from([("a".to_string(), json!(true)),
                                                   ("b".to_string(), json!(false))]))
              .unwrap();
    let and_job = controller.process_step("and", "nand run 2").unwrap();
    let completions = controller.wait_for(&[and_job], true).unwrap();
    assert!(!completions[0].from_cache);
    let not_job = controller.process_step("not", "nand run 2").unwrap();
    controller.wait_for(&[not_job], true).unwrap();

    assert!(controller.pipeline_is_finished());
    assert_eq!(controller.pipeline_outputs().unwrap()["y"].payload, json!(true));
}

#[test]
fn parallel_processor_reaches_the_same_result() {
    let ctx = logic_context();
    let outputs = ctx.run_pipeline(&nand_declaration(),
                                   BTreeMap::from([("a".to_string(), json!(true)),
                                                   ("b".to_string(), json!(true))]),
                                   "parallel",
                                   true)
                     .unwrap();
    assert_eq!(outputs["y"].payload, json!(false));
}

#[test]
fn step_not_ready_lists_missing_inputs() {
    let ctx = logic_context();
    let structure = Arc::new(ctx.compile_pipeline(&nand_declaration()).unwrap());
    let mut controller = ctx.create_controller(structure, false).unwrap();

    // `not` depende del output de `and`, todavía no seteado
    let err = controller.process_step("not", "").unwrap_err();
    match err {
        EngineError::StepNotReady { step_id, missing } => {
            assert_eq!(step_id, "not");
            assert_eq!(missing, vec!["a"]);
        }
        other => panic!("expected StepNotReady, got {other:?}"),
    }
    assert!(!controller.step_is_ready("not"));
    assert!(!controller.step_is_ready("and"));
}

#[derive(Default)]
struct RecordingListener {
    events: Arc<Mutex<Vec<String>>>,
}

impl PipelineListener for RecordingListener {
    fn pipeline_inputs_changed(&mut self, fields: &[String]) {
        self.events.lock().unwrap().push(format!("pipeline_inputs:{}", fields.join(",")));
    }
    fn step_inputs_changed(&mut self, step_id: &str, fields: &[String]) {
        self.events.lock().unwrap().push(format!("step_inputs:{step_id}:{}", fields.join(",")));
    }
    fn step_outputs_changed(&mut self, step_id: &str, fields: &[String]) {
        self.events.lock().unwrap().push(format!("step_outputs:{step_id}:{}", fields.join(",")));
    }
    fn pipeline_outputs_changed(&mut self, fields: &[String]) {
        self.events.lock().unwrap().push(format!("pipeline_outputs:{}", fields.join(",")));
    }
}

#[test]
fn listeners_observe_each_transition_in_order() {
    let ctx = logic_context();
    let structure = Arc::new(ctx.compile_pipeline(&nand_declaration()).unwrap());
    let mut controller = ctx.create_controller(structure, false).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    controller.add_listener(Box::new(RecordingListener { events: events.clone() }));

    controller.set_pipeline_inputs(BTreeMap::from([("a".to_string(), json!(true)),
                                                   ("b".to_string(), json!(true))]))
              .unwrap();
    {
        let seen = events.lock().unwrap();
        assert_eq!(seen.as_slice(),
                   ["pipeline_inputs:a,b", "step_inputs:and:a,b"]);
    }

    let job = controller.process_step("and", "").unwrap();
    controller.wait_for(&[job], true).unwrap();
    {
        let seen = events.lock().unwrap();
        assert_eq!(seen[2..].to_vec(),
                   vec!["step_inputs:not:a".to_string(), "step_outputs:and:y".to_string()]);
    }
}

#[test]
fn changing_an_input_invalidates_downstream_in_one_tick() {
    let ctx = logic_context();
    let structure = Arc::new(ctx.compile_pipeline(&nand_declaration()).unwrap());
    let mut controller = ctx.create_controller(structure, false).unwrap();

    controller.set_pipeline_inputs(BTreeMap::from([("a".to_string(), json!(true)),
                                                   ("b".to_string(), json!(true))]))
              .unwrap();
    let and_job = controller.process_step("and", "").unwrap();
    controller.wait_for(&[and_job], true).unwrap();
    let not_job = controller.process_step("not", "").unwrap();
    controller.wait_for(&[not_job], true).unwrap();
    assert!(controller.pipeline_is_finished());

    // cambiar un input invalida outputs aguas abajo (y el output del pipeline)
    controller.set_pipeline_inputs(BTreeMap::from([("b".to_string(), json!(false))])).unwrap();
    let and_out = controller.slot(&FieldRef::StepOutput { step_id: "and".to_string(),
                                                          field: "y".to_string() });
    assert_eq!(and_out.status, SlotStatus::Invalid);
    let not_in = controller.slot(&FieldRef::StepInput { step_id: "not".to_string(),
                                                        field: "a".to_string() });
    assert_eq!(not_in.status, SlotStatus::Invalid);
    assert!(!controller.pipeline_is_finished());
    // y el step deja de estar listo hasta re-procesar upstream
    assert!(!controller.step_is_ready("not"));
}

#[test]
fn declaration_defaults_are_applied_at_construction() {
    let ctx = logic_context();
    let decl = PipelineDeclaration::from_json(&json!({
        "pipeline_name": "logic.nand.defaults",
        "steps": [
            { "step_id": "and", "module_type": "logic.and" },
            { "step_id": "not", "module_type": "logic.not",
              "input_links": { "a": "and.y" } }
        ],
        "inputs": { "a": true, "b": true }
    })).unwrap();

    let outputs = ctx.run_pipeline(&decl, BTreeMap::new(), "defaults", false).unwrap();
    assert_eq!(outputs["y"].payload, json!(false));
}
