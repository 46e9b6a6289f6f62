//! Controller de pipeline: readiness por campo, propagación y callbacks.
//!
//! Contrato de propagación:
//! - Todas las mutaciones de slots ocurren desde el hilo dueño del controller.
//! - Un cambio (inputs del pipeline, outputs de un step) se aplica como un
//!   tick lógico: primero se publican todos los updates de slots, después se
//!   disparan los callbacks. Los handlers ven un snapshot coherente.
//! - Setear un input del pipeline invalida transitivamente los outputs
//!   aguas abajo dentro del mismo tick.

use log::debug;
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::processor::{JobCompletion, JobTask, Processor};
use super::state::{FieldRef, PipelineState, SlotStatus};
use super::structure::PipelineStructure;
use crate::context::ExecutionEnv;
use crate::errors::EngineError;
use crate::values::{Value, ValueMap, ValueOrigin};

/// Observador de transiciones. Los callbacks nunca bloquean la ejecución de
/// módulos: se invocan desde el hilo del controller, fuera de todo lock.
pub trait PipelineListener: Send {
    fn pipeline_inputs_changed(&mut self, _fields: &[String]) {}
    fn step_inputs_changed(&mut self, _step_id: &str, _fields: &[String]) {}
    fn step_outputs_changed(&mut self, _step_id: &str, _fields: &[String]) {}
    fn pipeline_outputs_changed(&mut self, _fields: &[String]) {}
}

/// Updates acumulados de un tick, agrupados por tipo de callback.
#[derive(Default)]
struct TickEvents {
    pipeline_inputs: BTreeSet<String>,
    step_inputs: BTreeMap<String, BTreeSet<String>>,
    step_outputs: BTreeMap<String, BTreeSet<String>>,
    pipeline_outputs: BTreeSet<String>,
}

pub struct PipelineController {
    structure: Arc<PipelineStructure>,
    env: Arc<ExecutionEnv>,
    state: PipelineState,
    processor: Box<dyn Processor>,
    listeners: Vec<Box<dyn PipelineListener>>,
    /// job_id → step_id de jobs despachados sin terminación consumida.
    active: HashMap<Uuid, String>,
    job_timeout: Option<Duration>,
}

impl PipelineController {
    pub fn new(structure: Arc<PipelineStructure>,
               env: Arc<ExecutionEnv>,
               processor: Box<dyn Processor>)
               -> Result<Self, EngineError> {
        let state = PipelineState::for_structure(&structure);
        let mut controller = Self { structure,
                                    env,
                                    state,
                                    processor,
                                    listeners: Vec::new(),
                                    active: HashMap::new(),
                                    job_timeout: None };
        // Literales por defecto de la declaración se aplican como primer tick.
        let defaults: BTreeMap<String, Json> =
            controller.structure
                      .pipeline_inputs
                      .values()
                      .filter_map(|input| input.default.clone().map(|d| (input.name.clone(), d)))
                      .collect();
        if !defaults.is_empty() {
            controller.set_pipeline_inputs(defaults)?;
        }
        Ok(controller)
    }

    pub fn structure(&self) -> &Arc<PipelineStructure> {
        &self.structure
    }

    pub fn add_listener(&mut self, listener: Box<dyn PipelineListener>) {
        self.listeners.push(listener);
    }

    pub fn set_job_timeout(&mut self, timeout: Option<Duration>) {
        self.job_timeout = timeout;
    }

    /// Setea inputs del pipeline desde literales JSON. La validación contra el
    /// schema se devuelve síncronamente; nada muta si algún literal es
    /// inválido.
    pub fn set_pipeline_inputs(&mut self, inputs: BTreeMap<String, Json>) -> Result<(), EngineError> {
        let mut resolved: BTreeMap<String, Arc<Value>> = BTreeMap::new();
        for (name, literal) in inputs {
            let spec = self.structure.pipeline_inputs.get(&name).ok_or_else(|| {
                EngineError::InvalidPipeline(format!("unknown pipeline input '{name}'"))
            })?;
            let value = self.env.values.register_value(&spec.schema,
                                                       literal,
                                                       ValueOrigin::External { label: format!("pipeline_input:{name}") })?;
            resolved.insert(name, value);
        }
        self.set_pipeline_input_values(resolved)
    }

    /// Variante con valores ya registrados (p. ej. resueltos desde un alias).
    pub fn set_pipeline_input_values(&mut self,
                                     inputs: BTreeMap<String, Arc<Value>>)
                                     -> Result<(), EngineError> {
        // Validación completa antes de mutar.
        for (name, value) in &inputs {
            let spec = self.structure.pipeline_inputs.get(name).ok_or_else(|| {
                EngineError::InvalidPipeline(format!("unknown pipeline input '{name}'"))
            })?;
            if !self.env.types.is_subtype(value.type_name(), &spec.schema.type_name)? {
                return Err(EngineError::SchemaMismatch { field: name.clone(),
                                                         expected: spec.schema.type_name.clone(),
                                                         found: value.type_name().to_string() });
            }
        }

        let mut events = TickEvents::default();
        let mut touched_steps: BTreeSet<String> = BTreeSet::new();
        for (name, value) in &inputs {
            let spec = &self.structure.pipeline_inputs[name];
            if self.state.set(&FieldRef::PipelineInput(name.clone()), Some(value.id), SlotStatus::Set) {
                events.pipeline_inputs.insert(name.clone());
            }
            for (step_id, field) in &spec.targets {
                let field_ref = FieldRef::StepInput { step_id: step_id.clone(),
                                                      field: field.clone() };
                if self.state.set(&field_ref, Some(value.id), SlotStatus::Set) {
                    events.step_inputs.entry(step_id.clone()).or_default().insert(field.clone());
                    touched_steps.insert(step_id.clone());
                }
            }
        }

        self.invalidate_downstream(&touched_steps, &mut events);
        self.fire(events);
        Ok(())
    }

    /// Invalida outputs (y consumidores transitivos) de los steps tocados,
    /// recorriendo etapas en orden para que el tick sea determinista.
    fn invalidate_downstream(&mut self, touched: &BTreeSet<String>, events: &mut TickEvents) {
        let mut affected: BTreeSet<String> = touched.clone();
        for stage in self.structure.stages.clone() {
            for step_id in stage {
                if !affected.contains(&step_id) {
                    continue;
                }
                let fields: Vec<String> =
                    self.structure.steps[&step_id].outputs_schema.keys().cloned().collect();
                for field in fields {
                    let out_ref = FieldRef::StepOutput { step_id: step_id.clone(),
                                                         field: field.clone() };
                    if self.state.invalidate(&out_ref) {
                        events.step_outputs.entry(step_id.clone()).or_default().insert(field.clone());
                    }
                    for (consumer, consumer_field) in self.structure.consumers_of(&step_id, &field) {
                        let in_ref = FieldRef::StepInput { step_id: consumer.clone(),
                                                           field: consumer_field.clone() };
                        if self.state.invalidate(&in_ref) {
                            events.step_inputs.entry(consumer.clone()).or_default().insert(consumer_field);
                        }
                        affected.insert(consumer);
                    }
                    for name in self.structure.exported_as(&step_id, &field) {
                        if self.state.invalidate(&FieldRef::PipelineOutput(name.clone())) {
                            events.pipeline_outputs.insert(name);
                        }
                    }
                }
            }
        }
    }

    pub fn step_is_ready(&self, step_id: &str) -> bool {
        self.missing_inputs(step_id).is_empty()
    }

    fn missing_inputs(&self, step_id: &str) -> Vec<String> {
        let step = match self.structure.steps.get(step_id) {
            Some(step) => step,
            None => return vec![format!("unknown step '{step_id}'")],
        };
        step.inputs_schema
            .iter()
            .filter(|(field, schema)| {
                let slot = self.state.get(&FieldRef::StepInput { step_id: step_id.to_string(),
                                                                 field: (*field).clone() });
                !slot.is_set() && !(schema.optional || schema.default.is_some())
            })
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// Despacha un step listo al processor. Falla con `StepNotReady` si algún
    /// input requerido no está seteado o quedó inválido.
    pub fn process_step(&mut self, step_id: &str, comment: &str) -> Result<Uuid, EngineError> {
        let missing = self.missing_inputs(step_id);
        if !missing.is_empty() {
            return Err(EngineError::StepNotReady { step_id: step_id.to_string(),
                                                   missing });
        }
        let step = self.structure.step(step_id)?;

        let mut inputs: ValueMap = BTreeMap::new();
        for field in step.inputs_schema.keys() {
            let slot = self.state.get(&FieldRef::StepInput { step_id: step_id.to_string(),
                                                             field: field.clone() });
            if let Some(value_id) = slot.value_id {
                if slot.status == SlotStatus::Set {
                    inputs.insert(field.clone(), self.env.values.get(value_id)?);
                }
            }
        }

        let job_id = Uuid::new_v4();
        debug!("dispatching step '{step_id}' as job {job_id}");
        self.processor.dispatch(JobTask { job_id,
                                          step_id: step_id.to_string(),
                                          manifest: step.manifest.clone(),
                                          inputs,
                                          comment: comment.to_string(),
                                          timeout: self.job_timeout })?;
        self.active.insert(job_id, step_id.to_string());
        Ok(job_id)
    }

    /// Cancelación cooperativa: los jobs aún no iniciados terminan
    /// `cancelled`; los en vuelo corren hasta su fin.
    pub fn cancel(&mut self) {
        self.processor.cancel();
    }

    /// Consume terminaciones hasta ver todas las solicitadas. Con
    /// `sync_outputs`, los outputs de cada step exitoso se publican como un
    /// tick atómico (ningún step de la etapa n+1 observa una etapa n
    /// parcial).
    pub fn wait_for(&mut self,
                    job_ids: &[Uuid],
                    sync_outputs: bool)
                    -> Result<Vec<JobCompletion>, EngineError> {
        let mut wanted: BTreeSet<Uuid> = job_ids.iter().copied().collect();
        let mut collected = Vec::new();

        while !wanted.is_empty() {
            let completion = match self.processor.next_completion(Duration::from_millis(50)) {
                Some(completion) => completion,
                None => {
                    if self.active.is_empty() {
                        return Err(EngineError::Internal(format!(
                            "waiting on {} job(s) with no dispatches in flight",
                            wanted.len()
                        )));
                    }
                    continue;
                }
            };

            self.active.remove(&completion.job_id);
            match &completion.result {
                Ok(outputs) => {
                    if sync_outputs {
                        self.publish_step_outputs(&completion.step_id, outputs);
                    }
                }
                Err(err) => {
                    debug!("step '{}' finished with error: {err}", completion.step_id);
                    self.mark_step_outputs_invalid(&completion.step_id);
                }
            }
            wanted.remove(&completion.job_id);
            collected.push(completion);
        }
        Ok(collected)
    }

    /// Publica los outputs de un step y su propagación como un único tick.
    fn publish_step_outputs(&mut self, step_id: &str, outputs: &ValueMap) {
        let mut events = TickEvents::default();
        for (field, value) in outputs {
            let out_ref = FieldRef::StepOutput { step_id: step_id.to_string(),
                                                 field: field.clone() };
            if self.state.set(&out_ref, Some(value.id), SlotStatus::Set) {
                events.step_outputs.entry(step_id.to_string()).or_default().insert(field.clone());
            }
            for (consumer, consumer_field) in self.structure.consumers_of(step_id, field) {
                let in_ref = FieldRef::StepInput { step_id: consumer.clone(),
                                                   field: consumer_field.clone() };
                if self.state.set(&in_ref, Some(value.id), SlotStatus::Set) {
                    events.step_inputs.entry(consumer).or_default().insert(consumer_field);
                }
            }
            for name in self.structure.exported_as(step_id, field) {
                if self.state.set(&FieldRef::PipelineOutput(name.clone()), Some(value.id), SlotStatus::Set) {
                    events.pipeline_outputs.insert(name);
                }
            }
        }
        self.fire(events);
    }

    fn mark_step_outputs_invalid(&mut self, step_id: &str) {
        let mut events = TickEvents::default();
        let fields: Vec<String> = match self.structure.steps.get(step_id) {
            Some(step) => step.outputs_schema.keys().cloned().collect(),
            None => return,
        };
        for field in fields {
            let out_ref = FieldRef::StepOutput { step_id: step_id.to_string(),
                                                 field: field.clone() };
            let value_id = self.state.get(&out_ref).value_id;
            if self.state.set(&out_ref, value_id, SlotStatus::Invalid) {
                events.step_outputs.entry(step_id.to_string()).or_default().insert(field);
            }
        }
        self.fire(events);
    }

    /// Dispara callbacks con los updates ya publicados (snapshot coherente).
    fn fire(&mut self, events: TickEvents) {
        if self.listeners.is_empty() {
            return;
        }
        let pipeline_inputs: Vec<String> = events.pipeline_inputs.into_iter().collect();
        let pipeline_outputs: Vec<String> = events.pipeline_outputs.into_iter().collect();
        for listener in &mut self.listeners {
            if !pipeline_inputs.is_empty() {
                listener.pipeline_inputs_changed(&pipeline_inputs);
            }
            for (step_id, fields) in &events.step_inputs {
                let fields: Vec<String> = fields.iter().cloned().collect();
                listener.step_inputs_changed(step_id, &fields);
            }
            for (step_id, fields) in &events.step_outputs {
                let fields: Vec<String> = fields.iter().cloned().collect();
                listener.step_outputs_changed(step_id, &fields);
            }
            if !pipeline_outputs.is_empty() {
                listener.pipeline_outputs_changed(&pipeline_outputs);
            }
        }
    }

    pub fn pipeline_is_finished(&self) -> bool {
        self.structure
            .pipeline_outputs
            .keys()
            .all(|name| self.state.get(&FieldRef::PipelineOutput(name.clone())).is_set())
    }

    pub fn pipeline_outputs(&self) -> Result<BTreeMap<String, Arc<Value>>, EngineError> {
        let mut outputs = BTreeMap::new();
        for name in self.structure.pipeline_outputs.keys() {
            let slot = self.state.get(&FieldRef::PipelineOutput(name.clone()));
            if let (SlotStatus::Set, Some(value_id)) = (slot.status, slot.value_id) {
                outputs.insert(name.clone(), self.env.values.get(value_id)?);
            }
        }
        Ok(outputs)
    }

    pub fn slot(&self, field: &FieldRef) -> &super::state::ValueSlot {
        self.state.get(field)
    }

    /// Ejecuta el pipeline etapa por etapa hasta terminar. El primer error
    /// aborta; los outputs de steps ya completados quedan persistidos
    /// (content-addressed, reutilizables).
    pub fn run_to_completion(&mut self,
                             comment: &str)
                             -> Result<BTreeMap<String, Arc<Value>>, EngineError> {
        for stage in self.structure.stages.clone() {
            let mut job_ids = Vec::with_capacity(stage.len());
            for step_id in &stage {
                job_ids.push(self.process_step(step_id, comment)?);
            }
            let completions = self.wait_for(&job_ids, true)?;
            for completion in completions {
                if let Err(err) = completion.result {
                    return Err(err);
                }
            }
        }
        self.pipeline_outputs()
    }
}
