//! Estrategias de ejecución de jobs.
//!
//! El processor es la única frontera de concurrencia del motor:
//! - `SyncProcessor` ejecuta cada job en el hilo del llamador.
//! - `ParallelProcessor` despacha a un pool acotado de workers; los workers
//!   comunican terminaciones por un canal acotado que consume el controller
//!   (sin mutación compartida del estado del pipeline).
//!
//! Ambos consultan el cache de jobs antes de ejecutar: mismo job hash ⇒
//! outputs grabados, sin re-ejecutar el módulo. Cancelación cooperativa: un
//! job ya despachado no se interrumpe; los pendientes terminan `cancelled`.

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::context::ExecutionEnv;
use crate::errors::EngineError;
use crate::jobs::{self, JobRecord, JobStatus};
use crate::module::Manifest;
use crate::values::{StoredValue, Value, ValueMap, ValueOrigin};

/// Unidad de trabajo despachable.
pub struct JobTask {
    pub job_id: Uuid,
    pub step_id: String,
    pub manifest: Manifest,
    pub inputs: ValueMap,
    pub comment: String,
    pub timeout: Option<Duration>,
}

/// Mensaje de terminación publicado por el processor.
pub struct JobCompletion {
    pub job_id: Uuid,
    pub step_id: String,
    pub job_hash: Option<String>,
    pub from_cache: bool,
    pub runtime_ms: u64,
    pub result: Result<ValueMap, EngineError>,
}

/// Resultado de una ejecución directa (sin pasar por un processor).
#[derive(Debug)]
pub struct JobExecution {
    pub job_hash: String,
    pub from_cache: bool,
    pub runtime_ms: u64,
    pub outputs: ValueMap,
}

pub trait Processor: Send {
    fn dispatch(&mut self, task: JobTask) -> Result<(), EngineError>;
    /// Siguiente terminación disponible, esperando hasta `wait`.
    fn next_completion(&mut self, wait: Duration) -> Option<JobCompletion>;
    /// Jobs despachados cuya terminación aún no fue consumida.
    fn pending(&self) -> usize;
    /// Cancelación cooperativa: los jobs no iniciados terminan `cancelled`.
    fn cancel(&mut self) {}
}

/// Ejecuta un job contra el entorno: completa defaults, consulta el cache,
/// corre el módulo si hace falta, persiste outputs y graba el job record.
pub fn execute_job(env: &ExecutionEnv,
                   manifest: &Manifest,
                   inputs: &ValueMap,
                   comment: &str,
                   timeout: Option<Duration>)
                   -> Result<JobExecution, EngineError> {
    let module = env.modules.resolve(manifest)?;
    let inputs = complete_inputs(env, &module.inputs_schema(), inputs)?;

    let input_hashes: BTreeMap<String, String> =
        inputs.iter().map(|(k, v)| (k.clone(), v.value_hash.clone())).collect();
    let job_hash = jobs::job_hash(manifest, &input_hashes)?;

    // Cache de jobs: autoritativo. Un record existente con outputs perdidos
    // es error duro (JobOutputMissing), nunca re-ejecución silenciosa.
    if let Some(record) = env.job_store.lookup_job(&job_hash)? {
        if record.status == JobStatus::Success {
            let outputs = load_recorded_outputs(env, &record)?;
            debug!("job {job_hash} served from cache");
            return Ok(JobExecution { job_hash,
                                     from_cache: true,
                                     runtime_ms: 0,
                                     outputs });
        }
    }

    let started_at = Utc::now();
    let t0 = Instant::now();
    let raw_outputs = match module.process(&inputs) {
        Ok(outputs) => outputs,
        Err(err @ EngineError::ModuleFailure { .. }) => {
            // Fallo de negocio: se graba el job como failed y se propaga.
            let record = JobRecord { job_hash: job_hash.clone(),
                                     manifest_hash: manifest.manifest_hash()?,
                                     module_type: manifest.module_type.clone(),
                                     module_config: manifest.module_config.clone(),
                                     inputs: input_hashes,
                                     outputs: BTreeMap::new(),
                                     output_ids: BTreeMap::new(),
                                     started_at,
                                     finished_at: Utc::now(),
                                     runtime_ms: t0.elapsed().as_millis() as u64,
                                     comment: comment.to_string(),
                                     status: JobStatus::Failed,
                                     error: Some(err.to_string()) };
            env.job_store.record_job(&record)?;
            return Err(err);
        }
        // Cualquier otro error dentro de process es un crash: sin record.
        Err(other) => return Err(EngineError::ModuleCrash(other.to_string())),
    };
    let runtime_ms = t0.elapsed().as_millis() as u64;

    // Registrar + persistir outputs con linaje al job.
    let outputs_schema = module.outputs_schema();
    let mut outputs: ValueMap = BTreeMap::new();
    let mut output_hashes = BTreeMap::new();
    let mut output_ids = BTreeMap::new();
    for (field, schema) in &outputs_schema {
        let payload = raw_outputs.get(field).cloned().ok_or_else(|| {
            EngineError::ModuleCrash(format!("module '{}' produced no output '{field}'",
                                             manifest.module_type))
        })?;
        let value = env.values.register_value(schema,
                                              payload,
                                              ValueOrigin::Job { job_hash: job_hash.clone(),
                                                                 output: field.clone() })?;
        persist_value(env, &value)?;
        output_hashes.insert(field.clone(), value.value_hash.clone());
        output_ids.insert(field.clone(), value.id);
        outputs.insert(field.clone(), value);
    }

    // El timeout no revierte outputs ya persistidos, pero no graba record.
    if let Some(limit) = timeout {
        if t0.elapsed() > limit {
            warn!("job {job_hash} exceeded timeout of {} ms", limit.as_millis());
            return Err(EngineError::JobTimeout { job_hash,
                                                 timeout_ms: limit.as_millis() as u64 });
        }
    }

    let record = JobRecord { job_hash: job_hash.clone(),
                             manifest_hash: manifest.manifest_hash()?,
                             module_type: manifest.module_type.clone(),
                             module_config: manifest.module_config.clone(),
                             inputs: input_hashes,
                             outputs: output_hashes,
                             output_ids,
                             started_at,
                             finished_at: Utc::now(),
                             runtime_ms,
                             comment: comment.to_string(),
                             status: JobStatus::Success,
                             error: None };
    env.job_store.record_job(&record)?;

    Ok(JobExecution { job_hash,
                      from_cache: false,
                      runtime_ms,
                      outputs })
}

/// Valida inputs contra el schema del módulo y completa defaults declarados.
fn complete_inputs(env: &ExecutionEnv,
                   schema: &BTreeMap<String, crate::values::ValueSchema>,
                   inputs: &ValueMap)
                   -> Result<ValueMap, EngineError> {
    let mut complete: ValueMap = BTreeMap::new();
    for (field, field_schema) in schema {
        match inputs.get(field) {
            Some(value) => {
                if !env.types.is_subtype(value.type_name(), &field_schema.type_name)? {
                    return Err(EngineError::SchemaMismatch { field: field.clone(),
                                                             expected: field_schema.type_name.clone(),
                                                             found: value.type_name().to_string() });
                }
                complete.insert(field.clone(), value.clone());
            }
            None => {
                if let Some(default) = &field_schema.default {
                    let value = env.values.register_value(field_schema,
                                                          default.clone(),
                                                          ValueOrigin::External { label: "default".to_string() })?;
                    complete.insert(field.clone(), value);
                } else if !field_schema.optional {
                    return Err(EngineError::SchemaMismatch { field: field.clone(),
                                                             expected: field_schema.type_name.clone(),
                                                             found: "missing".to_string() });
                }
            }
        }
    }
    Ok(complete)
}

fn load_recorded_outputs(env: &ExecutionEnv, record: &JobRecord) -> Result<ValueMap, EngineError> {
    let mut outputs: ValueMap = BTreeMap::new();
    for (field, value_hash) in &record.outputs {
        let value = match env.values.get_by_hash(value_hash) {
            Ok(value) => value,
            Err(_) => match env.data_store.load_value(value_hash)? {
                Some(stored) => env.values.adopt(stored.into_value()),
                None => {
                    return Err(EngineError::JobOutputMissing { job_hash: record.job_hash.clone(),
                                                               field: field.clone(),
                                                               value_hash: value_hash.clone() })
                }
            },
        };
        outputs.insert(field.clone(), value);
    }
    Ok(outputs)
}

fn persist_value(env: &ExecutionEnv, value: &Arc<Value>) -> Result<(), EngineError> {
    if !value.persistable {
        return Err(EngineError::OpaqueNotPersistable { data_type: value.type_name().to_string() });
    }
    env.data_store.write_value(&StoredValue::from_value(value))
}

// ---------------------------------------------------------------------------
// Processor síncrono
// ---------------------------------------------------------------------------

pub struct SyncProcessor {
    env: Arc<ExecutionEnv>,
    done: VecDeque<JobCompletion>,
    cancelled: bool,
}

impl SyncProcessor {
    pub fn new(env: Arc<ExecutionEnv>) -> Self {
        Self { env,
               done: VecDeque::new(),
               cancelled: false }
    }
}

impl Processor for SyncProcessor {
    fn dispatch(&mut self, task: JobTask) -> Result<(), EngineError> {
        let completion = if self.cancelled {
            JobCompletion { job_id: task.job_id,
                            step_id: task.step_id,
                            job_hash: None,
                            from_cache: false,
                            runtime_ms: 0,
                            result: Err(EngineError::JobCancelled { job_hash: String::new() }) }
        } else {
            run_task(&self.env, task)
        };
        self.done.push_back(completion);
        Ok(())
    }

    fn next_completion(&mut self, _wait: Duration) -> Option<JobCompletion> {
        self.done.pop_front()
    }

    fn pending(&self) -> usize {
        self.done.len()
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

fn run_task(env: &ExecutionEnv, task: JobTask) -> JobCompletion {
    match execute_job(env, &task.manifest, &task.inputs, &task.comment, task.timeout) {
        Ok(exec) => JobCompletion { job_id: task.job_id,
                                    step_id: task.step_id,
                                    job_hash: Some(exec.job_hash),
                                    from_cache: exec.from_cache,
                                    runtime_ms: exec.runtime_ms,
                                    result: Ok(exec.outputs) },
        Err(err) => JobCompletion { job_id: task.job_id,
                                    step_id: task.step_id,
                                    job_hash: None,
                                    from_cache: false,
                                    runtime_ms: 0,
                                    result: Err(err) },
    }
}

// ---------------------------------------------------------------------------
// Processor paralelo (pool de workers + canales acotados)
// ---------------------------------------------------------------------------

pub struct ParallelProcessor {
    task_tx: Option<Sender<JobTask>>,
    done_rx: Receiver<JobCompletion>,
    workers: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    in_flight: usize,
}

impl ParallelProcessor {
    pub fn new(env: Arc<ExecutionEnv>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_tx, task_rx) = bounded::<JobTask>(worker_count * 2);
        let (done_tx, done_rx) = bounded::<JobCompletion>(worker_count * 2);
        let cancel = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let task_rx = task_rx.clone();
            let done_tx = done_tx.clone();
            let env = env.clone();
            let cancel = cancel.clone();
            let handle = std::thread::Builder::new()
                .name(format!("linaje-worker-{n}"))
                .spawn(move || {
                    // Un worker corre un process de módulo a la vez; la
                    // cancelación se chequea en la frontera de despacho.
                    while let Ok(task) = task_rx.recv() {
                        let job_id = task.job_id;
                        let step_id = task.step_id.clone();
                        let completion = if cancel.load(Ordering::Relaxed) {
                            JobCompletion { job_id,
                                            step_id,
                                            job_hash: None,
                                            from_cache: false,
                                            runtime_ms: 0,
                                            result: Err(EngineError::JobCancelled { job_hash: String::new() }) }
                        } else {
                            // Un panic dentro de process no puede tumbar el
                            // worker: se reporta como crash del módulo.
                            let env = env.clone();
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run_task(&env, task)))
                                .unwrap_or_else(|_| JobCompletion {
                                    job_id,
                                    step_id,
                                    job_hash: None,
                                    from_cache: false,
                                    runtime_ms: 0,
                                    result: Err(EngineError::ModuleCrash("module panicked".to_string())),
                                })
                        };
                        if done_tx.send(completion).is_err() {
                            break;
                        }
                    }
                })
                .expect("spawn worker thread");
            workers.push(handle);
        }

        Self { task_tx: Some(task_tx),
               done_rx,
               workers,
               cancel,
               in_flight: 0 }
    }
}

impl Processor for ParallelProcessor {
    fn dispatch(&mut self, task: JobTask) -> Result<(), EngineError> {
        let tx = self.task_tx
                     .as_ref()
                     .ok_or_else(|| EngineError::Internal("processor already shut down".to_string()))?;
        tx.send(task).map_err(|_| EngineError::Internal("worker pool disconnected".to_string()))?;
        self.in_flight += 1;
        Ok(())
    }

    fn next_completion(&mut self, wait: Duration) -> Option<JobCompletion> {
        match self.done_rx.recv_timeout(wait) {
            Ok(completion) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(completion)
            }
            Err(_) => None,
        }
    }

    fn pending(&self) -> usize {
        self.in_flight
    }

    fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

impl Drop for ParallelProcessor {
    fn drop(&mut self) {
        // Cerrar el canal de tareas para que los workers terminen su tarea en
        // curso y salgan; no se interrumpe ningún process en vuelo. Se drena
        // el canal de terminaciones para que ningún worker quede bloqueado
        // publicando en un canal lleno.
        self.task_tx.take();
        while self.workers.iter().any(|h| !h.is_finished()) {
            while self.done_rx.try_recv().is_ok() {}
            std::thread::sleep(Duration::from_millis(1));
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
