//! Contexto: fachada que ata registros, stores y ejecución.
//!
//! Un contexto ata exactamente un store de cada clase (datos, aliases, jobs,
//! workflows) con sus archives de lectura, más los registros de data types,
//! module types y operaciones. Los registros se llenan en construcción
//! (registro explícito, sin discovery) y quedan inmutables; varios contextos
//! pueden coexistir en el mismo proceso.

use log::debug;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::archive::{export_bundle, import_bundle, AliasEntry, AliasStore, ArchiveBundle, ArchiveInfo,
                     DataStore, JobStore, MemoryAliasStore, MemoryDataStore, MemoryJobStore,
                     MemoryWorkflowStore, WorkflowStore};
use crate::constants::{CONTEXT_ENV_VAR, DEFAULT_CONTEXT_NAME};
use crate::errors::EngineError;
use crate::jobs::JobRecord;
use crate::module::{Manifest, ModuleTypeRegistry};
use crate::operations::OperationRegistry;
use crate::pipeline::{execute_job, JobCompletion, JobExecution, JobTask, ParallelProcessor,
                      PipelineController, PipelineDeclaration, PipelineStructure, Processor,
                      SyncProcessor};
use crate::types::DataTypeRegistry;
use crate::values::{StoredValue, Value, ValueMap, ValueOrigin, ValueRegistry, ValueSchema};

/// Entorno mínimo que necesita la ejecución de un job. Compartido entre el
/// contexto, los controllers y los workers del processor paralelo.
pub struct ExecutionEnv {
    pub types: Arc<DataTypeRegistry>,
    pub modules: Arc<ModuleTypeRegistry>,
    pub values: Arc<ValueRegistry>,
    pub data_store: Arc<dyn DataStore>,
    pub job_store: Arc<dyn JobStore>,
}

/// Nombre del contexto activo según entorno (`LINAJE_CONTEXT`).
pub fn context_name_from_env() -> String {
    std::env::var(CONTEXT_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONTEXT_NAME.to_string())
}

pub struct ContextBuilder {
    name: String,
    types: DataTypeRegistry,
    modules: ModuleTypeRegistry,
    operations: OperationRegistry,
    data_store: Option<Arc<dyn DataStore>>,
    alias_store: Option<Arc<dyn AliasStore>>,
    job_store: Option<Arc<dyn JobStore>>,
    workflow_store: Option<Arc<dyn WorkflowStore>>,
    worker_count: usize,
}

impl ContextBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               types: DataTypeRegistry::with_core_types(),
               modules: ModuleTypeRegistry::new(),
               operations: OperationRegistry::with_builtin_types(),
               data_store: None,
               alias_store: None,
               job_store: None,
               workflow_store: None,
               worker_count: 4 }
    }

    pub fn types_mut(&mut self) -> &mut DataTypeRegistry {
        &mut self.types
    }

    pub fn modules_mut(&mut self) -> &mut ModuleTypeRegistry {
        &mut self.modules
    }

    pub fn operations_mut(&mut self) -> &mut OperationRegistry {
        &mut self.operations
    }

    pub fn with_data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.data_store = Some(store);
        self
    }

    pub fn with_alias_store(mut self, store: Arc<dyn AliasStore>) -> Self {
        self.alias_store = Some(store);
        self
    }

    pub fn with_job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.workflow_store = Some(store);
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    pub fn build(self) -> Context {
        let types = Arc::new(self.types);
        let values = Arc::new(ValueRegistry::new(types.clone()));
        let env = Arc::new(ExecutionEnv { types,
                                          modules: Arc::new(self.modules),
                                          values,
                                          data_store: self.data_store
                                                          .unwrap_or_else(|| Arc::new(MemoryDataStore::new())),
                                          job_store: self.job_store
                                                         .unwrap_or_else(|| Arc::new(MemoryJobStore::new())) });
        Context { name: self.name,
                  env,
                  alias_store: self.alias_store.unwrap_or_else(|| Arc::new(MemoryAliasStore::new())),
                  workflow_store: self.workflow_store
                                      .unwrap_or_else(|| Arc::new(MemoryWorkflowStore::new())),
                  operations: Arc::new(self.operations),
                  worker_count: self.worker_count,
                  queue: Mutex::new(None) }
    }
}

pub struct Context {
    name: String,
    env: Arc<ExecutionEnv>,
    alias_store: Arc<dyn AliasStore>,
    workflow_store: Arc<dyn WorkflowStore>,
    operations: Arc<OperationRegistry>,
    worker_count: usize,
    /// Processor perezoso para `queue_job` (se crea en el primer encolado).
    queue: Mutex<Option<ParallelProcessor>>,
}

impl Context {
    pub fn builder(name: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(name)
    }

    /// Contexto efímero con stores en memoria.
    pub fn in_memory() -> Self {
        ContextBuilder::new(DEFAULT_CONTEXT_NAME).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Arc<ExecutionEnv> {
        &self.env
    }

    pub fn values(&self) -> &Arc<ValueRegistry> {
        &self.env.values
    }

    pub fn types(&self) -> &Arc<DataTypeRegistry> {
        &self.env.types
    }

    pub fn modules(&self) -> &Arc<ModuleTypeRegistry> {
        &self.env.modules
    }

    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    pub fn data_store(&self) -> &Arc<dyn DataStore> {
        &self.env.data_store
    }

    pub fn alias_store(&self) -> &Arc<dyn AliasStore> {
        &self.alias_store
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.env.job_store
    }

    // -----------------------------------------------------------------------
    // Valores
    // -----------------------------------------------------------------------

    /// Registra un valor externo (aportado por el usuario).
    pub fn register_external(&self,
                             schema: &ValueSchema,
                             payload: Json,
                             label: &str)
                             -> Result<Arc<Value>, EngineError> {
        self.env.values.register_value(schema,
                                       payload,
                                       ValueOrigin::External { label: label.to_string() })
    }

    /// Resuelve una referencia: `alias:NOMBRE`, un value id (UUID) o un value
    /// hash. Cae al archive de datos si el valor no está en memoria.
    pub fn get_value(&self, reference: &str) -> Result<Arc<Value>, EngineError> {
        if let Some(alias) = reference.strip_prefix("alias:") {
            let value_id = self.resolve_alias(alias)?;
            return self.value_by_id(value_id);
        }
        if let Ok(value_id) = Uuid::parse_str(reference) {
            return self.value_by_id(value_id);
        }
        match self.env.values.get_by_hash(reference) {
            Ok(value) => Ok(value),
            Err(_) => match self.env.data_store.load_value(reference)? {
                Some(stored) => Ok(self.env.values.adopt(stored.into_value())),
                None => Err(EngineError::UnknownValue(reference.to_string())),
            },
        }
    }

    fn value_by_id(&self, value_id: Uuid) -> Result<Arc<Value>, EngineError> {
        match self.env.values.get(value_id) {
            Ok(value) => Ok(value),
            Err(_) => match self.env.data_store.load_value_by_id(value_id)? {
                Some(stored) => Ok(self.env.values.adopt(stored.into_value())),
                None => Err(EngineError::UnknownValue(value_id.to_string())),
            },
        }
    }

    /// Persiste un valor en el data store y opcionalmente lo apunta con un
    /// alias. Persistir dos veces el mismo hash es un no-op.
    pub fn store_value(&self, value: &Arc<Value>, alias: Option<&str>) -> Result<(), EngineError> {
        if !value.persistable {
            return Err(EngineError::OpaqueNotPersistable { data_type: value.type_name().to_string() });
        }
        self.env.data_store.write_value(&StoredValue::from_value(value))?;
        if let Some(alias) = alias {
            self.alias_store.write_alias(alias, value.id)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Aliases
    // -----------------------------------------------------------------------

    pub fn resolve_alias(&self, name: &str) -> Result<Uuid, EngineError> {
        self.alias_store
            .lookup_alias(name)?
            .ok_or_else(|| EngineError::UnknownAlias(name.to_string()))
    }

    pub fn list_aliases(&self) -> Result<Vec<AliasEntry>, EngineError> {
        self.alias_store.list_aliases()
    }

    pub fn alias_history(&self, name: &str) -> Result<Vec<AliasEntry>, EngineError> {
        self.alias_store.alias_history(name)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Ejecuta un job síncronamente (con cache). El comentario es obligatorio
    /// por auditabilidad; puede ser vacío.
    pub fn run_job(&self,
                   manifest: &Manifest,
                   inputs: &ValueMap,
                   comment: &str)
                   -> Result<JobExecution, EngineError> {
        execute_job(&self.env, manifest, inputs, comment, None)
    }

    /// Encola un job en el pool de workers del contexto y devuelve su id.
    pub fn queue_job(&self,
                     manifest: &Manifest,
                     inputs: &ValueMap,
                     comment: &str)
                     -> Result<Uuid, EngineError> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let processor = queue.get_or_insert_with(|| {
                                 ParallelProcessor::new(self.env.clone(), self.worker_count)
                             });
        let job_id = Uuid::new_v4();
        processor.dispatch(JobTask { job_id,
                                     step_id: manifest.module_type.clone(),
                                     manifest: manifest.clone(),
                                     inputs: inputs.clone(),
                                     comment: comment.to_string(),
                                     timeout: None })?;
        Ok(job_id)
    }

    /// Espera terminaciones de jobs encolados con `queue_job`.
    pub fn wait_for_queued(&self, job_ids: &[Uuid]) -> Result<Vec<JobCompletion>, EngineError> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let processor = queue.as_mut()
                             .ok_or_else(|| EngineError::Internal("no queued jobs".to_string()))?;
        let mut wanted: Vec<Uuid> = job_ids.to_vec();
        let mut collected = Vec::new();
        while !wanted.is_empty() {
            match processor.next_completion(Duration::from_millis(50)) {
                Some(completion) => {
                    wanted.retain(|id| *id != completion.job_id);
                    collected.push(completion);
                }
                None => {
                    if processor.pending() == 0 {
                        return Err(EngineError::Internal("queued jobs never completed".to_string()));
                    }
                }
            }
        }
        Ok(collected)
    }

    pub fn get_job_record(&self, job_hash: &str) -> Result<Option<JobRecord>, EngineError> {
        self.env.job_store.lookup_job(job_hash)
    }

    pub fn retain_job_comment(&self, job_hash: &str, comment: &str) -> Result<(), EngineError> {
        self.env.job_store.retain_job_comment(job_hash, comment)
    }

    // -----------------------------------------------------------------------
    // Operaciones
    // -----------------------------------------------------------------------

    /// Aplica una operación polimórfica sobre un valor: resuelve la entrada
    /// por (operación, data type), arma el input map con el renombre de
    /// campos declarado y somete un job normal.
    pub fn apply_operation(&self,
                           operation: &str,
                           value: &Arc<Value>,
                           extra: BTreeMap<String, Json>,
                           comment: &str)
                           -> Result<(JobExecution, String), EngineError> {
        let entry = self.operations
                        .resolve(operation, value.type_name(), &self.env.types)?
                        .clone();
        let module = self.env.modules.resolve(&entry.manifest)?;
        let inputs_schema = module.inputs_schema();

        let mut inputs: ValueMap = BTreeMap::new();
        inputs.insert(entry.input_field.clone(), value.clone());
        for (field, literal) in extra {
            let schema = inputs_schema.get(&field).cloned().unwrap_or_else(|| ValueSchema::new("any"));
            let extra_value = self.register_external(&schema, literal, &format!("operation_arg:{field}"))?;
            inputs.insert(field, extra_value);
        }

        debug!("applying operation '{operation}' via module '{}'", entry.manifest.module_type);
        let execution = self.run_job(&entry.manifest, &inputs, comment)?;
        Ok((execution, entry.output_field))
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    pub fn compile_pipeline(&self, declaration: &PipelineDeclaration) -> Result<PipelineStructure, EngineError> {
        PipelineStructure::compile(declaration, &self.env.modules, &self.env.types)
    }

    /// Valida (compila) y guarda una declaración con nombre. Una declaración
    /// inválida no deja nada registrado.
    pub fn register_pipeline(&self, declaration: &PipelineDeclaration) -> Result<(), EngineError> {
        self.compile_pipeline(declaration)?;
        self.workflow_store.write_pipeline(declaration)
    }

    pub fn list_pipelines(&self) -> Result<Vec<String>, EngineError> {
        self.workflow_store.list_pipelines()
    }

    pub fn get_pipeline(&self, name: &str) -> Result<Option<PipelineDeclaration>, EngineError> {
        self.workflow_store.get_pipeline(name)
    }

    /// Crea un controller para una estructura compilada.
    pub fn create_controller(&self,
                             structure: Arc<PipelineStructure>,
                             parallel: bool)
                             -> Result<PipelineController, EngineError> {
        let processor: Box<dyn Processor> = if parallel {
            Box::new(ParallelProcessor::new(self.env.clone(), self.worker_count))
        } else {
            Box::new(SyncProcessor::new(self.env.clone()))
        };
        PipelineController::new(structure, self.env.clone(), processor)
    }

    /// Compila y corre un pipeline completo con inputs literales.
    pub fn run_pipeline(&self,
                        declaration: &PipelineDeclaration,
                        inputs: BTreeMap<String, Json>,
                        comment: &str,
                        parallel: bool)
                        -> Result<BTreeMap<String, Arc<Value>>, EngineError> {
        let structure = Arc::new(self.compile_pipeline(declaration)?);
        let mut controller = self.create_controller(structure, parallel)?;
        if !inputs.is_empty() {
            controller.set_pipeline_inputs(inputs)?;
        }
        controller.run_to_completion(comment)
    }

    // -----------------------------------------------------------------------
    // Archives
    // -----------------------------------------------------------------------

    pub fn retrieve_archive_info(&self) -> Vec<ArchiveInfo> {
        vec![self.env.data_store.info(),
             self.alias_store.info(),
             self.env.job_store.info(),
             self.workflow_store.info()]
    }

    /// Exporta valores + aliases + jobs a un blob CBOR canónico.
    pub fn export_archive(&self) -> Result<Vec<u8>, EngineError> {
        export_bundle(&*self.env.data_store, &*self.alias_store, &*self.env.job_store)
    }

    /// Importa un blob exportado por otro contexto; idempotente por hash.
    pub fn import_archive(&self, blob: &[u8]) -> Result<ArchiveBundle, EngineError> {
        import_bundle(blob, &*self.env.data_store, &*self.alias_store, &*self.env.job_store)
    }
}
