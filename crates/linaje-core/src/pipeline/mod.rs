//! Pipelines: declaración, estructura compilada, estado y ejecución.
//!
//! El flujo completo:
//! 1. Una `PipelineDeclaration` (documento JSON/YAML) describe steps + links.
//! 2. `PipelineStructure::compile` resuelve manifests y schemas, valida el
//!    DAG (sin ciclos, tipos compatibles) y asigna a cada step su etapa
//!    topológica.
//! 3. El `PipelineController` mantiene un slot por campo, propaga valores en
//!    ticks atómicos y despacha steps listos a un `Processor` (síncrono o
//!    pool de workers), que consulta el cache de jobs antes de ejecutar.

mod controller;
mod declaration;
mod processor;
mod state;
mod structure;

pub use controller::{PipelineController, PipelineListener};
pub use declaration::{LinkTarget, PipelineDeclaration, StepDeclaration};
pub use processor::{execute_job, JobCompletion, JobExecution, JobTask, ParallelProcessor, Processor,
                    SyncProcessor};
pub use state::{FieldRef, PipelineState, SlotStatus, ValueSlot};
pub use structure::{PipelineInput, PipelineStep, PipelineStructure};
