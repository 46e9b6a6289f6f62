//! linaje-core: sustrato de datos y ejecución del motor de orquestación.
//!
//! Piezas principales:
//! - `hashing`: codificación CBOR canónica + hashes blake3 multihash.
//! - `types` / `values`: data types con capacidades y registro de valores
//!   inmutables content-addressed.
//! - `module` / `jobs`: contrato de módulo, manifests y jobs memoizados.
//! - `pipeline`: declaración → estructura por etapas → controller/processor.
//! - `archive`: traits de persistencia + backends en memoria.
//! - `context`: fachada que ata todo.

pub mod archive;
pub mod constants;
pub mod context;
pub mod errors;
pub mod hashing;
pub mod jobs;
pub mod module;
pub mod operations;
pub mod pipeline;
pub mod types;
pub mod values;

// Re-exports públicos principales
pub use context::{Context, ContextBuilder, ExecutionEnv};
pub use errors::{classify_error, EngineError, ErrorClass};
pub use jobs::{JobRecord, JobStatus};
pub use module::{Manifest, Module, ModuleOutputs, ModuleTypeRegistry};
pub use pipeline::{PipelineController, PipelineDeclaration, PipelineStructure};
pub use types::{DataType, DataTypeRegistry};
pub use values::{Value, ValueMap, ValueOrigin, ValueRegistry, ValueSchema, ValueStatus};
