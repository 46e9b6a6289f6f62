//! Valores inmutables content-addressed y su registro en memoria.
//!
//! Rol en el motor:
//! - Todo dato que cruza un módulo es un `Value`: payload JSON + schema +
//!   hash de contenido + linaje (origen).
//! - El `ValueRegistry` es la única vía de creación; deduplica por value hash
//!   dentro del contexto y garantiza estabilidad referencial del value id
//!   durante la vida del proceso.

mod registry;
mod schema;
mod value;

pub use registry::ValueRegistry;
pub use schema::ValueSchema;
pub use value::{StoredValue, Value, ValueMap, ValueOrigin, ValueStatus};
