use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::ValueSchema;

/// Estado de ciclo de vida de un valor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueStatus {
    Set,
    NotSet,
    Default,
    None,
}

/// Linaje de un valor: o lo aportó el usuario (external) o lo produjo un job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueOrigin {
    External { label: String },
    Job { job_hash: String, output: String },
}

/// Valor inmutable. Se crea únicamente a través del `ValueRegistry`; una vez
/// creado, payload y hash quedan congelados.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    pub id: Uuid,
    pub schema: ValueSchema,
    pub payload: Json,
    /// Multihash del contenido: función total de (schema hash, payload
    /// canónico). Para tipos opacos es un token efímero del proceso.
    pub value_hash: String,
    /// Tamaño del payload canónico en bytes (0 para opacos).
    pub size: u64,
    pub origin: ValueOrigin,
    pub status: ValueStatus,
    /// Metadatos adjuntos (propiedades extraídas por el data type, y
    /// anotaciones adicionales). No entran al hash.
    pub metadata: BTreeMap<String, Json>,
    pub created_at: DateTime<Utc>,
    /// `false` cuando el data type no declara codificación canónica; esos
    /// valores no pueden escribirse a un store.
    pub persistable: bool,
}

impl Value {
    pub fn type_name(&self) -> &str {
        &self.schema.type_name
    }
}

/// Mapa campo → valor, la moneda de entrada/salida de los módulos.
pub type ValueMap = BTreeMap<String, Arc<Value>>;

/// Forma persistida de un valor: metadatos + payload canónico. Es lo que
/// intercambian los stores; la conversión a `Value` vive en el registro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub value_hash: String,
    pub value_id: Uuid,
    pub schema: ValueSchema,
    pub payload: Json,
    pub size: u64,
    pub origin: ValueOrigin,
    pub metadata: BTreeMap<String, Json>,
    pub created_at: DateTime<Utc>,
}

impl StoredValue {
    pub fn from_value(value: &Value) -> Self {
        Self { value_hash: value.value_hash.clone(),
               value_id: value.id,
               schema: value.schema.clone(),
               payload: value.payload.clone(),
               size: value.size,
               origin: value.origin.clone(),
               metadata: value.metadata.clone(),
               created_at: value.created_at }
    }

    pub fn into_value(self) -> Value {
        Value { id: self.value_id,
                schema: self.schema,
                payload: self.payload,
                value_hash: self.value_hash,
                size: self.size,
                origin: self.origin,
                status: ValueStatus::Set,
                metadata: self.metadata,
                created_at: self.created_at,
                persistable: true }
    }
}
