//! Registro de valores en memoria.
//!
//! Invariantes:
//! - Deduplicación por value hash: registrar dos veces el mismo (schema,
//!   payload) devuelve el mismo valor.
//! - Un valor nunca se muta in place; el registro sólo inserta.
//! - Lecturas concurrentes baratas: lock read-many/write-rare.

use chrono::Utc;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::hashing;
use crate::types::DataTypeRegistry;

use super::{Value, ValueOrigin, ValueSchema, ValueStatus};

struct Inner {
    by_id: HashMap<Uuid, Arc<Value>>,
    by_hash: HashMap<String, Uuid>,
}

pub struct ValueRegistry {
    types: Arc<DataTypeRegistry>,
    inner: RwLock<Inner>,
}

impl ValueRegistry {
    pub fn new(types: Arc<DataTypeRegistry>) -> Self {
        Self { types,
               inner: RwLock::new(Inner { by_id: HashMap::new(),
                                          by_hash: HashMap::new() }) }
    }

    pub fn types(&self) -> &Arc<DataTypeRegistry> {
        &self.types
    }

    /// Registra un valor: valida el payload contra su tipo, calcula el value
    /// hash y deduplica. Devuelve el valor existente si el hash ya estaba.
    pub fn register_value(&self,
                          schema: &ValueSchema,
                          payload: Json,
                          origin: ValueOrigin)
                          -> Result<Arc<Value>, EngineError> {
        let ty = self.types.get(&schema.type_name)?;
        ty.validate(&payload)?;

        let schema_hash = schema.schema_hash()?;
        let (value_hash, size, persistable) = match ty.canonical_bytes(&payload)? {
            Some(bytes) => {
                let payload_hash = hashing::hash_bytes(&bytes);
                let value_hash = hashing::hash_value(&json!({
                    "schema": schema_hash,
                    "payload": payload_hash,
                }))?;
                (value_hash, bytes.len() as u64, true)
            }
            // Tipos opacos: identidad efímera del proceso, sin dedup.
            None => (format!("opaque:{}", Uuid::new_v4()), 0, false),
        };

        {
            let inner = self.inner.read().expect("value registry poisoned");
            if let Some(id) = inner.by_hash.get(&value_hash) {
                return Ok(inner.by_id[id].clone());
            }
        }

        let status = if payload.is_null() { ValueStatus::None } else { ValueStatus::Set };
        let value = Arc::new(Value { id: Uuid::new_v4(),
                                     schema: schema.clone(),
                                     metadata: ty.extract_properties(&payload),
                                     payload,
                                     value_hash: value_hash.clone(),
                                     size,
                                     origin,
                                     status,
                                     created_at: Utc::now(),
                                     persistable });

        let mut inner = self.inner.write().expect("value registry poisoned");
        // Carrera benigna: otro hilo pudo registrar el mismo hash entre el
        // read y el write; gana el primero.
        if let Some(id) = inner.by_hash.get(&value_hash) {
            return Ok(inner.by_id[id].clone());
        }
        inner.by_hash.insert(value_hash, value.id);
        inner.by_id.insert(value.id, value.clone());
        Ok(value)
    }

    /// Inserta un valor rehidratado desde un archive preservando id y hash.
    pub fn adopt(&self, value: Value) -> Arc<Value> {
        let mut inner = self.inner.write().expect("value registry poisoned");
        if let Some(id) = inner.by_hash.get(&value.value_hash) {
            return inner.by_id[id].clone();
        }
        let value = Arc::new(value);
        inner.by_hash.insert(value.value_hash.clone(), value.id);
        inner.by_id.insert(value.id, value.clone());
        value
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Value>, EngineError> {
        self.inner
            .read()
            .expect("value registry poisoned")
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownValue(id.to_string()))
    }

    pub fn get_by_hash(&self, value_hash: &str) -> Result<Arc<Value>, EngineError> {
        let inner = self.inner.read().expect("value registry poisoned");
        inner.by_hash
             .get(value_hash)
             .and_then(|id| inner.by_id.get(id))
             .cloned()
             .ok_or_else(|| EngineError::UnknownValue(value_hash.to_string()))
    }

    pub fn contains_hash(&self, value_hash: &str) -> bool {
        self.inner
            .read()
            .expect("value registry poisoned")
            .by_hash
            .contains_key(value_hash)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("value registry poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
