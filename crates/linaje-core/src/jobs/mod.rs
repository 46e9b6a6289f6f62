//! Modelo de jobs: identidad determinista y registro inmutable.
//!
//! Fórmulas de hash (contrato estable del motor):
//! - `manifest_hash = hash(canonical({module_type, module_config}))`
//! - `inputs_hash   = hash(canonical(sorted_map(campo → value_hash)))`
//! - `job_hash      = hash(canonical({manifest_hash, inputs_hash}))`
//!
//! El job hash es la clave del cache de ejecución: mismo manifest + mismos
//! inputs ⇒ mismos outputs, sin re-ejecutar el módulo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::hashing;
use crate::module::Manifest;

/// Estado terminal de un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

/// Registro inmutable de una ejecución. Una vez persistido no se modifica
/// (el comentario puede anexarse vía `retain_job_comment`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_hash: String,
    pub manifest_hash: String,
    pub module_type: String,
    pub module_config: BTreeMap<String, Json>,
    /// Campo de input → value hash resuelto.
    pub inputs: BTreeMap<String, String>,
    /// Campo de output → value hash producido.
    pub outputs: BTreeMap<String, String>,
    /// Campo de output → value id (aditivo respecto al wire format base).
    #[serde(default)]
    pub output_ids: BTreeMap<String, Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub runtime_ms: u64,
    /// Comentario de auditoría; obligatorio en el API (puede ser vacío).
    pub comment: String,
    pub status: JobStatus,
    /// Detalle del error para jobs con status `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hash del vector de inputs ya resueltos (campo → value hash).
pub fn inputs_hash(inputs: &BTreeMap<String, String>) -> Result<String, EngineError> {
    let map: serde_json::Map<String, Json> =
        inputs.iter().map(|(k, v)| (k.clone(), Json::from(v.clone()))).collect();
    hashing::hash_value(&Json::Object(map))
}

/// Identidad de un job: manifest + inputs.
pub fn job_hash(manifest: &Manifest, inputs: &BTreeMap<String, String>) -> Result<String, EngineError> {
    let manifest_hash = manifest.manifest_hash()?;
    let inputs_hash = inputs_hash(inputs)?;
    hashing::hash_value(&json!({
        "manifest_hash": manifest_hash,
        "inputs_hash": inputs_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> BTreeMap<String, String> {
        BTreeMap::from([("a".to_string(), "1e20aa".to_string()),
                        ("b".to_string(), "1e20bb".to_string())])
    }

    #[test]
    fn job_hash_is_deterministic() {
        let manifest = Manifest::new("logic.and");
        let h1 = job_hash(&manifest, &sample_inputs()).unwrap();
        let h2 = job_hash(&manifest, &sample_inputs()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn job_hash_depends_on_inputs() {
        let manifest = Manifest::new("logic.and");
        let mut other = sample_inputs();
        other.insert("b".to_string(), "1e20cc".to_string());
        assert_ne!(job_hash(&manifest, &sample_inputs()).unwrap(),
                   job_hash(&manifest, &other).unwrap());
    }

    #[test]
    fn job_hash_depends_on_module_config() {
        let a = Manifest::new("text.match").with_config("pattern", serde_json::json!("p1"));
        let b = Manifest::new("text.match").with_config("pattern", serde_json::json!("p2"));
        assert_ne!(job_hash(&a, &sample_inputs()).unwrap(),
                   job_hash(&b, &sample_inputs()).unwrap());
    }
}
