//! Formato declarativo de pipelines (JSON/YAML-friendly).
//!
//! Sintaxis de links de input:
//! - `pipeline_input:NOMBRE` — conecta a un input del pipeline.
//! - `STEP.CAMPO` — conecta al output `CAMPO` del step `STEP`.
//!
//! `input_aliases` / `output_aliases` mapean `step.campo` → nombre expuesto a
//! nivel pipeline. `inputs` aporta literales por defecto para inputs del
//! pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::errors::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDeclaration {
    pub pipeline_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub steps: Vec<StepDeclaration>,
    /// `step.campo` → nombre de input a nivel pipeline.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_aliases: BTreeMap<String, String>,
    /// `step.campo` → nombre de output a nivel pipeline.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_aliases: BTreeMap<String, String>,
    /// Literales por defecto: input del pipeline → payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDeclaration {
    pub step_id: String,
    pub module_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub module_config: BTreeMap<String, Json>,
    /// input del step → link (`pipeline_input:NOMBRE` o `STEP.CAMPO`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_links: BTreeMap<String, String>,
}

/// Destino parseado de un link de input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    PipelineInput(String),
    StepOutput { step_id: String, field: String },
}

impl LinkTarget {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        if let Some(name) = raw.strip_prefix("pipeline_input:") {
            if name.is_empty() {
                return Err(EngineError::InvalidPipeline(format!("empty pipeline input in link '{raw}'")));
            }
            return Ok(LinkTarget::PipelineInput(name.to_string()));
        }
        match raw.split_once('.') {
            Some((step_id, field)) if !step_id.is_empty() && !field.is_empty() => {
                Ok(LinkTarget::StepOutput { step_id: step_id.to_string(),
                                            field: field.to_string() })
            }
            _ => Err(EngineError::InvalidPipeline(format!(
                "invalid link '{raw}': expected 'pipeline_input:NAME' or 'STEP.FIELD'"
            ))),
        }
    }
}

impl PipelineDeclaration {
    pub fn from_json(raw: &Json) -> Result<Self, EngineError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::InvalidPipeline(format!("declaration parse error: {e}")))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw)
            .map_err(|e| EngineError::InvalidPipeline(format!("declaration parse error: {e}")))
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).expect("declaration is always JSON-representable")
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDeclaration> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_both_link_forms() {
        assert_eq!(LinkTarget::parse("pipeline_input:a").unwrap(),
                   LinkTarget::PipelineInput("a".to_string()));
        assert_eq!(LinkTarget::parse("and.y").unwrap(),
                   LinkTarget::StepOutput { step_id: "and".to_string(),
                                            field: "y".to_string() });
        assert!(LinkTarget::parse("garbage").is_err());
        assert!(LinkTarget::parse("pipeline_input:").is_err());
    }

    #[test]
    fn declaration_round_trips_through_json() {
        let decl = PipelineDeclaration::from_json(&json!({
            "pipeline_name": "nand",
            "steps": [
                { "step_id": "and", "module_type": "logic.and" },
                { "step_id": "not", "module_type": "logic.not",
                  "input_links": { "a": "and.y" } }
            ],
            "output_aliases": { "not.y": "y" }
        })).unwrap();
        assert_eq!(decl.steps.len(), 2);
        let back = PipelineDeclaration::from_json(&decl.to_json()).unwrap();
        assert_eq!(back.pipeline_name, "nand");
        assert_eq!(back.steps[1].input_links["a"], "and.y");
    }
}
