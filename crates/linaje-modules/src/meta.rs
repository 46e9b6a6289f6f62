//! Operaciones de valor: serialización, metadatos y rendering plano.
//!
//! Estos módulos respaldan los operation types del core (`serialize`,
//! `deserialize`, `extract_metadata`, `pretty_print`); el dispatch por data
//! type vive en el registro de operaciones, acá sólo hay módulos comunes.

use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

use linaje_core::hashing;
use linaje_core::module::{module_failure, module_failure_on, Module, ModuleOutputs,
                          ModuleTypeRegistry};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::EngineError;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(raw: &str) -> Result<Vec<u8>, EngineError> {
    if raw.len() % 2 != 0 {
        return Err(module_failure("odd-length hex payload"));
    }
    (0..raw.len()).step_by(2)
                  .map(|i| {
                      u8::from_str_radix(&raw[i..i + 2], 16)
                          .map_err(|_| module_failure(format!("invalid hex at offset {i}")))
                  })
                  .collect()
}

/// `value.serialize`: payload → bytes canónicos (hex).
#[derive(Debug)]
struct Serialize;

impl Module for Serialize {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("value".to_string(), ValueSchema::new("any"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("bytes".to_string(), ValueSchema::new("bytes"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let value = inputs.get("value").ok_or_else(|| module_failure_on("value", "missing input"))?;
        let bytes = hashing::encode_canonical(&value.payload)?;
        Ok(BTreeMap::from([("bytes".to_string(), json!(to_hex(&bytes)))]))
    }
}

/// `value.deserialize`: bytes canónicos (hex) → payload.
#[derive(Debug)]
struct Deserialize;

impl Module for Deserialize {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("bytes".to_string(), ValueSchema::new("bytes"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("value".to_string(), ValueSchema::new("any"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let raw = inputs.get("bytes")
                        .and_then(|v| v.payload.as_str())
                        .ok_or_else(|| module_failure_on("bytes", "missing hex payload"))?;
        let bytes = from_hex(raw)?;
        let value = hashing::decode_canonical(&bytes)
            .map_err(|e| module_failure(format!("undecodable payload: {e}")))?;
        Ok(BTreeMap::from([("value".to_string(), value)]))
    }
}

/// `value.extract_metadata`: estadísticas genéricas de cualquier payload.
#[derive(Debug)]
struct ExtractMetadata;

impl Module for ExtractMetadata {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("value".to_string(), ValueSchema::new("any"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("metadata".to_string(), ValueSchema::new("dict"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let value = inputs.get("value").ok_or_else(|| module_failure_on("value", "missing input"))?;
        let kind = match &value.payload {
            Json::Null => "null",
            Json::Bool(_) => "boolean",
            Json::Number(_) => "number",
            Json::String(_) => "string",
            Json::Array(_) => "array",
            Json::Object(_) => "object",
        };
        let size = hashing::encode_canonical(&value.payload)?.len();
        let mut metadata = json!({
            "kind": kind,
            "canonical_size": size,
            "type_name": value.type_name(),
        });
        // propiedades ya extraídas por el data type se re-exponen
        if let Some(obj) = metadata.as_object_mut() {
            for (k, v) in &value.metadata {
                obj.insert(k.clone(), v.clone());
            }
        }
        Ok(BTreeMap::from([("metadata".to_string(), metadata)]))
    }
}

/// `value.pretty_print`: rendering plano de cualquier payload.
#[derive(Debug)]
struct PrettyPrint;

impl Module for PrettyPrint {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("value".to_string(), ValueSchema::new("any"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("rendered".to_string(), ValueSchema::new("string"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let value = inputs.get("value").ok_or_else(|| module_failure_on("value", "missing input"))?;
        let rendered = serde_json::to_string_pretty(&value.payload)
            .map_err(|e| module_failure(e.to_string()))?;
        Ok(BTreeMap::from([("rendered".to_string(), json!(rendered))]))
    }
}

/// `render.table`: rendering columnar de valores `table`.
#[derive(Debug)]
struct RenderTable;

impl Module for RenderTable {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("value".to_string(), ValueSchema::new("table"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("rendered".to_string(), ValueSchema::new("string"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let table = &inputs.get("value")
                           .ok_or_else(|| module_failure_on("value", "missing input"))?
                           .payload;
        let columns: Vec<String> = table.get("columns")
                                        .and_then(Json::as_array)
                                        .ok_or_else(|| module_failure("value is not a table"))?
                                        .iter()
                                        .map(cell_text)
                                        .collect();
        let rows: Vec<Vec<String>> = table.get("rows")
                                          .and_then(Json::as_array)
                                          .ok_or_else(|| module_failure("value is not a table"))?
                                          .iter()
                                          .map(|row| {
                                              row.as_array()
                                                 .map(|cells| cells.iter().map(cell_text).collect())
                                                 .unwrap_or_default()
                                          })
                                          .collect();

        let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() && cell.len() > widths[i] {
                    widths[i] = cell.len();
                }
            }
        }

        let mut out = String::new();
        render_row(&mut out, &columns, &widths);
        render_row(&mut out,
                   &widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>(),
                   &widths);
        for row in &rows {
            render_row(&mut out, row, &widths);
        }
        Ok(BTreeMap::from([("rendered".to_string(), json!(out))]))
    }
}

fn cell_text(cell: &Json) -> String {
    match cell {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells.iter()
                                 .enumerate()
                                 .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0)))
                                 .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

pub fn register(modules: &mut ModuleTypeRegistry) -> Result<(), EngineError> {
    modules.register("value.serialize", |_| Ok(Box::new(Serialize)))?;
    modules.register("value.deserialize", |_| Ok(Box::new(Deserialize)))?;
    modules.register("value.extract_metadata", |_| Ok(Box::new(ExtractMetadata)))?;
    modules.register("value.pretty_print", |_| Ok(Box::new(PrettyPrint)))?;
    modules.register("render.table", |_| Ok(Box::new(RenderTable)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let bytes = vec![0x00, 0xff, 0x1e, 0x20];
        assert_eq!(from_hex(&to_hex(&bytes)).unwrap(), bytes);
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
    }
}
