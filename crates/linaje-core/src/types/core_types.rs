//! Core data types registrados en cada contexto.
//!
//! Convenciones de payload (JSON):
//! - `none`: null.
//! - `bytes`: string hex (payloads binarios chicos; archivos van en `file`).
//! - `file`: objeto `{ name, size, content }` con contenido textual.
//! - `file_bundle`: objeto `{ files: [file, ...] }`.
//! - `table`: objeto `{ columns: [string], rows: [[celda, ...]] }`.
//! - `opaque`: cualquier payload; no persistible (sin codificación canónica).

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::descriptor::validation_error;
use super::{DataType, DataTypeRegistry};
use crate::errors::EngineError;

pub fn register_core_types(reg: &mut DataTypeRegistry) -> Result<(), EngineError> {
    reg.register(Arc::new(AnyType))?;
    reg.register(Arc::new(NoneType))?;
    reg.register(Arc::new(BytesType))?;
    reg.register(Arc::new(StringType))?;
    reg.register(Arc::new(BooleanType))?;
    reg.register(Arc::new(IntegerType))?;
    reg.register(Arc::new(FloatType))?;
    reg.register(Arc::new(DictType))?;
    reg.register(Arc::new(TableType))?;
    reg.register(Arc::new(FileType))?;
    reg.register(Arc::new(FileBundleType))?;
    reg.register(Arc::new(OpaqueType))?;
    Ok(())
}

/// Raíz de la cadena de subtipos; acepta cualquier payload.
pub struct AnyType;
impl DataType for AnyType {
    fn name(&self) -> &str {
        "any"
    }
    fn subtype_of(&self) -> Option<&str> {
        None
    }
}

pub struct NoneType;
impl DataType for NoneType {
    fn name(&self) -> &str {
        "none"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        if payload.is_null() {
            Ok(())
        } else {
            Err(validation_error("$", "expected null payload"))
        }
    }
}

pub struct BytesType;
impl DataType for BytesType {
    fn name(&self) -> &str {
        "bytes"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        match payload.as_str() {
            Some(_) => Ok(()),
            None => Err(validation_error("$", "expected hex string payload")),
        }
    }
    fn extract_properties(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        if let Some(s) = payload.as_str() {
            props.insert("bytes.encoded_length".to_string(), Value::from(s.len()));
        }
        props
    }
}

pub struct StringType;
impl DataType for StringType {
    fn name(&self) -> &str {
        "string"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        if payload.is_string() {
            Ok(())
        } else {
            Err(validation_error("$", "expected string payload"))
        }
    }
    fn extract_properties(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        if let Some(s) = payload.as_str() {
            props.insert("string.length".to_string(), Value::from(s.chars().count()));
        }
        props
    }
}

pub struct BooleanType;
impl DataType for BooleanType {
    fn name(&self) -> &str {
        "boolean"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        if payload.is_boolean() {
            Ok(())
        } else {
            Err(validation_error("$", "expected boolean payload"))
        }
    }
}

pub struct IntegerType;
impl DataType for IntegerType {
    fn name(&self) -> &str {
        "integer"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        if payload.as_i64().is_some() || payload.as_u64().is_some() {
            Ok(())
        } else {
            Err(validation_error("$", "expected integer payload"))
        }
    }
}

pub struct FloatType;
impl DataType for FloatType {
    fn name(&self) -> &str {
        "float"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        if payload.as_f64().is_some() {
            Ok(())
        } else {
            Err(validation_error("$", "expected numeric payload"))
        }
    }
}

pub struct DictType;
impl DataType for DictType {
    fn name(&self) -> &str {
        "dict"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        if payload.is_object() {
            Ok(())
        } else {
            Err(validation_error("$", "expected object payload"))
        }
    }
    fn extract_properties(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        if let Some(obj) = payload.as_object() {
            props.insert("dict.key_count".to_string(), Value::from(obj.len()));
        }
        props
    }
}

pub struct TableType;
impl DataType for TableType {
    fn name(&self) -> &str {
        "table"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| validation_error("$", "expected table object"))?;
        let columns = obj
            .get("columns")
            .and_then(Value::as_array)
            .ok_or_else(|| validation_error("$.columns", "expected array of column names"))?;
        if columns.iter().any(|c| !c.is_string()) {
            return Err(validation_error("$.columns", "column names must be strings"));
        }
        let rows = obj
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| validation_error("$.rows", "expected array of rows"))?;
        for (i, row) in rows.iter().enumerate() {
            let cells = row
                .as_array()
                .ok_or_else(|| validation_error(&format!("$.rows[{i}]"), "expected array row"))?;
            if cells.len() != columns.len() {
                return Err(validation_error(&format!("$.rows[{i}]"),
                                            format!("expected {} cells, found {}", columns.len(), cells.len())));
            }
        }
        Ok(())
    }
    fn extract_properties(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        if let Some(obj) = payload.as_object() {
            if let Some(rows) = obj.get("rows").and_then(Value::as_array) {
                props.insert("table.row_count".to_string(), Value::from(rows.len()));
            }
            if let Some(cols) = obj.get("columns").and_then(Value::as_array) {
                props.insert("table.column_count".to_string(), Value::from(cols.len()));
            }
        }
        props
    }
}

pub struct FileType;
impl DataType for FileType {
    fn name(&self) -> &str {
        "file"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| validation_error("$", "expected file object"))?;
        if obj.get("name").and_then(Value::as_str).is_none() {
            return Err(validation_error("$.name", "expected file name"));
        }
        if obj.get("content").and_then(Value::as_str).is_none() {
            return Err(validation_error("$.content", "expected file content"));
        }
        Ok(())
    }
    fn extract_properties(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        if let Some(obj) = payload.as_object() {
            if let Some(name) = obj.get("name") {
                props.insert("file.name".to_string(), name.clone());
            }
            if let Some(content) = obj.get("content").and_then(Value::as_str) {
                props.insert("file.size".to_string(), Value::from(content.len()));
            }
        }
        props
    }
}

pub struct FileBundleType;
impl DataType for FileBundleType {
    fn name(&self) -> &str {
        "file_bundle"
    }
    fn validate(&self, payload: &Value) -> Result<(), EngineError> {
        let files = payload
            .get("files")
            .and_then(Value::as_array)
            .ok_or_else(|| validation_error("$.files", "expected array of files"))?;
        let file_type = FileType;
        for (i, f) in files.iter().enumerate() {
            file_type
                .validate(f)
                .map_err(|_| validation_error(&format!("$.files[{i}]"), "invalid file entry"))?;
        }
        Ok(())
    }
    fn extract_properties(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        if let Some(files) = payload.get("files").and_then(Value::as_array) {
            props.insert("file_bundle.file_count".to_string(), Value::from(files.len()));
        }
        props
    }
}

/// Payloads opacos: válidos en memoria, nunca persistibles. Reemplaza al
/// blob serializado genérico: persistir exige un tipo con codificación
/// canónica declarada.
pub struct OpaqueType;
impl DataType for OpaqueType {
    fn name(&self) -> &str {
        "opaque"
    }
    fn canonical_bytes(&self, _payload: &Value) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(None)
    }
}
