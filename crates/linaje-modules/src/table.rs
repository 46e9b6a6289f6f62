//! Tablas: parseo de CSV a valores `table` y consultas por predicado.
//!
//! `table.from_csv` toma un valor `file` (contenido textual) y produce un
//! valor `table` `{ columns, rows }`; las celdas se tipan de forma
//! determinista (entero → float → string, en ese orden de intento).
//!
//! `table.query` filtra filas con un predicado `columna OP literal`, con
//! OP en {==, !=, >, <, contains}. Es deliberadamente pequeño: el motor no
//! manda sobre el lenguaje de consulta, sólo sobre el contrato del módulo.

use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

use linaje_core::module::{module_failure, module_failure_on, Module, ModuleOutputs,
                          ModuleTypeRegistry};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::EngineError;

#[derive(Debug)]
struct FromCsv {
    delimiter: u8,
}

impl Module for FromCsv {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("file".to_string(),
                         ValueSchema::new("file").with_doc("archivo CSV con fila de encabezados"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("table".to_string(), ValueSchema::new("table"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let content = inputs.get("file")
                            .and_then(|v| v.payload.get("content"))
                            .and_then(Json::as_str)
                            .ok_or_else(|| module_failure_on("file", "file value has no textual content"))?;

        let mut reader = csv::ReaderBuilder::new().delimiter(self.delimiter)
                                                  .has_headers(true)
                                                  .from_reader(content.as_bytes());
        let columns: Vec<Json> = reader.headers()
                                       .map_err(|e| module_failure(format!("invalid CSV header: {e}")))?
                                       .iter()
                                       .map(|h| json!(h))
                                       .collect();
        let mut rows = Vec::new();
        for (n, record) in reader.records().enumerate() {
            let record = record.map_err(|e| module_failure(format!("invalid CSV row {}: {e}", n + 2)))?;
            let cells: Vec<Json> = record.iter().map(parse_cell).collect();
            rows.push(Json::Array(cells));
        }

        Ok(BTreeMap::from([("table".to_string(), json!({ "columns": columns, "rows": rows }))]))
    }
}

/// Tipado determinista de celdas: entero, luego float finito, luego string.
fn parse_cell(raw: &str) -> Json {
    if let Ok(i) = raw.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }
    json!(raw)
}

#[derive(Debug)]
struct Query;

#[derive(Debug, PartialEq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Contains,
}

struct Predicate {
    column: String,
    op: Op,
    literal: Json,
}

fn parse_predicate(raw: &str) -> Result<Predicate, EngineError> {
    for (token, op) in [("==", Op::Eq), ("!=", Op::Ne), (" contains ", Op::Contains), (">", Op::Gt), ("<", Op::Lt)] {
        if let Some((left, right)) = raw.split_once(token) {
            let column = left.trim().to_string();
            let right = right.trim();
            if column.is_empty() || right.is_empty() {
                break;
            }
            let literal = serde_json::from_str(right).unwrap_or_else(|_| json!(right.trim_matches('"')));
            return Ok(Predicate { column, op, literal });
        }
    }
    Err(module_failure(format!("unparseable predicate '{raw}' (expected COLUMN OP LITERAL)")))
}

impl Predicate {
    fn matches(&self, cell: &Json) -> bool {
        match self.op {
            Op::Eq => cell == &self.literal,
            Op::Ne => cell != &self.literal,
            Op::Gt => match (cell.as_f64(), self.literal.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            Op::Lt => match (cell.as_f64(), self.literal.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            Op::Contains => match (cell.as_str(), self.literal.as_str()) {
                (Some(a), Some(b)) => a.contains(b),
                _ => false,
            },
        }
    }
}

impl Module for Query {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("table".to_string(), ValueSchema::new("table")),
                        ("query".to_string(),
                         ValueSchema::new("string").with_doc("predicado COLUMNA OP LITERAL"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("result".to_string(), ValueSchema::new("table"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let raw_query = inputs.get("query")
                              .and_then(|v| v.payload.as_str())
                              .ok_or_else(|| module_failure_on("query", "missing query input"))?;
        let predicate = parse_predicate(raw_query)?;
        let table = &inputs.get("table")
                           .ok_or_else(|| module_failure_on("table", "missing table input"))?
                           .payload;
        let columns = table.get("columns")
                           .and_then(Json::as_array)
                           .ok_or_else(|| module_failure_on("table", "table has no columns"))?;
        let column_idx = columns.iter()
                                .position(|c| c.as_str() == Some(predicate.column.as_str()))
                                .ok_or_else(|| {
                                    module_failure(format!("unknown column '{}'", predicate.column))
                                })?;
        let rows = table.get("rows")
                        .and_then(Json::as_array)
                        .ok_or_else(|| module_failure_on("table", "table has no rows"))?;

        let filtered: Vec<Json> = rows.iter()
                                      .filter(|row| {
                                          row.as_array()
                                             .and_then(|cells| cells.get(column_idx))
                                             .map(|cell| predicate.matches(cell))
                                             .unwrap_or(false)
                                      })
                                      .cloned()
                                      .collect();

        Ok(BTreeMap::from([("result".to_string(), json!({ "columns": columns, "rows": filtered }))]))
    }
}

pub fn register(modules: &mut ModuleTypeRegistry) -> Result<(), EngineError> {
    modules.register("table.from_csv", |config| {
               let delimiter = match config.get("delimiter").and_then(Json::as_str) {
                   Some(d) if d.len() == 1 => d.as_bytes()[0],
                   Some(d) => {
                       return Err(EngineError::TypeValidation { path: "$.delimiter".to_string(),
                                                                reason: format!("expected single char, got '{d}'") })
                   }
                   None => b',',
               };
               Ok(Box::new(FromCsv { delimiter }))
           })?;
    modules.register("table.query", |_| Ok(Box::new(Query)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_typed_deterministically() {
        assert_eq!(parse_cell("42"), json!(42));
        assert_eq!(parse_cell("2.5"), json!(2.5));
        assert_eq!(parse_cell("hola"), json!("hola"));
        assert_eq!(parse_cell(""), json!(""));
    }

    #[test]
    fn predicate_parsing_covers_all_ops() {
        let p = parse_predicate("city == \"Berlin\"").unwrap();
        assert_eq!(p.op, Op::Eq);
        assert_eq!(p.literal, json!("Berlin"));

        let p = parse_predicate("count > 10").unwrap();
        assert_eq!(p.op, Op::Gt);
        assert_eq!(p.literal, json!(10));

        let p = parse_predicate("title contains German").unwrap();
        assert_eq!(p.op, Op::Contains);
        assert_eq!(p.literal, json!("German"));

        assert!(parse_predicate("garbage").is_err());
    }
}
