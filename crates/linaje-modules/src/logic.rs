//! Compuertas booleanas (`logic.and`, `logic.or`, `logic.xor`, `logic.not`).
//! Deliberadamente triviales: son los módulos de referencia para probar
//! pipelines, cache y propagación sin tocar datos reales.

use serde_json::json;
use std::collections::BTreeMap;

use linaje_core::module::{Module, ModuleOutputs, ModuleTypeRegistry};
use linaje_core::values::{ValueMap, ValueSchema};
use linaje_core::EngineError;

#[derive(Clone, Copy, Debug)]
enum BinaryOp {
    And,
    Or,
    Xor,
}

#[derive(Debug)]
struct BinaryGate {
    op: BinaryOp,
}

impl Module for BinaryGate {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("a".to_string(), ValueSchema::new("boolean").with_doc("primer operando")),
                        ("b".to_string(), ValueSchema::new("boolean").with_doc("segundo operando"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("y".to_string(), ValueSchema::new("boolean"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let a = bool_input(inputs, "a")?;
        let b = bool_input(inputs, "b")?;
        let y = match self.op {
            BinaryOp::And => a && b,
            BinaryOp::Or => a || b,
            BinaryOp::Xor => a ^ b,
        };
        Ok(BTreeMap::from([("y".to_string(), json!(y))]))
    }
}

#[derive(Debug)]
struct NotGate;

impl Module for NotGate {
    fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("a".to_string(), ValueSchema::new("boolean"))])
    }

    fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
        BTreeMap::from([("y".to_string(), ValueSchema::new("boolean"))])
    }

    fn process(&self, inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
        let a = bool_input(inputs, "a")?;
        Ok(BTreeMap::from([("y".to_string(), json!(!a))]))
    }
}

fn bool_input(inputs: &ValueMap, field: &str) -> Result<bool, EngineError> {
    inputs.get(field)
          .and_then(|v| v.payload.as_bool())
          .ok_or_else(|| EngineError::SchemaMismatch { field: field.to_string(),
                                                       expected: "boolean".to_string(),
                                                       found: "missing".to_string() })
}

pub fn register(modules: &mut ModuleTypeRegistry) -> Result<(), EngineError> {
    modules.register("logic.and", |_| Ok(Box::new(BinaryGate { op: BinaryOp::And })))?;
    modules.register("logic.or", |_| Ok(Box::new(BinaryGate { op: BinaryOp::Or })))?;
    modules.register("logic.xor", |_| Ok(Box::new(BinaryGate { op: BinaryOp::Xor })))?;
    modules.register("logic.not", |_| Ok(Box::new(NotGate)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_tables() {
        let and = BinaryGate { op: BinaryOp::And };
        let xor = BinaryGate { op: BinaryOp::Xor };
        let registry =
            std::sync::Arc::new(linaje_core::DataTypeRegistry::with_core_types());
        let values = linaje_core::ValueRegistry::new(registry);
        let schema = ValueSchema::new("boolean");
        let origin = linaje_core::ValueOrigin::External { label: "test".to_string() };

        let mut inputs: ValueMap = BTreeMap::new();
        inputs.insert("a".to_string(), values.register_value(&schema, json!(true), origin.clone()).unwrap());
        inputs.insert("b".to_string(), values.register_value(&schema, json!(false), origin).unwrap());

        assert_eq!(and.process(&inputs).unwrap()["y"], json!(false));
        assert_eq!(xor.process(&inputs).unwrap()["y"], json!(true));
    }
}
