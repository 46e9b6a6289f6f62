//! Codificación CBOR canónica.
//!
//! Notas:
//! - Objetos se codifican como maps con claves ordenadas lexicográficamente
//!   (BTreeMap); arrays mantienen su orden.
//! - Enteros round-trip exactos (i64/u64); floats usan la forma IEEE-754 más
//!   corta sin pérdida (RFC 8949 §4.2.1), que es determinista y bit-exacta:
//!   mismos bits de entrada ⇒ mismos bytes. NaN/Inf se rechazan.
//! - Longitudes definidas en todos los casos (sin indefinite-length items).

use ciborium::value::{Integer, Value as Cbor};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::EngineError;

/// Convierte un `serde_json::Value` a su forma CBOR canónica.
fn to_canonical(value: &Value) -> Result<Cbor, EngineError> {
    match value {
        Value::Null => Ok(Cbor::Null),
        Value::Bool(b) => Ok(Cbor::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Cbor::Integer(Integer::from(i)))
            } else if let Some(u) = n.as_u64() {
                Ok(Cbor::Integer(Integer::from(u)))
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(EngineError::Canonicalization(format!("non-finite float: {f}")));
                }
                Ok(Cbor::Float(f))
            } else {
                Err(EngineError::Canonicalization(format!("unrepresentable number: {n}")))
            }
        }
        Value::String(s) => Ok(Cbor::Text(s.clone())),
        Value::Array(arr) => {
            let mut items = Vec::with_capacity(arr.len());
            for v in arr {
                items.push(to_canonical(v)?);
            }
            Ok(Cbor::Array(items))
        }
        Value::Object(map) => {
            // Orden lexicográfico de claves para que la codificación sea estable
            let mut tree: BTreeMap<&String, &Value> = BTreeMap::new();
            for (k, v) in map {
                tree.insert(k, v);
            }
            let mut entries = Vec::with_capacity(tree.len());
            for (k, v) in tree {
                entries.push((Cbor::Text(k.clone()), to_canonical(v)?));
            }
            Ok(Cbor::Map(entries))
        }
    }
}

/// Convierte CBOR decodificado de vuelta a `serde_json::Value`.
fn from_cbor(value: Cbor) -> Result<Value, EngineError> {
    match value {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(b)),
        Cbor::Integer(i) => {
            let i = i128::from(i);
            if let Ok(v) = i64::try_from(i) {
                Ok(Value::from(v))
            } else if let Ok(v) = u64::try_from(i) {
                Ok(Value::from(v))
            } else {
                Err(EngineError::Canonicalization(format!("integer out of range: {i}")))
            }
        }
        Cbor::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| EngineError::Canonicalization(format!("non-finite float: {f}"))),
        Cbor::Text(s) => Ok(Value::String(s)),
        Cbor::Bytes(b) => {
            // Los payloads del motor no llevan bytes crudos en JSON; se aceptan
            // en decode como array de enteros para no perder información.
            Ok(Value::Array(b.into_iter().map(Value::from).collect()))
        }
        Cbor::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(from_cbor(v)?);
            }
            Ok(Value::Array(out))
        }
        Cbor::Map(entries) => {
            let mut obj = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    Cbor::Text(s) => s,
                    other => {
                        return Err(EngineError::Canonicalization(format!(
                            "non-text map key: {other:?}"
                        )))
                    }
                };
                obj.insert(key, from_cbor(v)?);
            }
            Ok(Value::Object(obj))
        }
        other => Err(EngineError::Canonicalization(format!("unsupported CBOR node: {other:?}"))),
    }
}

/// Codifica una estructura JSON a bytes CBOR canónicos.
pub fn encode_canonical(value: &Value) -> Result<Vec<u8>, EngineError> {
    let canonical = to_canonical(value)?;
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&canonical, &mut buf)
        .map_err(|e| EngineError::Canonicalization(e.to_string()))?;
    Ok(buf)
}

/// Decodifica bytes CBOR (producidos por `encode_canonical`) a JSON.
pub fn decode_canonical(bytes: &[u8]) -> Result<Value, EngineError> {
    let cbor: Cbor = ciborium::de::from_reader(bytes)
        .map_err(|e| EngineError::Canonicalization(e.to_string()))?;
    from_cbor(cbor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives_round_trip() {
        for v in [json!(null), json!(true), json!(false), json!(0), json!(-42), json!(u64::MAX), json!("hola")] {
            let bytes = encode_canonical(&v).unwrap();
            assert_eq!(decode_canonical(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn object_key_order_is_irrelevant() {
        let a = json!({ "b": 2, "a": 1, "c": [1, 2, 3] });
        let b = json!({ "c": [1, 2, 3], "a": 1, "b": 2 });
        assert_eq!(encode_canonical(&a).unwrap(), encode_canonical(&b).unwrap());
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!([3, 1, 2]);
        let b = json!([1, 2, 3]);
        assert_ne!(encode_canonical(&a).unwrap(), encode_canonical(&b).unwrap());
        assert_eq!(decode_canonical(&encode_canonical(&a).unwrap()).unwrap(), a);
    }

    #[test]
    fn nested_round_trip() {
        let v = json!({ "z": [{ "y": "yes" }, null], "a": { "x": 10, "w": 2.5 } });
        let bytes = encode_canonical(&v).unwrap();
        assert_eq!(decode_canonical(&bytes).unwrap(), v);
    }

    #[test]
    fn floats_are_bit_exact() {
        let a = encode_canonical(&json!(0.1)).unwrap();
        let b = encode_canonical(&json!(0.1)).unwrap();
        assert_eq!(a, b);
        // float64 = header (1 byte) + 8 bytes
        assert_eq!(a.len(), 9);
    }
}
