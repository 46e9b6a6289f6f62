//! Hash helpers – blake3 con prefijo multihash para que los hashes sean
//! auto-descriptivos (algoritmo + longitud + digest, en hex).

use blake3::Hasher;
use serde_json::Value;

use crate::errors::EngineError;
use crate::hashing::encode_canonical;

/// Código multicodec de blake3 y longitud del digest (32 bytes).
const MULTIHASH_BLAKE3: u8 = 0x1e;
const DIGEST_LEN: u8 = 0x20;

/// Hashea bytes y devuelve el multihash en hex (`1e20` + 64 hex chars).
pub fn hash_bytes(input: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(input);
    let digest = h.finalize();
    let mut out = String::with_capacity(4 + 64);
    out.push_str(&format!("{MULTIHASH_BLAKE3:02x}{DIGEST_LEN:02x}"));
    out.push_str(&digest.to_hex());
    out
}

/// Codifica canónicamente una estructura JSON y hashea los bytes resultantes.
pub fn hash_value(value: &Value) -> Result<String, EngineError> {
    Ok(hash_bytes(&encode_canonical(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_prefixed_and_stable() {
        let h = hash_bytes(b"abc");
        assert!(h.starts_with("1e20"));
        assert_eq!(h.len(), 4 + 64);
        assert_eq!(h, hash_bytes(b"abc"));
    }

    #[test]
    fn equal_encodings_iff_equal_hashes() {
        let a = hash_value(&json!({ "x": 1, "y": 2 })).unwrap();
        let b = hash_value(&json!({ "y": 2, "x": 1 })).unwrap();
        let c = hash_value(&json!({ "x": 1, "y": 3 })).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
