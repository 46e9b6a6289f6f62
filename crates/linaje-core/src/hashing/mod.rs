//! Módulo de hashing y canonicalización binaria.
//!
//! Todos los hashes de contenido del motor (valores, schemas, manifests,
//! jobs) se calculan sobre una única codificación CBOR determinista y con un
//! único algoritmo (blake3) prefijado estilo multihash, de modo que el hash
//! sea auto-descriptivo.

pub mod canonical_cbor;
pub mod hash;

pub use canonical_cbor::{decode_canonical, encode_canonical};
pub use hash::{hash_bytes, hash_value};
