//! Esquema Diesel del archive relacional embebido (SQLite).
//!
//! Tablas:
//! - `archive_meta`: clave/valor con `format_version` y `archive_id`.
//! - `values_store`: valores content-addressed (record JSON completo;
//!   `value_hash` como PK da la deduplicación).
//! - `aliases`: historial versionado append-only; el mapeo vigente de un
//!   alias es su fila de mayor `rev`.
//! - `jobs`: job records inmutables por `job_hash`.
//! - `pipelines`: declaraciones con nombre (workflows).

diesel::table! {
    archive_meta (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::table! {
    values_store (value_hash) {
        value_hash -> Text,
        value_id -> Text,
        record -> Text,
    }
}

diesel::table! {
    aliases (id) {
        id -> Integer,
        alias -> Text,
        value_id -> Text,
        rev -> BigInt,
        ts -> Text,
    }
}

diesel::table! {
    jobs (job_hash) {
        job_hash -> Text,
        status -> Text,
        record -> Text,
    }
}

diesel::table! {
    pipelines (name) {
        name -> Text,
        declaration -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(archive_meta, values_store, aliases, jobs, pipelines,);
