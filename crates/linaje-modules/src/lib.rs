//! linaje-modules
//!
//! Módulos incluidos de serie y sus bindings de operación. El core no conoce
//! ningún módulo concreto: este crate registra todo explícitamente sobre un
//! `ContextBuilder` en construcción.

pub mod io;
pub mod logic;
pub mod meta;
pub mod table;
pub mod text;

use linaje_core::{Context, ContextBuilder, EngineError, Manifest};

/// Registra los módulos incluidos y sus entradas de dispatch de operaciones.
pub fn install(builder: &mut ContextBuilder) -> Result<(), EngineError> {
    logic::register(builder.modules_mut())?;
    table::register(builder.modules_mut())?;
    text::register(builder.modules_mut())?;
    io::register(builder.modules_mut())?;
    meta::register(builder.modules_mut())?;

    let ops = builder.operations_mut();
    ops.register_entry("pretty_print", "any", Manifest::new("value.pretty_print"))?;
    ops.register_entry("pretty_print", "table", Manifest::new("render.table"))?;
    ops.register_entry("serialize", "any", Manifest::new("value.serialize"))?;
    ops.register_entry("deserialize", "bytes", Manifest::new("value.deserialize"))?;
    ops.register_entry("extract_metadata", "any", Manifest::new("value.extract_metadata"))?;
    // table.query usa sus propios nombres de campo: la operación los renombra
    ops.register_entry_mapped("filter", "table", Manifest::new("table.query"), "table", "result")?;
    Ok(())
}

/// Contexto en memoria con todos los módulos incluidos ya instalados.
pub fn standard_context(name: &str) -> Result<Context, EngineError> {
    let mut builder = Context::builder(name);
    install(&mut builder)?;
    Ok(builder.build())
}
