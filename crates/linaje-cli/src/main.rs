//! CLI `linaje`.
//!
//! Subcomandos: run, info, context, archive, data, module, operation,
//! pipeline, data-type, render. Códigos de salida: 0 ok, 1 fallo de módulo,
//! 2 argumentos/schema inválidos, 3 IO/archive, 4 cancelado o timeout.

use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::process::exit;
use std::sync::Arc;

use linaje_core::{classify_error, Context, EngineError, ErrorClass, Manifest, PipelineDeclaration,
                  Value};
use linaje_persistence::{bind_backend, ContextPaths, StoreBackend};

const USAGE: &str = "\
Uso: linaje <subcomando> [args]

  run <module_type> [--config K=JSON]... [--input CAMPO=REF|JSON]... [--comment TXT]
  info
  context
  archive export <archivo> | import <archivo> | info
  data list | show <ref> | store <ref> --alias NOMBRE | history <alias>
  module list
  operation list [<operación>]
  data-type list
  pipeline list | show <nombre> | register <archivo> | run <nombre|archivo> [--input K=JSON]... [--parallel] [--comment TXT]
  render <ref>
  plugin list

El contexto activo sale de LINAJE_CONTEXT (default `default`), la raíz de
datos de LINAJE_DATA_DIR y el backend de LINAJE_BACKEND (`fs` | `sqlite`).";

fn exit_code(err: &EngineError) -> i32 {
    match classify_error(err) {
        ErrorClass::Module | ErrorClass::Internal => 1,
        ErrorClass::Validation => 2,
        ErrorClass::Io => 3,
        ErrorClass::Cancelled => 4,
    }
}

fn fail(err: EngineError) -> ! {
    eprintln!("error: {err}");
    exit(exit_code(&err));
}

fn open_context() -> Result<Context, EngineError> {
    linaje_persistence::init_dotenv();
    let backend = match std::env::var("LINAJE_BACKEND").as_deref() {
        Ok("sqlite") => StoreBackend::Sqlite,
        _ => StoreBackend::Filesystem,
    };
    let paths = ContextPaths::from_env();
    let mut builder = bind_backend(Context::builder(paths.context_name.clone()), backend, &paths)?;
    linaje_modules::install(&mut builder)?;
    Ok(builder.build())
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        exit(2);
    };

    let result = match command.as_str() {
        "run" => cmd_run(&args[1..]),
        "info" => cmd_info(),
        "context" => cmd_context(),
        "archive" => cmd_archive(&args[1..]),
        "data" => cmd_data(&args[1..]),
        "module" => cmd_module(&args[1..]),
        "operation" => cmd_operation(&args[1..]),
        "data-type" => cmd_data_type(&args[1..]),
        "pipeline" => cmd_pipeline(&args[1..]),
        "render" => cmd_render(&args[1..]),
        "plugin" => cmd_plugin(&args[1..]),
        "--help" | "-h" | "help" => {
            println!("{USAGE}");
            return;
        }
        other => {
            eprintln!("subcomando desconocido '{other}'\n\n{USAGE}");
            exit(2);
        }
    };
    if let Err(err) = result {
        fail(err);
    }
}

/// Parsea pares `CLAVE=VALOR` de flags repetibles.
fn parse_pair(raw: &str, flag: &str) -> Result<(String, String), EngineError> {
    raw.split_once('=')
       .map(|(k, v)| (k.to_string(), v.to_string()))
       .ok_or_else(|| EngineError::InvalidPipeline(format!("{flag} expects KEY=VALUE, got '{raw}'")))
}

/// Recolecta `--flag K=V` repetidos y flags simples.
struct Flags {
    pairs: Vec<(String, String, String)>, // (flag, clave, valor)
    switches: Vec<String>,
    positional: Vec<String>,
}

fn parse_flags(args: &[String]) -> Result<Flags, EngineError> {
    let mut flags = Flags { pairs: Vec::new(),
                            switches: Vec::new(),
                            positional: Vec::new() };
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if let Some(name) = arg.strip_prefix("--") {
            match name {
                "config" | "input" | "comment" | "alias" => {
                    i += 1;
                    let value = args.get(i).ok_or_else(|| {
                        EngineError::InvalidPipeline(format!("--{name} requires a value"))
                    })?;
                    if name == "comment" || name == "alias" {
                        flags.pairs.push((name.to_string(), String::new(), value.clone()));
                    } else {
                        let (k, v) = parse_pair(value, &format!("--{name}"))?;
                        flags.pairs.push((name.to_string(), k, v));
                    }
                }
                _ => flags.switches.push(name.to_string()),
            }
        } else {
            flags.positional.push(arg.clone());
        }
        i += 1;
    }
    Ok(flags)
}

fn literal_or_string(raw: &str) -> Json {
    serde_json::from_str(raw).unwrap_or_else(|_| json!(raw))
}

fn print_value(value: &Arc<Value>) {
    println!("id:      {}", value.id);
    println!("type:    {}", value.type_name());
    println!("hash:    {}", value.value_hash);
    println!("size:    {}", value.size);
    println!("origin:  {:?}", value.origin);
    if !value.metadata.is_empty() {
        println!("metadata:");
        for (k, v) in &value.metadata {
            println!("  {k} = {v}");
        }
    }
    println!("payload: {}",
             serde_json::to_string_pretty(&value.payload).unwrap_or_else(|_| "<unprintable>".to_string()));
}

fn cmd_run(args: &[String]) -> Result<(), EngineError> {
    let flags = parse_flags(args)?;
    let module_type = flags.positional
                           .first()
                           .ok_or_else(|| EngineError::InvalidPipeline("run requires a module type".to_string()))?;

    let ctx = open_context()?;
    let mut manifest = Manifest::new(module_type.clone());
    let mut comment = String::new();
    let mut raw_inputs: Vec<(String, String)> = Vec::new();
    for (flag, key, value) in &flags.pairs {
        match flag.as_str() {
            "config" => {
                manifest.module_config.insert(key.clone(), literal_or_string(value));
            }
            "input" => raw_inputs.push((key.clone(), value.clone())),
            "comment" => comment = value.clone(),
            _ => {}
        }
    }

    // inputs: referencia resoluble o literal JSON tipado por el schema
    let module = ctx.modules().resolve(&manifest)?;
    let inputs_schema = module.inputs_schema();
    let mut inputs: linaje_core::ValueMap = BTreeMap::new();
    for (field, raw) in raw_inputs {
        let value = match ctx.get_value(&raw) {
            Ok(value) => value,
            Err(_) => {
                let schema = inputs_schema.get(&field)
                                          .cloned()
                                          .unwrap_or_else(|| linaje_core::ValueSchema::new("any"));
                ctx.register_external(&schema, literal_or_string(&raw), "cli")?
            }
        };
        inputs.insert(field, value);
    }

    let execution = ctx.run_job(&manifest, &inputs, &comment)?;
    println!("job:   {}{}", execution.job_hash, if execution.from_cache { " (cached)" } else { "" });
    for (field, value) in &execution.outputs {
        println!("-- {field} --");
        print_value(value);
    }
    Ok(())
}

fn cmd_info() -> Result<(), EngineError> {
    let ctx = open_context()?;
    println!("context: {}", ctx.name());
    println!("values:  {}", ctx.data_store().iter_values()?.len());
    println!("aliases: {}", ctx.list_aliases()?.len());
    println!("jobs:    {}", ctx.job_store().list_jobs()?.len());
    println!("pipelines: {}", ctx.list_pipelines()?.len());
    Ok(())
}

fn cmd_context() -> Result<(), EngineError> {
    linaje_persistence::init_dotenv();
    let paths = ContextPaths::from_env();
    println!("context: {}", paths.context_name);
    println!("root:    {}", paths.root.display());
    println!("store:   {}", paths.store_dir().display());
    println!("db:      {}", paths.db_path().display());
    Ok(())
}

fn cmd_archive(args: &[String]) -> Result<(), EngineError> {
    let ctx = open_context()?;
    match args.first().map(String::as_str) {
        Some("export") => {
            let path = args.get(1)
                           .ok_or_else(|| EngineError::InvalidPipeline("archive export requires a path".to_string()))?;
            let blob = ctx.export_archive()?;
            std::fs::write(path, &blob)?;
            println!("exported {} bytes to {path}", blob.len());
            Ok(())
        }
        Some("import") => {
            let path = args.get(1)
                           .ok_or_else(|| EngineError::InvalidPipeline("archive import requires a path".to_string()))?;
            let blob = std::fs::read(path)?;
            let bundle = ctx.import_archive(&blob)?;
            println!("imported {} values, {} alias entries, {} jobs",
                     bundle.values.len(),
                     bundle.aliases.len(),
                     bundle.jobs.len());
            Ok(())
        }
        Some("info") | None => {
            for info in ctx.retrieve_archive_info() {
                println!("{:?} {} {}", info.kind, info.archive_id, info.config);
            }
            Ok(())
        }
        Some(other) => Err(EngineError::InvalidPipeline(format!("unknown archive subcommand '{other}'"))),
    }
}

fn cmd_data(args: &[String]) -> Result<(), EngineError> {
    let ctx = open_context()?;
    match args.first().map(String::as_str) {
        Some("list") | None => {
            for hash in ctx.data_store().iter_values()? {
                println!("{hash}");
            }
            for entry in ctx.list_aliases()? {
                println!("alias {} -> {}", entry.alias, entry.value_id);
            }
            Ok(())
        }
        Some("show") => {
            let reference = args.get(1)
                                .ok_or_else(|| EngineError::InvalidPipeline("data show requires a reference".to_string()))?;
            print_value(&ctx.get_value(reference)?);
            Ok(())
        }
        Some("store") => {
            let flags = parse_flags(&args[1..])?;
            let reference = flags.positional
                                 .first()
                                 .ok_or_else(|| EngineError::InvalidPipeline("data store requires a reference".to_string()))?;
            let alias = flags.pairs
                             .iter()
                             .find(|(flag, _, _)| flag == "alias")
                             .map(|(_, _, value)| value.clone());
            let value = ctx.get_value(reference)?;
            ctx.store_value(&value, alias.as_deref())?;
            println!("stored {}", value.value_hash);
            Ok(())
        }
        Some("history") => {
            let alias = args.get(1)
                            .ok_or_else(|| EngineError::InvalidPipeline("data history requires an alias".to_string()))?;
            for entry in ctx.alias_history(alias)? {
                println!("rev {} -> {} ({})", entry.rev, entry.value_id, entry.ts);
            }
            Ok(())
        }
        Some(other) => Err(EngineError::InvalidPipeline(format!("unknown data subcommand '{other}'"))),
    }
}

fn cmd_module(args: &[String]) -> Result<(), EngineError> {
    let ctx = open_context()?;
    match args.first().map(String::as_str) {
        Some("list") | None => {
            for name in ctx.modules().names() {
                println!("{name}");
            }
            Ok(())
        }
        Some(other) => Err(EngineError::InvalidPipeline(format!("unknown module subcommand '{other}'"))),
    }
}

fn cmd_operation(args: &[String]) -> Result<(), EngineError> {
    let ctx = open_context()?;
    match args.first().map(String::as_str) {
        Some("list") | None => {
            for name in ctx.operations().operation_names() {
                println!("{name}");
            }
            Ok(())
        }
        Some(operation) => {
            for (data_type, entry) in ctx.operations().entries_for(operation) {
                println!("{data_type} -> {}", entry.manifest.module_type);
            }
            Ok(())
        }
    }
}

fn cmd_data_type(args: &[String]) -> Result<(), EngineError> {
    let ctx = open_context()?;
    match args.first().map(String::as_str) {
        Some("list") | None => {
            for name in ctx.types().names() {
                println!("{name}");
            }
            Ok(())
        }
        Some(other) => Err(EngineError::InvalidPipeline(format!("unknown data-type subcommand '{other}'"))),
    }
}

/// Carga una declaración desde el workflow store o desde un archivo
/// JSON/YAML del disco.
fn load_declaration(ctx: &Context, name_or_path: &str) -> Result<PipelineDeclaration, EngineError> {
    if let Some(declaration) = ctx.get_pipeline(name_or_path)? {
        return Ok(declaration);
    }
    let raw = std::fs::read_to_string(name_or_path)
        .map_err(|_| EngineError::InvalidPipeline(format!("no pipeline or file named '{name_or_path}'")))?;
    if name_or_path.ends_with(".yaml") || name_or_path.ends_with(".yml") {
        let json: Json = serde_yaml::from_str(&raw)
            .map_err(|e| EngineError::InvalidPipeline(format!("invalid YAML declaration: {e}")))?;
        PipelineDeclaration::from_json(&json)
    } else {
        PipelineDeclaration::from_json_str(&raw)
    }
}

fn cmd_pipeline(args: &[String]) -> Result<(), EngineError> {
    let ctx = open_context()?;
    match args.first().map(String::as_str) {
        Some("list") | None => {
            for name in ctx.list_pipelines()? {
                println!("{name}");
            }
            Ok(())
        }
        Some("show") => {
            let name = args.get(1)
                           .ok_or_else(|| EngineError::InvalidPipeline("pipeline show requires a name".to_string()))?;
            let declaration = load_declaration(&ctx, name)?;
            let structure = ctx.compile_pipeline(&declaration)?;
            println!("pipeline: {}", structure.name);
            if let Some(doc) = &structure.doc {
                println!("doc: {doc}");
            }
            for (n, stage) in structure.stages.iter().enumerate() {
                println!("stage {}: {}", n + 1, stage.join(", "));
            }
            for (name, input) in &structure.pipeline_inputs {
                println!("input {name}: {}", input.schema.type_name);
            }
            for (name, (step, field)) in &structure.pipeline_outputs {
                println!("output {name}: {step}.{field}");
            }
            Ok(())
        }
        Some("register") => {
            let path = args.get(1)
                           .ok_or_else(|| EngineError::InvalidPipeline("pipeline register requires a file".to_string()))?;
            let declaration = load_declaration(&ctx, path)?;
            ctx.register_pipeline(&declaration)?;
            println!("registered pipeline '{}'", declaration.pipeline_name);
            Ok(())
        }
        Some("run") => {
            let flags = parse_flags(&args[1..])?;
            let target = flags.positional
                              .first()
                              .ok_or_else(|| EngineError::InvalidPipeline("pipeline run requires a name or file".to_string()))?;
            let declaration = load_declaration(&ctx, target)?;
            let mut inputs: BTreeMap<String, Json> = BTreeMap::new();
            let mut comment = String::new();
            for (flag, key, value) in &flags.pairs {
                match flag.as_str() {
                    "input" => {
                        inputs.insert(key.clone(), literal_or_string(value));
                    }
                    "comment" => comment = value.clone(),
                    _ => {}
                }
            }
            let parallel = flags.switches.iter().any(|s| s == "parallel");
            let outputs = ctx.run_pipeline(&declaration, inputs, &comment, parallel)?;
            for (name, value) in &outputs {
                println!("-- {name} --");
                print_value(value);
            }
            Ok(())
        }
        Some(other) => Err(EngineError::InvalidPipeline(format!("unknown pipeline subcommand '{other}'"))),
    }
}

fn cmd_plugin(args: &[String]) -> Result<(), EngineError> {
    match args.first().map(String::as_str) {
        Some("list") | None => {
            // Sin discovery dinámico: los proveedores se registran
            // explícitamente al construir el contexto.
            let ctx = open_context()?;
            println!("linaje-modules (builtin): {} module types", ctx.modules().names().len());
            Ok(())
        }
        Some(other) => Err(EngineError::InvalidPipeline(format!("unknown plugin subcommand '{other}'"))),
    }
}

fn cmd_render(args: &[String]) -> Result<(), EngineError> {
    let reference = args.first()
                        .ok_or_else(|| EngineError::InvalidPipeline("render requires a value reference".to_string()))?;
    let ctx = open_context()?;
    let value = ctx.get_value(reference)?;
    let (execution, output_field) =
        ctx.apply_operation("pretty_print", &value, BTreeMap::new(), "cli render")?;
    match execution.outputs[&output_field].payload.as_str() {
        Some(rendered) => println!("{rendered}"),
        None => println!("{}", execution.outputs[&output_field].payload),
    }
    Ok(())
}
