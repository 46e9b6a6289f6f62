//! Estructura compilada de un pipeline.
//!
//! La compilación convierte la declaración en un plan inmutable:
//! - manifests y schemas resueltos por step;
//! - DAG validado (ciclos → `PipelineCycle`, tipos incompatibles →
//!   `SchemaMismatch`);
//! - etapa topológica por step: `stage(s) = max(stage(upstream)) + 1`, steps
//!   sin dependencias de otros steps en etapa 1 (Kahn por niveles);
//! - inputs libres de steps promovidos a inputs del pipeline; outputs de la
//!   última etapa exportados (más los `output_aliases` explícitos).
//!
//! La estructura es content-addressable: su hash participa del linaje.

use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::declaration::{LinkTarget, PipelineDeclaration};
use crate::errors::EngineError;
use crate::hashing;
use crate::module::{Manifest, ModuleTypeRegistry};
use crate::types::DataTypeRegistry;
use crate::values::ValueSchema;

/// Step compilado: manifest + schemas + wiring de inputs.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub step_id: String,
    pub manifest: Manifest,
    /// Etapa topológica (1-based).
    pub stage: usize,
    pub inputs_schema: BTreeMap<String, ValueSchema>,
    pub outputs_schema: BTreeMap<String, ValueSchema>,
    /// input del step → fuente resuelta.
    pub input_links: BTreeMap<String, LinkTarget>,
}

/// Input a nivel pipeline: schema + steps que alimenta + literal por defecto.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub name: String,
    pub schema: ValueSchema,
    /// (step_id, campo) que reciben este input.
    pub targets: Vec<(String, String)>,
    pub default: Option<Json>,
}

#[derive(Debug, Clone)]
pub struct PipelineStructure {
    pub name: String,
    pub doc: Option<String>,
    pub steps: BTreeMap<String, PipelineStep>,
    /// Steps agrupados por etapa, orden de ejecución.
    pub stages: Vec<Vec<String>>,
    pub pipeline_inputs: BTreeMap<String, PipelineInput>,
    /// output del pipeline → (step_id, campo) exportado.
    pub pipeline_outputs: BTreeMap<String, (String, String)>,
    pub structure_hash: String,
    declaration: PipelineDeclaration,
}

impl PipelineStructure {
    /// Compila una declaración contra los registros de módulos y tipos.
    /// No registra nada: un fallo de compilación no deja estado parcial.
    pub fn compile(declaration: &PipelineDeclaration,
                   modules: &ModuleTypeRegistry,
                   types: &DataTypeRegistry)
                   -> Result<Self, EngineError> {
        if declaration.steps.is_empty() {
            return Err(EngineError::InvalidPipeline("pipeline has no steps".to_string()));
        }

        // 1. Resolver manifests y schemas por step.
        let mut steps: BTreeMap<String, PipelineStep> = BTreeMap::new();
        for decl in &declaration.steps {
            if steps.contains_key(&decl.step_id) {
                return Err(EngineError::InvalidPipeline(format!("duplicate step id '{}'", decl.step_id)));
            }
            let manifest = Manifest { module_type: decl.module_type.clone(),
                                      module_config: decl.module_config.clone() };
            let module = modules.resolve(&manifest)?;
            let mut input_links = BTreeMap::new();
            for (field, raw) in &decl.input_links {
                input_links.insert(field.clone(), LinkTarget::parse(raw)?);
            }
            steps.insert(decl.step_id.clone(),
                         PipelineStep { step_id: decl.step_id.clone(),
                                        manifest,
                                        stage: 0,
                                        inputs_schema: module.inputs_schema(),
                                        outputs_schema: module.outputs_schema(),
                                        input_links });
        }

        // 2. Validar referencias y compatibilidad de tipos de cada link.
        for step in steps.values() {
            for (field, link) in &step.input_links {
                let target_schema = step.inputs_schema.get(field).ok_or_else(|| {
                    EngineError::InvalidPipeline(format!("step '{}' has no input '{}'", step.step_id, field))
                })?;
                if let LinkTarget::StepOutput { step_id, field: out_field } = link {
                    let source = steps.get(step_id).ok_or_else(|| {
                        EngineError::InvalidPipeline(format!("link references unknown step '{step_id}'"))
                    })?;
                    let source_schema = source.outputs_schema.get(out_field).ok_or_else(|| {
                        EngineError::InvalidPipeline(format!("step '{step_id}' has no output '{out_field}'"))
                    })?;
                    check_link_compat(types, field, source_schema, target_schema)?;
                }
            }
        }

        // 3. Etapas topológicas (Kahn por niveles). Falla con PipelineCycle.
        let stages = compute_stages(&mut steps)?;

        // 4. Inputs libres → inputs del pipeline.
        let pipeline_inputs = collect_pipeline_inputs(declaration, &steps)?;

        // 5. Outputs: última etapa auto-exportada + aliases explícitos.
        let pipeline_outputs = collect_pipeline_outputs(declaration, &steps, &stages)?;

        let structure_hash = hashing::hash_value(&declaration.to_json())?;

        Ok(Self { name: declaration.pipeline_name.clone(),
                  doc: declaration.doc.clone(),
                  steps,
                  stages,
                  pipeline_inputs,
                  pipeline_outputs,
                  structure_hash,
                  declaration: declaration.clone() })
    }

    pub fn declaration(&self) -> &PipelineDeclaration {
        &self.declaration
    }

    pub fn step(&self, step_id: &str) -> Result<&PipelineStep, EngineError> {
        self.steps
            .get(step_id)
            .ok_or_else(|| EngineError::InvalidPipeline(format!("unknown step '{step_id}'")))
    }

    /// Consumidores de un output: (step_id, campo de input) que lo reciben.
    pub fn consumers_of(&self, step_id: &str, field: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for step in self.steps.values() {
            for (in_field, link) in &step.input_links {
                if let LinkTarget::StepOutput { step_id: src, field: src_field } = link {
                    if src == step_id && src_field == field {
                        out.push((step.step_id.clone(), in_field.clone()));
                    }
                }
            }
        }
        out
    }

    /// Outputs del pipeline alimentados por un output de step.
    pub fn exported_as(&self, step_id: &str, field: &str) -> Vec<String> {
        self.pipeline_outputs
            .iter()
            .filter(|(_, (s, f))| s == step_id && f == field)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Un link es válido si el tipo fuente es igual al destino o lo refina
/// (subtipo), o si el destino acepta `any`.
fn check_link_compat(types: &DataTypeRegistry,
                     field: &str,
                     source: &ValueSchema,
                     target: &ValueSchema)
                     -> Result<(), EngineError> {
    if types.is_subtype(&source.type_name, &target.type_name)? {
        Ok(())
    } else {
        Err(EngineError::SchemaMismatch { field: field.to_string(),
                                          expected: target.type_name.clone(),
                                          found: source.type_name.clone() })
    }
}

fn compute_stages(steps: &mut BTreeMap<String, PipelineStep>) -> Result<Vec<Vec<String>>, EngineError> {
    // Dependencias step → steps upstream.
    let mut upstream: HashMap<String, HashSet<String>> = HashMap::new();
    for step in steps.values() {
        let deps = upstream.entry(step.step_id.clone()).or_default();
        for link in step.input_links.values() {
            if let LinkTarget::StepOutput { step_id, .. } = link {
                deps.insert(step_id.clone());
            }
        }
    }

    let mut stage_of: HashMap<String, usize> = HashMap::new();
    let mut remaining: HashSet<String> = steps.keys().cloned().collect();
    let mut stages: Vec<Vec<String>> = Vec::new();

    while !remaining.is_empty() {
        // Listos: todas sus dependencias ya tienen etapa.
        let mut ready: Vec<String> = remaining.iter()
                                              .filter(|id| {
                                                  upstream[*id].iter().all(|d| stage_of.contains_key(d))
                                              })
                                              .cloned()
                                              .collect();
        if ready.is_empty() {
            let mut cycle: Vec<String> = remaining.into_iter().collect();
            cycle.sort();
            return Err(EngineError::PipelineCycle(cycle));
        }
        ready.sort();

        let stage_nr = stages.len() + 1;
        for id in &ready {
            let stage = upstream[id].iter().map(|d| stage_of[d]).max().map(|m| m + 1).unwrap_or(stage_nr);
            stage_of.insert(id.clone(), stage);
            remaining.remove(id);
        }
        // Agrupar por etapa real calculada (puede superar stage_nr cuando un
        // step depende de etapas posteriores del mismo frente).
        stages.push(ready);
    }

    // Normalizar: reagrupar por número de etapa calculado.
    let max_stage = stage_of.values().copied().max().unwrap_or(0);
    let mut grouped: Vec<Vec<String>> = vec![Vec::new(); max_stage];
    for (id, stage) in &stage_of {
        grouped[stage - 1].push(id.clone());
        steps.get_mut(id).expect("stage_of keys come from steps").stage = *stage;
    }
    for group in &mut grouped {
        group.sort();
    }
    grouped.retain(|g| !g.is_empty());
    Ok(grouped)
}

fn collect_pipeline_inputs(declaration: &PipelineDeclaration,
                           steps: &BTreeMap<String, PipelineStep>)
                           -> Result<BTreeMap<String, PipelineInput>, EngineError> {
    // Inputs libres (sin link) más los linkeados explícitamente a
    // pipeline_input:NOMBRE.
    struct Free {
        step_id: String,
        field: String,
        schema: ValueSchema,
        explicit_name: Option<String>,
    }
    let mut free: Vec<Free> = Vec::new();
    for step in steps.values() {
        for (field, schema) in &step.inputs_schema {
            match step.input_links.get(field) {
                None => free.push(Free { step_id: step.step_id.clone(),
                                         field: field.clone(),
                                         schema: schema.clone(),
                                         explicit_name: None }),
                Some(LinkTarget::PipelineInput(name)) => {
                    free.push(Free { step_id: step.step_id.clone(),
                                     field: field.clone(),
                                     schema: schema.clone(),
                                     explicit_name: Some(name.clone()) })
                }
                Some(LinkTarget::StepOutput { .. }) => {}
            }
        }
    }

    // Nombre expuesto: alias explícito > link explícito > nombre del campo;
    // colisiones de campo entre steps se califican como `step__campo`.
    let mut field_count: HashMap<String, usize> = HashMap::new();
    for f in &free {
        if f.explicit_name.is_none() {
            let alias_key = format!("{}.{}", f.step_id, f.field);
            if !declaration.input_aliases.contains_key(&alias_key) {
                *field_count.entry(f.field.clone()).or_default() += 1;
            }
        }
    }

    let mut inputs: BTreeMap<String, PipelineInput> = BTreeMap::new();
    for f in free {
        let alias_key = format!("{}.{}", f.step_id, f.field);
        let name = if let Some(alias) = declaration.input_aliases.get(&alias_key) {
            alias.clone()
        } else if let Some(explicit) = &f.explicit_name {
            explicit.clone()
        } else if field_count.get(&f.field).copied().unwrap_or(0) > 1 {
            format!("{}__{}", f.step_id, f.field)
        } else {
            f.field.clone()
        };

        let default = declaration.inputs.get(&name).cloned().or_else(|| f.schema.default.clone());
        match inputs.get_mut(&name) {
            Some(existing) => {
                // Dos destinos comparten input: los schemas deben coincidir.
                if existing.schema.schema_hash()? != f.schema.schema_hash()? {
                    return Err(EngineError::SchemaMismatch { field: name.clone(),
                                                             expected: existing.schema.type_name.clone(),
                                                             found: f.schema.type_name.clone() });
                }
                existing.targets.push((f.step_id, f.field));
            }
            None => {
                inputs.insert(name.clone(),
                              PipelineInput { name,
                                              schema: f.schema,
                                              targets: vec![(f.step_id, f.field)],
                                              default });
            }
        }
    }

    // Literales que no corresponden a ningún input son un error de la
    // declaración, no un silencio.
    for name in declaration.inputs.keys() {
        if !inputs.contains_key(name) {
            return Err(EngineError::InvalidPipeline(format!("default for unknown pipeline input '{name}'")));
        }
    }
    Ok(inputs)
}

fn collect_pipeline_outputs(declaration: &PipelineDeclaration,
                            steps: &BTreeMap<String, PipelineStep>,
                            stages: &[Vec<String>])
                            -> Result<BTreeMap<String, (String, String)>, EngineError> {
    let mut outputs: BTreeMap<String, (String, String)> = BTreeMap::new();

    // Aliases explícitos sobre cualquier step.
    for (key, name) in &declaration.output_aliases {
        let (step_id, field) = key.split_once('.').ok_or_else(|| {
            EngineError::InvalidPipeline(format!("invalid output alias key '{key}': expected 'STEP.FIELD'"))
        })?;
        let step = steps.get(step_id).ok_or_else(|| {
            EngineError::InvalidPipeline(format!("output alias references unknown step '{step_id}'"))
        })?;
        if !step.outputs_schema.contains_key(field) {
            return Err(EngineError::InvalidPipeline(format!("step '{step_id}' has no output '{field}'")));
        }
        outputs.insert(name.clone(), (step_id.to_string(), field.to_string()));
    }

    // Auto-export de la última etapa (campo tal cual, calificado en colisión).
    if let Some(last_stage) = stages.last() {
        let mut field_count: HashMap<&str, usize> = HashMap::new();
        for step_id in last_stage {
            for field in steps[step_id].outputs_schema.keys() {
                *field_count.entry(field.as_str()).or_default() += 1;
            }
        }
        for step_id in last_stage {
            for field in steps[step_id].outputs_schema.keys() {
                let already = outputs.values().any(|(s, f)| s == step_id && f == field);
                if already {
                    continue;
                }
                let name = if field_count[field.as_str()] > 1 {
                    format!("{step_id}__{field}")
                } else {
                    field.clone()
                };
                outputs.entry(name).or_insert_with(|| (step_id.clone(), field.clone()));
            }
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, ModuleOutputs};
    use crate::values::ValueMap;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug)]
    struct Gate {
        inputs: Vec<&'static str>,
    }
    impl Module for Gate {
        fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
            self.inputs.iter().map(|n| (n.to_string(), ValueSchema::new("boolean"))).collect()
        }
        fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
            BTreeMap::from([("y".to_string(), ValueSchema::new("boolean"))])
        }
        fn process(&self, _inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
            Ok(BTreeMap::from([("y".to_string(), json!(false))]))
        }
    }

    fn registries() -> (ModuleTypeRegistry, DataTypeRegistry) {
        let mut modules = ModuleTypeRegistry::new();
        modules.register("logic.and", |_| Ok(Box::new(Gate { inputs: vec!["a", "b"] }))).unwrap();
        modules.register("logic.not", |_| Ok(Box::new(Gate { inputs: vec!["a"] }))).unwrap();
        (modules, DataTypeRegistry::with_core_types())
    }

    fn nand_declaration() -> PipelineDeclaration {
        PipelineDeclaration::from_json(&json!({
            "pipeline_name": "nand",
            "steps": [
                { "step_id": "and", "module_type": "logic.and" },
                { "step_id": "not", "module_type": "logic.not",
                  "input_links": { "a": "and.y" } }
            ]
        })).unwrap()
    }

    #[test]
    fn stages_respect_link_order() {
        let (modules, types) = registries();
        let structure = PipelineStructure::compile(&nand_declaration(), &modules, &types).unwrap();
        assert_eq!(structure.stages, vec![vec!["and".to_string()], vec!["not".to_string()]]);
        assert_eq!(structure.step("and").unwrap().stage, 1);
        assert_eq!(structure.step("not").unwrap().stage, 2);
        // inputs libres de `and` promovidos; el input de `not` está linkeado
        assert_eq!(structure.pipeline_inputs.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
        // output de la última etapa auto-exportado
        assert_eq!(structure.pipeline_outputs["y"], ("not".to_string(), "y".to_string()));
    }

    #[test]
    fn cycles_are_rejected() {
        let (mut modules, types) = registries();
        modules.register("pass", |_| {
                   Ok(Box::new(PassThrough))
               })
               .unwrap();
        struct PassThrough;
        impl Module for PassThrough {
            fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
                BTreeMap::from([("in".to_string(), ValueSchema::new("boolean"))])
            }
            fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
                BTreeMap::from([("out".to_string(), ValueSchema::new("boolean"))])
            }
            fn process(&self, _inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
                Ok(BTreeMap::new())
            }
        }
        let decl = PipelineDeclaration::from_json(&json!({
            "pipeline_name": "loop",
            "steps": [
                { "step_id": "s1", "module_type": "pass", "input_links": { "in": "s2.out" } },
                { "step_id": "s2", "module_type": "pass", "input_links": { "in": "s1.out" } }
            ]
        })).unwrap();
        let err = PipelineStructure::compile(&decl, &modules, &types).unwrap_err();
        match err {
            EngineError::PipelineCycle(steps) => assert_eq!(steps, vec!["s1", "s2"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn incompatible_link_types_are_rejected() {
        let (mut modules, types) = registries();
        struct StrSource;
        impl Module for StrSource {
            fn inputs_schema(&self) -> BTreeMap<String, ValueSchema> {
                BTreeMap::new()
            }
            fn outputs_schema(&self) -> BTreeMap<String, ValueSchema> {
                BTreeMap::from([("y".to_string(), ValueSchema::new("string"))])
            }
            fn process(&self, _inputs: &ValueMap) -> Result<ModuleOutputs, EngineError> {
                Ok(BTreeMap::new())
            }
        }
        modules.register("text.source", |_| Ok(Box::new(StrSource))).unwrap();
        let decl = PipelineDeclaration::from_json(&json!({
            "pipeline_name": "bad",
            "steps": [
                { "step_id": "src", "module_type": "text.source" },
                { "step_id": "not", "module_type": "logic.not",
                  "input_links": { "a": "src.y" } }
            ]
        })).unwrap();
        let err = PipelineStructure::compile(&decl, &modules, &types).unwrap_err();
        assert!(matches!(err, EngineError::SchemaMismatch { .. }));
    }

    #[test]
    fn colliding_free_inputs_are_qualified() {
        let (modules, types) = registries();
        let decl = PipelineDeclaration::from_json(&json!({
            "pipeline_name": "two_nots",
            "steps": [
                { "step_id": "n1", "module_type": "logic.not" },
                { "step_id": "n2", "module_type": "logic.not" }
            ]
        })).unwrap();
        let structure = PipelineStructure::compile(&decl, &modules, &types).unwrap();
        let names: Vec<String> = structure.pipeline_inputs.keys().cloned().collect();
        assert_eq!(names, vec!["n1__a", "n2__a"]);
        // outputs de última etapa con colisión también se califican
        let outs: Vec<String> = structure.pipeline_outputs.keys().cloned().collect();
        assert_eq!(outs, vec!["n1__y", "n2__y"]);
    }

    #[test]
    fn structure_hash_is_stable_per_declaration() {
        let (modules, types) = registries();
        let a = PipelineStructure::compile(&nand_declaration(), &modules, &types).unwrap();
        let b = PipelineStructure::compile(&nand_declaration(), &modules, &types).unwrap();
        assert_eq!(a.structure_hash, b.structure_hash);
    }
}
