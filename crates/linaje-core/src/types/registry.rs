use std::collections::HashMap;
use std::sync::Arc;

use super::DataType;
use crate::errors::EngineError;

/// Registro nombre → descriptor. Registro fail-fast: nombres duplicados son
/// error en construcción, no en runtime.
#[derive(Default)]
pub struct DataTypeRegistry {
    inner: HashMap<String, Arc<dyn DataType>>,
}

impl DataTypeRegistry {
    pub fn new() -> Self {
        Self { inner: HashMap::new() }
    }

    /// Registro con los core types ya instalados.
    pub fn with_core_types() -> Self {
        let mut reg = Self::new();
        super::core_types::register_core_types(&mut reg).expect("core types are duplicate-free");
        reg
    }

    pub fn register(&mut self, ty: Arc<dyn DataType>) -> Result<(), EngineError> {
        let name = ty.name().to_string();
        if self.inner.contains_key(&name) {
            return Err(EngineError::DuplicateType(name));
        }
        self.inner.insert(name, ty);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DataType>, EngineError> {
        self.inner
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownDataType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cadena de dispatch de un tipo: el tipo mismo, luego sus supertipos
    /// hasta la raíz (`any`). Se usa para resolver operaciones polimórficas.
    pub fn dispatch_chain(&self, name: &str) -> Result<Vec<String>, EngineError> {
        let mut chain = Vec::new();
        let mut current = name.to_string();
        loop {
            let ty = self.get(&current)?;
            chain.push(current.clone());
            match ty.subtype_of() {
                Some(parent) if !chain.iter().any(|c| c == parent) => current = parent.to_string(),
                _ => break,
            }
        }
        Ok(chain)
    }

    /// `true` si `child` es igual a `parent` o desciende de él.
    pub fn is_subtype(&self, child: &str, parent: &str) -> Result<bool, EngineError> {
        Ok(self.dispatch_chain(child)?.iter().any(|c| c == parent))
    }
}
