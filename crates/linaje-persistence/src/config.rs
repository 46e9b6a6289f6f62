//! Resolución de la raíz de datos en disco.
//!
//! El contexto activo se selecciona por `LINAJE_CONTEXT` (default `default`);
//! la raíz por `LINAJE_DATA_DIR` (default `~/.local/share/linaje`, o el
//! directorio actual si no hay HOME). Cada contexto tiene su subdirectorio
//! con áreas por clase de archive.

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::path::PathBuf;

use linaje_core::constants::DATA_DIR_ENV_VAR;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone)]
pub struct ContextPaths {
    pub root: PathBuf,
    pub context_name: String,
}

impl ContextPaths {
    /// Raíz del contexto según entorno.
    pub fn from_env() -> Self {
        init_dotenv();
        let base = std::env::var(DATA_DIR_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(|home| PathBuf::from(home).join(".local/share/linaje"))
                    .unwrap_or_else(|_| PathBuf::from(".linaje"))
            });
        let context_name = linaje_core::context::context_name_from_env();
        Self { root: base.join(&context_name),
               context_name }
    }

    pub fn at(root: impl Into<PathBuf>, context_name: impl Into<String>) -> Self {
        Self { root: root.into(),
               context_name: context_name.into() }
    }

    /// Directorio del archive filesystem (valores + aliases + jobs + workflows).
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Path del archive relacional embebido.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("archive.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_are_stable() {
        let paths = ContextPaths::at("/tmp/linaje-test", "demo");
        assert_eq!(paths.store_dir(), PathBuf::from("/tmp/linaje-test/store"));
        assert_eq!(paths.db_path(), PathBuf::from("/tmp/linaje-test/archive.db"));
        assert_eq!(paths.context_name, "demo");
    }
}
