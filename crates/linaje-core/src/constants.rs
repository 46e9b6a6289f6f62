//! Constantes del motor.
//!
//! `ENGINE_VERSION` identifica la versión lógica del motor; no participa en
//! los hashes de jobs (las fórmulas de job hash son contrato estable) pero se
//! persiste como metadato informativo de los archives.

pub const ENGINE_VERSION: &str = "0.4";

/// Variable de entorno que selecciona el contexto activo.
pub const CONTEXT_ENV_VAR: &str = "LINAJE_CONTEXT";
/// Variable de entorno que fija la raíz de datos en disco.
pub const DATA_DIR_ENV_VAR: &str = "LINAJE_DATA_DIR";
/// Nombre del contexto por defecto.
pub const DEFAULT_CONTEXT_NAME: &str = "default";

/// Versión del formato de archives persistidos. Versiones desconocidas hacia
/// adelante se rechazan con `IncompatibleArchive`.
pub const ARCHIVE_FORMAT_VERSION: i64 = 1;

/// Etiqueta de origen para valores aportados por el usuario.
pub const ORIGIN_EXTERNAL: &str = "external";
