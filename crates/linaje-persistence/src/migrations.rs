//! Runner de migraciones embebidas.
//!
//! Las migraciones viven en `migrations/` de este crate y se aplican al abrir
//! el archive. El versionado del formato lógico va aparte, en `archive_meta`
//! (`format_version`); una versión desconocida hacia adelante es fatal.

use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::PersistenceError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn run_pending_migrations(conn: &mut SqliteConnection) -> Result<(), PersistenceError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| PersistenceError::Unknown(format!("migration error: {e}")))
}
