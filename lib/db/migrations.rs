use std::error::Error;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies every pending Postgres migration over a short-lived blocking connection.
pub fn run_postgres_migrations(db_url: &str) -> Result<usize, Box<dyn Error + Send + Sync>> {
    let mut conn = PgConnection::establish(db_url)?;
    let applied = conn.run_pending_migrations(MIGRATIONS)?;

    for version in &applied {
        info!(event = "migration_applied", version = %version, "applied migration");
    }
    Ok(applied.len())
}
