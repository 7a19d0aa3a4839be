use diesel::{Connection as ConnectionTrait, sql_query};
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::core::GenericResult;

pub mod models;
pub mod schema;

pub use diesel::SqliteConnection as Connection;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn connect(url: &str) -> GenericResult<Connection> {
    let mut connection = Connection::establish(url).map_err(|e| format!(
        "Unable to connect to {:?} database: {}", url, e))?;

    sql_query("PRAGMA foreign_keys = ON").execute(&mut connection).map_err(|e| format!(
        "Failed to enable foreign key enforcement: {}", e))?;

    connection.run_pending_migrations(MIGRATIONS).map_err(|e| format!(
        "Failed to prepare the database: {}", e))?;

    Ok(connection)
}

#[cfg(test)]
pub fn new_temporary() -> (tempfile::NamedTempFile, Connection) {
    let database = tempfile::NamedTempFile::new().unwrap();
    let connection = connect(database.path().to_str().unwrap()).unwrap();
    (database, connection)
}
