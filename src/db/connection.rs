use crate::db::schema::create_tables;
use crate::errors::{Error, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

/// Shared handle to the single sqlite connection. Every registry read and
/// version-guarded write takes the mutex, so statements never interleave.
pub type DbPool = Arc<Mutex<Connection>>;

/// Opens (or creates) the sqlite file backing the machine registry and
/// ensures the schema exists.
#[instrument]
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    debug!("Opening machine registry database at: {}", db_path);
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("Failed to open database at {}: {}", db_path, e)))?;

    info!("Registry database opened. Ensuring tables exist...");
    create_tables(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}
