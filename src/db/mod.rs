pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StorageError;

/// SQLite database shared by the record store, the legacy reader and the
/// progress store.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| StorageError::from_io(e, "", parent))?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    let db = Self {
      conn: Mutex::new(Connection::open_in_memory()?),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<(), StorageError> {
    self.conn().execute_batch(schema::SCHEMA)?;
    Ok(())
  }

  /// Lock the connection.
  ///
  /// A poisoned lock still holds a usable connection: every write is a
  /// single statement or a transaction, so a panicking holder cannot leave
  /// partial state behind.
  pub fn conn(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(|e| e.into_inner())
  }
}
