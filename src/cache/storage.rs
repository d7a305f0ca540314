//! SQLite record-store backend.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use super::traits::{CacheType, EntryMeta, StorageBackend, StoredEntry};
use crate::db::Database;
use crate::error::StorageError;
use crate::types::DateRange;

/// Cache entries stored as rows of `cache_records`.
///
/// Every write is a single `INSERT OR REPLACE`, so a reader never sees a
/// half-written row.
pub struct SqliteBackend {
  db: Arc<Database>,
}

impl SqliteBackend {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const META_COLUMNS: &str = "cache_key, size_bytes, checksum, cache_type, date_from, date_to, created_at";

/// Decode the metadata columns selected by `META_COLUMNS`.
///
/// Rows that fail to decode come back as `Err(reason)` next to their key so
/// the caller can treat them as corrupted.
fn meta_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Result<EntryMeta, String>)> {
  let key: String = row.get(0)?;
  let size_bytes: i64 = row.get(1)?;
  let checksum: String = row.get(2)?;
  let cache_type: String = row.get(3)?;
  let date_from: Option<String> = row.get(4)?;
  let date_to: Option<String> = row.get(5)?;
  let created_at: String = row.get(6)?;

  let meta = decode_meta(
    key.clone(),
    size_bytes,
    checksum,
    &cache_type,
    date_from,
    date_to,
    &created_at,
  );
  Ok((key, meta))
}

fn decode_meta(
  key: String,
  size_bytes: i64,
  checksum: String,
  cache_type: &str,
  date_from: Option<String>,
  date_to: Option<String>,
  created_at: &str,
) -> Result<EntryMeta, String> {
  let cache_type =
    CacheType::parse(cache_type).ok_or_else(|| format!("unknown cache type '{}'", cache_type))?;

  let created_at = DateTime::parse_from_rfc3339(created_at)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("bad created_at '{}': {}", created_at, e))?;

  let date_range = match (date_from, date_to) {
    (Some(from), Some(to)) => {
      let from = NaiveDate::parse_from_str(&from, "%Y-%m-%d")
        .map_err(|e| format!("bad date_from '{}': {}", from, e))?;
      let to = NaiveDate::parse_from_str(&to, "%Y-%m-%d")
        .map_err(|e| format!("bad date_to '{}': {}", to, e))?;
      Some(DateRange::new(from, to))
    }
    _ => None,
  };

  Ok(EntryMeta {
    key,
    size_bytes: u64::try_from(size_bytes).map_err(|_| "negative size".to_string())?,
    created_at,
    cache_type,
    date_range,
    checksum,
  })
}

impl StorageBackend for SqliteBackend {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
    let conn = self.db.conn();

    let mut stmt = conn.prepare(&format!(
      "SELECT {}, data FROM cache_records WHERE cache_key = ?",
      META_COLUMNS
    ))?;

    let row = stmt
      .query_row(params![key], |row| {
        let (_, meta) = meta_from_row(row)?;
        let data: Vec<u8> = row.get(7)?;
        Ok((meta, data))
      })
      .optional()?;

    match row {
      Some((Ok(meta), payload)) => Ok(Some(StoredEntry { meta, payload })),
      Some((Err(reason), _)) => Err(StorageError::corrupted(key, reason)),
      None => Ok(None),
    }
  }

  fn write(&self, meta: &EntryMeta, payload: &[u8]) -> Result<(), StorageError> {
    let conn = self.db.conn();

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_records
           (cache_key, data, size_bytes, checksum, cache_type, date_from, date_to, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          meta.key,
          payload,
          meta.size_bytes as i64,
          meta.checksum,
          meta.cache_type.as_str(),
          meta.date_range.map(|r| r.from.to_string()),
          meta.date_range.map(|r| r.to.to_string()),
          meta.created_at.to_rfc3339(),
        ],
      )
      .map_err(|e| StorageError::from_sqlite(e, &meta.key))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.db.conn();
    conn
      .execute("DELETE FROM cache_records WHERE cache_key = ?", params![key])
      .map_err(|e| StorageError::from_sqlite(e, key))?;
    Ok(())
  }

  fn clear(&self) -> Result<(), StorageError> {
    let conn = self.db.conn();
    conn
      .execute("DELETE FROM cache_records", [])
      .map_err(|e| StorageError::from_sqlite(e, "*"))?;
    Ok(())
  }

  fn scan(&self) -> Result<Vec<EntryMeta>, StorageError> {
    let conn = self.db.conn();

    let mut stmt = conn.prepare(&format!("SELECT {} FROM cache_records", META_COLUMNS))?;
    let rows = stmt
      .query_map([], meta_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut metas = Vec::with_capacity(rows.len());
    let mut damaged = Vec::new();
    for (key, meta) in rows {
      match meta {
        Ok(meta) => metas.push(meta),
        Err(reason) => damaged.push((key, reason)),
      }
    }

    // Rows without usable metadata can be neither listed nor expired; drop
    // them so the index and the table agree.
    for (key, reason) in damaged {
      tracing::warn!(key = %key, reason = %reason, "removing cache row with unreadable metadata");
      conn
      .execute("DELETE FROM cache_records WHERE cache_key = ?", params![key])
      .map_err(|e| StorageError::from_sqlite(e, &key))?;
    }

    Ok(metas)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn backend() -> SqliteBackend {
    SqliteBackend::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_write_read_remove() {
    let backend = backend();
    let range = DateRange::new(
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
    );
    let payload = br#"{"vouchers":[]}"#;
    let meta = EntryMeta::describe("sales_l_c_20240101_20240102", payload, CacheType::Sales, Some(range));
    backend.write(&meta, payload).unwrap();

    let entry = backend.read(&meta.key).unwrap().unwrap();
    assert_eq!(entry.payload, payload);
    assert_eq!(entry.meta.date_range, Some(range));
    assert_eq!(entry.meta.cache_type, CacheType::Sales);
    assert_eq!(entry.meta.created_at, meta.created_at);
    entry.verify().unwrap();

    backend.remove(&meta.key).unwrap();
    assert!(backend.read(&meta.key).unwrap().is_none());
    // Idempotent
    backend.remove(&meta.key).unwrap();
  }

  #[test]
  fn test_scan_lists_all_rows() {
    let backend = backend();
    for key in ["a", "b", "c"] {
      let meta = EntryMeta::describe(key, b"x", CacheType::Dashboard, None);
      backend.write(&meta, b"x").unwrap();
    }
    assert_eq!(backend.scan().unwrap().len(), 3);

    backend.clear().unwrap();
    assert!(backend.scan().unwrap().is_empty());
  }

  #[test]
  fn test_read_only_database_fails_remove_and_clear_as_permission_denied() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let backend = SqliteBackend::new(Arc::clone(&db));
    let meta = EntryMeta::describe("k", b"x", CacheType::Dashboard, None);
    backend.write(&meta, b"x").unwrap();
    db.conn().execute_batch("PRAGMA query_only = ON").unwrap();

    assert!(matches!(
      backend.remove("k"),
      Err(StorageError::PermissionDenied { .. })
    ));
    assert!(matches!(
      backend.clear(),
      Err(StorageError::PermissionDenied { .. })
    ));
    assert!(backend.read("k").unwrap().is_some());
  }

  #[test]
  fn test_unreadable_row_is_corrupted_and_dropped_by_scan() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let backend = SqliteBackend::new(Arc::clone(&db));
    let good = EntryMeta::describe("good", b"x", CacheType::Dashboard, None);
    backend.write(&good, b"x").unwrap();
    db.conn()
      .execute(
        "INSERT INTO cache_records VALUES ('bad', x'00', 1, 'c', 'mystery', NULL, NULL, 'yesterday')",
        [],
      )
      .unwrap();

    assert!(backend.read("bad").unwrap_err().is_corrupted());

    let keys: Vec<String> = backend.scan().unwrap().into_iter().map(|m| m.key).collect();
    assert_eq!(keys, vec!["good"]);
    assert!(backend.read("bad").unwrap().is_none());
  }
}
