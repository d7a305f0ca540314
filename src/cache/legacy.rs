//! Reader for the flat key/value format written by older releases.
//!
//! Values too large for a single slot were split across keys: the primary
//! key, a `{key}_chunks` marker holding the fragment count and fragments
//! `{key}_chunk_{i}` starting at zero. This module only reads and removes
//! that format; new data is never written in it.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::error::StorageError;

pub struct LegacyStore {
  db: Arc<Database>,
}

fn chunk_count_key(key: &str) -> String {
  format!("{}_chunks", key)
}

fn chunk_key(key: &str, index: usize) -> String {
  format!("{}_chunk_{}", key, index)
}

impl LegacyStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.db.conn();
    let value = conn
      .query_row(
        "SELECT value FROM legacy_kv WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  /// Read `key`, joining its fragments when it was stored in chunks.
  ///
  /// A missing fragment, a bad count marker or text that does not parse is
  /// reported as `Corrupted`; the caller decides whether to remove it.
  pub fn reassemble(&self, key: &str) -> Result<Option<Value>, StorageError> {
    let text = match self.get_item(&chunk_count_key(key))? {
      Some(count) => {
        let count: usize = count
          .trim()
          .parse()
          .map_err(|_| StorageError::corrupted(key, format!("bad chunk count '{}'", count)))?;

        let mut text = String::new();
        for i in 0..count {
          let fragment = self
            .get_item(&chunk_key(key, i))?
            .ok_or_else(|| StorageError::corrupted(key, format!("missing chunk {} of {}", i, count)))?;
          text.push_str(&fragment);
        }
        debug!(key, chunks = count, "reassembled legacy entry");
        text
      }
      None => match self.get_item(key)? {
        Some(text) => text,
        None => return Ok(None),
      },
    };

    serde_json::from_str(&text)
      .map(Some)
      .map_err(|e| StorageError::corrupted(key, e))
  }

  /// Remove `key`, its count marker and every fragment.
  pub fn remove(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.db.conn();
    let fragment_prefix = format!("{}_chunk_", key);
    conn.execute(
      "DELETE FROM legacy_kv
       WHERE key = ?1 OR key = ?2 OR substr(key, 1, length(?3)) = ?3",
      params![key, chunk_count_key(key), fragment_prefix],
    )?;
    Ok(())
  }

  /// Remove every legacy value.
  pub fn clear(&self) -> Result<(), StorageError> {
    let conn = self.db.conn();
    conn.execute("DELETE FROM legacy_kv", [])?;
    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn put_item(&self, key: &str, value: &str) {
    self
      .db
      .conn()
      .execute(
        "INSERT OR REPLACE INTO legacy_kv (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .unwrap();
  }

  #[cfg(test)]
  pub(crate) fn put_chunked(&self, key: &str, value: &str, fragment_len: usize) {
    let fragments: Vec<String> = value
      .chars()
      .collect::<Vec<_>>()
      .chunks(fragment_len)
      .map(|c| c.iter().collect())
      .collect();
    self.put_item(key, "chunked");
    self.put_item(&chunk_count_key(key), &fragments.len().to_string());
    for (i, fragment) in fragments.iter().enumerate() {
      self.put_item(&chunk_key(key, i), fragment);
    }
  }

  #[cfg(test)]
  pub(crate) fn key_count(&self) -> i64 {
    self
      .db
      .conn()
      .query_row("SELECT COUNT(*) FROM legacy_kv", [], |row| row.get(0))
      .unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store() -> LegacyStore {
    LegacyStore::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_reassemble_chunked_value() {
    let store = store();
    let value = json!({"ledgers": [{"name": "Cash"}, {"name": "Bank of Baroda"}]});
    store.put_chunked("ledgerlist-w-addrs_1_Acme", &value.to_string(), 7);

    assert_eq!(
      store.reassemble("ledgerlist-w-addrs_1_Acme").unwrap(),
      Some(value)
    );
  }

  #[test]
  fn test_reassemble_plain_value() {
    let store = store();
    store.put_item("stockitems_1_Acme", r#"{"stockItems":[]}"#);
    assert_eq!(
      store.reassemble("stockitems_1_Acme").unwrap(),
      Some(json!({"stockItems": []}))
    );
    assert_eq!(store.reassemble("missing").unwrap(), None);
  }

  #[test]
  fn test_missing_fragment_is_corrupted() {
    let store = store();
    store.put_chunked("k", r#"{"a":"0123456789"}"#, 4);
    store
      .db
      .conn()
      .execute("DELETE FROM legacy_kv WHERE key = 'k_chunk_2'", [])
      .unwrap();

    assert!(store.reassemble("k").unwrap_err().is_corrupted());
  }

  #[test]
  fn test_remove_deletes_every_fragment() {
    let store = store();
    store.put_chunked("k", r#"{"a":"0123456789"}"#, 3);
    store.put_item("k_other", "{}");
    store.put_item("kx_chunk_0", "{}");

    store.remove("k").unwrap();

    assert_eq!(store.reassemble("k").unwrap(), None);
    // Unrelated keys survive
    assert_eq!(store.key_count(), 2);
  }
}
