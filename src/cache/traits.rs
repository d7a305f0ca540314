//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::types::DateRange;

/// Kind of dataset a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
  Sales,
  Dashboard,
  Customers,
  Items,
  Session,
}

impl CacheType {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheType::Sales => "sales",
      CacheType::Dashboard => "dashboard",
      CacheType::Customers => "customers",
      CacheType::Items => "items",
      CacheType::Session => "session",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "sales" => Some(CacheType::Sales),
      "dashboard" => Some(CacheType::Dashboard),
      "customers" => Some(CacheType::Customers),
      "items" => Some(CacheType::Items),
      "session" => Some(CacheType::Session),
      _ => None,
    }
  }
}

/// Metadata describing one stored entry.
///
/// This is what the in-memory index holds; the payload itself stays in the
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
  pub key: String,
  pub size_bytes: u64,
  pub created_at: DateTime<Utc>,
  #[serde(rename = "type")]
  pub cache_type: CacheType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date_range: Option<DateRange>,
  /// Hex SHA-256 of the payload
  pub checksum: String,
}

impl EntryMeta {
  pub fn describe(
    key: &str,
    payload: &[u8],
    cache_type: CacheType,
    date_range: Option<DateRange>,
  ) -> Self {
    Self {
      key: key.to_string(),
      size_bytes: payload.len() as u64,
      created_at: Utc::now(),
      cache_type,
      date_range,
      checksum: checksum(payload),
    }
  }
}

/// An entry read back from a backend.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub meta: EntryMeta,
  pub payload: Vec<u8>,
}

impl StoredEntry {
  /// Check the payload against the recorded digest.
  pub fn verify(&self) -> Result<(), StorageError> {
    if self.payload.len() as u64 != self.meta.size_bytes {
      return Err(StorageError::corrupted(
        &self.meta.key,
        format!(
          "expected {} bytes, found {}",
          self.meta.size_bytes,
          self.payload.len()
        ),
      ));
    }
    if checksum(&self.payload) != self.meta.checksum {
      return Err(StorageError::corrupted(&self.meta.key, "checksum mismatch"));
    }
    Ok(())
  }
}

/// Trait for physical cache backends.
///
/// Writes must be atomic from a reader's point of view: a reader sees either
/// the previous value or the new one, never a truncated payload.
pub trait StorageBackend: Send + Sync {
  /// Short name for logs and status output
  fn name(&self) -> &'static str;

  /// Read an entry. Undecodable entries are reported as `Corrupted`.
  fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError>;

  /// Store an entry, replacing any previous value for the key.
  fn write(&self, meta: &EntryMeta, payload: &[u8]) -> Result<(), StorageError>;

  /// Remove an entry. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), StorageError>;

  /// Remove every entry.
  fn clear(&self) -> Result<(), StorageError>;

  /// Enumerate the metadata of every entry.
  fn scan(&self) -> Result<Vec<EntryMeta>, StorageError>;
}

/// Hex SHA-256 of a payload.
pub fn checksum(payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hex::encode(hasher.finalize())
}
