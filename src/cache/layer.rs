//! Hybrid cache: one physical backend, the legacy fallback reader and the
//! in-memory metadata index behind a single key/value API.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::directory::DirectoryBackend;
use super::index::{CacheSummary, MetadataIndex};
use super::key::{infer_type, CacheKey};
use super::legacy::LegacyStore;
use super::storage::SqliteBackend;
use super::traits::{EntryMeta, StorageBackend, StoredEntry};
use crate::config::{BackendKind, CacheExpiry};
use crate::db::Database;
use crate::error::StorageError;
use crate::notify::{Hub, Subscription};
use crate::types::{CompanyIdentity, DateRange};

/// Delay before the single re-read of a key the index lists but the backend
/// did not return.
const READ_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Change published after every mutation of the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
  Updated { key: String, size_bytes: u64 },
  Removed { key: String },
  Corrupted { key: String },
  Cleared,
  CompanyCleared { company: CompanyIdentity, removed: usize },
  Expired { removed: usize },
}

/// Options for [`HybridCache::open`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
  /// Root of the directory backend
  pub root: PathBuf,
  pub backend: BackendKind,
  pub expiry: CacheExpiry,
}

struct Inner {
  backend: Box<dyn StorageBackend>,
  legacy: LegacyStore,
  index: Mutex<MetadataIndex>,
  expiry: CacheExpiry,
  events: Hub<CacheEvent>,
}

/// Key/value cache over the selected backend.
///
/// Every mutating call updates the metadata index before it returns, so
/// `list_all` never lags behind the backend for this process.
#[derive(Clone)]
pub struct HybridCache {
  inner: Arc<Inner>,
}

impl HybridCache {
  /// Open the cache, choosing the backend by capability.
  pub fn open(db: Arc<Database>, options: &CacheOptions) -> Result<Self, StorageError> {
    let backend: Box<dyn StorageBackend> = match options.backend {
      BackendKind::Sqlite => Box::new(SqliteBackend::new(Arc::clone(&db))),
      BackendKind::Directory => Box::new(DirectoryBackend::open(&options.root)?),
      BackendKind::Auto => match DirectoryBackend::open(&options.root) {
        Ok(dir) => Box::new(dir),
        Err(e) => {
          warn!(error = %e, "directory store unavailable, falling back to the record store");
          Box::new(SqliteBackend::new(Arc::clone(&db)))
        }
      },
    };

    Self::with_backend(backend, LegacyStore::new(db), options.expiry)
  }

  /// Build the cache over an explicit backend.
  pub fn with_backend(
    backend: Box<dyn StorageBackend>,
    legacy: LegacyStore,
    expiry: CacheExpiry,
  ) -> Result<Self, StorageError> {
    let index = MetadataIndex::from_entries(backend.scan()?);
    info!(
      backend = backend.name(),
      entries = index.len(),
      "cache opened"
    );

    Ok(Self {
      inner: Arc::new(Inner {
        backend,
        legacy,
        index: Mutex::new(index),
        expiry,
        events: Hub::new(),
      }),
    })
  }

  pub fn backend_name(&self) -> &'static str {
    self.inner.backend.name()
  }

  fn index(&self) -> MutexGuard<'_, MetadataIndex> {
    self.inner.index.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Read a payload. `Ok(None)` is a cache miss.
  ///
  /// Falls back to the legacy store when the primary backend has no entry.
  pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    if let Some(entry) = self.read_primary(key).await? {
      return Ok(Some(entry.payload));
    }

    match self.inner.legacy.reassemble(key) {
      Ok(Some(value)) => {
        debug!(key, "served from legacy store");
        Ok(Some(serde_json::to_vec(&value)?))
      }
      Ok(None) => Ok(None),
      Err(e) if e.is_corrupted() => {
        warn!(key, error = %e, "removing corrupted legacy entry");
        self.inner.legacy.remove(key)?;
        self.inner.events.publish(CacheEvent::Corrupted {
          key: key.to_string(),
        });
        Err(e)
      }
      Err(e) => Err(e),
    }
  }

  /// Read and decode a JSON payload.
  ///
  /// An entry that fails to decode is deleted before the `Corrupted` error is
  /// returned; a following `get` on the key is a miss.
  pub async fn get_as_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
    let Some(bytes) = self.get(key).await? else {
      return Ok(None);
    };

    match serde_json::from_slice(&bytes) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        self.purge(key)?;
        Err(StorageError::corrupted(key, e))
      }
    }
  }

  /// Store a payload, replacing any previous value for `key`.
  pub async fn set(
    &self,
    key: &str,
    payload: &[u8],
    date_range: Option<DateRange>,
  ) -> Result<EntryMeta, StorageError> {
    let meta = EntryMeta::describe(key, payload, infer_type(key), date_range);
    self.inner.backend.write(&meta, payload)?;
    self.index().insert(meta.clone());

    debug!(
      key,
      bytes = meta.size_bytes,
      backend = self.backend_name(),
      "cache entry stored"
    );
    self.inner.events.publish(CacheEvent::Updated {
      key: key.to_string(),
      size_bytes: meta.size_bytes,
    });
    Ok(meta)
  }

  /// Serialize `value` as JSON and store it.
  pub async fn set_json<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    date_range: Option<DateRange>,
  ) -> Result<EntryMeta, StorageError> {
    let payload = serde_json::to_vec(value)?;
    self.set(key, &payload, date_range).await
  }

  /// Remove `key` from the backend, the legacy store and the index.
  pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
    self.inner.backend.remove(key)?;
    self.inner.legacy.remove(key)?;
    self.index().remove(key);

    self.inner.events.publish(CacheEvent::Removed {
      key: key.to_string(),
    });
    Ok(())
  }

  /// Summary of every entry, computed from the index.
  pub fn list_all(&self) -> CacheSummary {
    self.index().summary()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.index().contains(key)
  }

  /// Metadata of the entries whose key starts with `prefix`.
  pub fn entries_with_prefix(&self, prefix: &str) -> Vec<EntryMeta> {
    self.index().with_prefix(prefix)
  }

  /// Remove every entry, legacy values included.
  pub async fn clear_all(&self) -> Result<(), StorageError> {
    self.inner.backend.clear()?;
    self.inner.legacy.clear()?;
    self.index().clear();

    info!("cache cleared");
    self.inner.events.publish(CacheEvent::Cleared);
    Ok(())
  }

  /// Remove every entry belonging to `company`. Returns the number of
  /// indexed entries removed.
  pub async fn clear_by_company(&self, company: &CompanyIdentity) -> Result<usize, StorageError> {
    let keys = self
      .index()
      .keys_where(|meta| CacheKey::belongs_to(&meta.key, company));

    for key in &keys {
      self.inner.backend.remove(key)?;
      self.inner.legacy.remove(key)?;
      self.index().remove(key);
    }

    // Legacy-only copies of the master datasets
    for key in [CacheKey::ledgers(company), CacheKey::stock_items(company)] {
      self.inner.legacy.remove(&key)?;
    }

    info!(company = %company, removed = keys.len(), "company cache cleared");
    self.inner.events.publish(CacheEvent::CompanyCleared {
      company: company.clone(),
      removed: keys.len(),
    });
    Ok(keys.len())
  }

  /// Remove entries older than the configured expiry. Returns the number of
  /// entries removed; always zero when expiry is disabled.
  pub async fn expire(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
    let Some(max_age) = self.inner.expiry.max_age() else {
      return Ok(0);
    };
    let cutoff = now - max_age;

    let keys = self.index().keys_where(|meta| meta.created_at < cutoff);
    for key in &keys {
      self.inner.backend.remove(key)?;
      self.index().remove(key);
    }

    if !keys.is_empty() {
      info!(removed = keys.len(), cutoff = %cutoff, "expired cache entries");
      self.inner.events.publish(CacheEvent::Expired {
        removed: keys.len(),
      });
    }
    Ok(keys.len())
  }

  /// Register a callback for cache changes.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(CacheEvent) + Send + 'static,
  {
    self.inner.events.subscribe(callback)
  }

  /// Read from the primary backend, verifying the payload digest.
  ///
  /// When the index lists the key but the backend does not return it, the
  /// read is retried once: the entry may have been published by a write that
  /// is not yet visible to this reader.
  async fn read_primary(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
    let entry = self.read_verified(key)?;
    if entry.is_some() {
      return Ok(entry);
    }

    let listed = self.index().contains(key);
    if !listed {
      return Ok(None);
    }

    tokio::time::sleep(READ_RETRY_DELAY).await;
    let entry = self.read_verified(key)?;
    if entry.is_none() {
      warn!(key, "index listed a key the backend does not hold");
      self.index().remove(key);
    }
    Ok(entry)
  }

  fn read_verified(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
    let result = self
      .inner
      .backend
      .read(key)
      .and_then(|entry| match entry {
        Some(entry) => entry.verify().map(|_| Some(entry)),
        None => Ok(None),
      });

    match result {
      Err(e) if e.is_corrupted() => {
        self.purge(key)?;
        Err(e)
      }
      other => other,
    }
  }

  /// Delete a corrupted entry everywhere it may live.
  fn purge(&self, key: &str) -> Result<(), StorageError> {
    warn!(key, "removing corrupted cache entry");
    self.inner.backend.remove(key)?;
    self.inner.legacy.remove(key)?;
    self.index().remove(key);

    self.inner.events.publish(CacheEvent::Corrupted {
      key: key.to_string(),
    });
    Ok(())
  }
}
