use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheOptions, HybridCache};
use crate::config::Config;
use crate::db::Database;
use crate::sync::{ProgressStore, SyncOrchestrator, SyncSettings};
use crate::tally::TallyClient;

const DATABASE_FILE: &str = "tallysync.db";
const ENTRIES_DIR: &str = "entries";

/// The cache, the progress store and the orchestrator wired over one data
/// directory.
pub struct Engine {
  pub cache: HybridCache,
  pub progress: ProgressStore,
  pub sync: SyncOrchestrator,
}

impl Engine {
  /// Open every store under the configured data directory. Expired cache
  /// entries are removed on the way.
  pub async fn open(config: &Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let db = Arc::new(
      Database::open(&data_dir.join(DATABASE_FILE))
        .map_err(|e| eyre!("Failed to open database in {}: {}", data_dir.display(), e))?,
    );

    let cache = HybridCache::open(
      Arc::clone(&db),
      &CacheOptions {
        root: data_dir.join(ENTRIES_DIR),
        backend: config.cache.backend,
        expiry: config.cache.expiry_days,
      },
    )?;
    let expired = cache.expire(Utc::now()).await?;
    if expired > 0 {
      info!(expired, "removed expired cache entries");
    }

    let progress = ProgressStore::new(db);
    let client = TallyClient::new(config)?;
    let sync = SyncOrchestrator::new(
      Arc::new(client),
      cache.clone(),
      progress.clone(),
      SyncSettings::from(&config.sync),
    );

    Ok(Self {
      cache,
      progress,
      sync,
    })
  }
}
