//! Durable download checkpoints, dismissed interruptions and sync watermarks.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{DownloadCheckpoint, SyncState};
use crate::db::Database;
use crate::error::StorageError;
use crate::types::{CompanyIdentity, DateRange};

/// Storage key of a tenant's checkpoint.
pub fn checkpoint_key(company: &CompanyIdentity) -> String {
  format!(
    "download_progress_{}_{}",
    company.location_id, company.guid
  )
}

/// SQLite-backed progress store.
#[derive(Clone)]
pub struct ProgressStore {
  db: Arc<Database>,
}

impl ProgressStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Record that `current` of `total` windows are done. The write is
  /// committed before this returns.
  pub fn write_checkpoint(
    &self,
    company: &CompanyIdentity,
    current: u32,
    total: u32,
    last_alter_id: Option<u64>,
    range: DateRange,
  ) -> Result<DownloadCheckpoint, StorageError> {
    let key = checkpoint_key(company);
    let checkpoint = DownloadCheckpoint {
      company_guid: company.guid.clone(),
      current: current.min(total),
      total,
      timestamp: Utc::now(),
      last_alter_id,
      from_date: range.from,
      to_date: range.to,
    };
    let data = serde_json::to_string(&checkpoint)?;

    self
      .db
      .conn()
      .execute(
        "INSERT OR REPLACE INTO download_progress (progress_key, data, updated_at)
         VALUES (?1, ?2, ?3)",
        params![key, data, checkpoint.timestamp.to_rfc3339()],
      )
      .map_err(|e| StorageError::from_sqlite(e, &key))?;

    debug!(key = %key, current, total, "checkpoint written");
    Ok(checkpoint)
  }

  /// The tenant's checkpoint, if any. An unreadable checkpoint is removed and
  /// reported as absent.
  pub fn read_checkpoint(
    &self,
    company: &CompanyIdentity,
  ) -> Result<Option<DownloadCheckpoint>, StorageError> {
    let key = checkpoint_key(company);
    let data: Option<String> = self
      .db
      .conn()
      .query_row(
        "SELECT data FROM download_progress WHERE progress_key = ?1",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    let Some(data) = data else {
      return Ok(None);
    };

    match serde_json::from_str::<DownloadCheckpoint>(&data) {
      Ok(checkpoint) if checkpoint.current <= checkpoint.total => Ok(Some(checkpoint)),
      Ok(checkpoint) => {
        warn!(
          key = %key,
          current = checkpoint.current,
          total = checkpoint.total,
          "discarding inconsistent checkpoint"
        );
        self.clear_checkpoint(company)?;
        Ok(None)
      }
      Err(e) => {
        warn!(key = %key, error = %e, "discarding unreadable checkpoint");
        self.clear_checkpoint(company)?;
        Ok(None)
      }
    }
  }

  pub fn clear_checkpoint(&self, company: &CompanyIdentity) -> Result<(), StorageError> {
    let key = checkpoint_key(company);
    self.db.conn().execute(
      "DELETE FROM download_progress WHERE progress_key = ?1",
      params![key],
    )?;
    Ok(())
  }

  /// The checkpoint of an interrupted attempt, unless a sync is `running`
  /// for the tenant or the user dismissed this exact interruption.
  pub fn detect_interrupted(
    &self,
    company: &CompanyIdentity,
    running: bool,
  ) -> Result<Option<DownloadCheckpoint>, StorageError> {
    if running {
      return Ok(None);
    }

    let Some(checkpoint) = self.read_checkpoint(company)? else {
      return Ok(None);
    };
    if !checkpoint.is_incomplete() {
      return Ok(None);
    }

    if self.is_dismissed(company, checkpoint.current, checkpoint.total)? {
      return Ok(None);
    }
    Ok(Some(checkpoint))
  }

  /// Remember that the interruption at `current` of `total` was dismissed.
  pub fn dismiss(
    &self,
    company: &CompanyIdentity,
    current: u32,
    total: u32,
  ) -> Result<(), StorageError> {
    self.db.conn().execute(
      "INSERT OR REPLACE INTO dismissed_interruptions
         (tenant, current_chunk, total_chunks, dismissed_at)
       VALUES (?1, ?2, ?3, ?4)",
      params![
        company.tenant_key().to_string(),
        current,
        total,
        Utc::now().to_rfc3339()
      ],
    )?;
    Ok(())
  }

  fn is_dismissed(
    &self,
    company: &CompanyIdentity,
    current: u32,
    total: u32,
  ) -> Result<bool, StorageError> {
    let found: Option<i64> = self
      .db
      .conn()
      .query_row(
        "SELECT 1 FROM dismissed_interruptions
         WHERE tenant = ?1 AND current_chunk = ?2 AND total_chunks = ?3",
        params![company.tenant_key().to_string(), current, total],
        |row| row.get(0),
      )
      .optional()?;
    Ok(found.is_some())
  }

  pub fn read_sync_state(&self, company: &CompanyIdentity) -> Result<Option<SyncState>, StorageError> {
    let tenant = company.tenant_key().to_string();
    let data: Option<String> = self
      .db
      .conn()
      .query_row(
        "SELECT data FROM sync_state WHERE tenant = ?1",
        params![tenant],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => match serde_json::from_str(&data) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
          warn!(tenant = %tenant, error = %e, "discarding unreadable sync state");
          self.clear_sync_state(company)?;
          Ok(None)
        }
      },
      None => Ok(None),
    }
  }

  pub fn write_sync_state(
    &self,
    company: &CompanyIdentity,
    state: &SyncState,
  ) -> Result<(), StorageError> {
    let data = serde_json::to_string(state)?;
    self.db.conn().execute(
      "INSERT OR REPLACE INTO sync_state (tenant, data, updated_at) VALUES (?1, ?2, ?3)",
      params![
        company.tenant_key().to_string(),
        data,
        Utc::now().to_rfc3339()
      ],
    )?;
    Ok(())
  }

  pub fn clear_sync_state(&self, company: &CompanyIdentity) -> Result<(), StorageError> {
    self.db.conn().execute(
      "DELETE FROM sync_state WHERE tenant = ?1",
      params![company.tenant_key().to_string()],
    )?;
    Ok(())
  }

  /// Forget everything recorded for the tenant.
  pub fn clear_tenant(&self, company: &CompanyIdentity) -> Result<(), StorageError> {
    let tenant = company.tenant_key().to_string();
    let mut conn = self.db.conn();
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM download_progress WHERE progress_key = ?1",
      params![checkpoint_key(company)],
    )?;
    tx.execute(
      "DELETE FROM dismissed_interruptions WHERE tenant = ?1",
      params![tenant],
    )?;
    tx.execute("DELETE FROM sync_state WHERE tenant = ?1", params![tenant])?;
    tx.commit()?;
    Ok(())
  }
}
