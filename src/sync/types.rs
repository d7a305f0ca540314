//! Progress, checkpoint and sync-state records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, SyncError};
use crate::types::{CompanyIdentity, DateRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
  Idle,
  Running,
  Interrupted,
  Completed,
  Failed,
}

impl SyncStatus {
  /// Whether no further updates will follow for this run.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, SyncStatus::Running)
  }
}

/// Snapshot of a tenant's sync, as shown to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
  pub company_guid: String,
  pub location_id: String,
  pub current_chunk: u32,
  pub total_chunks: u32,
  pub window_label: Option<String>,
  pub message: String,
  /// Vouchers fetched during this run
  pub records_fetched: u64,
  pub started_at: Option<DateTime<Utc>>,
  pub last_updated_at: DateTime<Utc>,
  pub status: SyncStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_class: Option<ErrorClass>,
}

impl SyncProgress {
  pub fn idle(company: &CompanyIdentity) -> Self {
    Self {
      company_guid: company.guid.clone(),
      location_id: company.location_id.clone(),
      current_chunk: 0,
      total_chunks: 0,
      window_label: None,
      message: "No sync has run".to_string(),
      records_fetched: 0,
      started_at: None,
      last_updated_at: Utc::now(),
      status: SyncStatus::Idle,
      error_class: None,
    }
  }

  pub fn starting(company: &CompanyIdentity) -> Self {
    let now = Utc::now();
    Self {
      message: "Preparing sync".to_string(),
      started_at: Some(now),
      last_updated_at: now,
      status: SyncStatus::Running,
      ..Self::idle(company)
    }
  }

  /// Snapshot of an interrupted attempt, rebuilt from its checkpoint.
  pub fn from_checkpoint(company: &CompanyIdentity, checkpoint: &DownloadCheckpoint) -> Self {
    Self {
      current_chunk: checkpoint.current,
      total_chunks: checkpoint.total,
      message: format!(
        "Previous sync stopped after {} of {} windows",
        checkpoint.current, checkpoint.total
      ),
      last_updated_at: checkpoint.timestamp,
      status: SyncStatus::Interrupted,
      ..Self::idle(company)
    }
  }

  pub fn running(mut self, message: impl Into<String>) -> Self {
    self.status = SyncStatus::Running;
    self.message = message.into();
    self.last_updated_at = Utc::now();
    self
  }

  pub fn completed(mut self, message: impl Into<String>) -> Self {
    self.status = SyncStatus::Completed;
    self.message = message.into();
    self.last_updated_at = Utc::now();
    self
  }

  pub fn interrupted(mut self, message: impl Into<String>) -> Self {
    self.status = SyncStatus::Interrupted;
    self.message = message.into();
    self.last_updated_at = Utc::now();
    self
  }

  pub fn failed(mut self, error: &SyncError) -> Self {
    self.status = SyncStatus::Failed;
    self.message = error.to_string();
    self.error_class = Some(error.class());
    self.last_updated_at = Utc::now();
    self
  }
}

/// Durable record of how far a chunked download got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadCheckpoint {
  pub company_guid: String,
  /// Windows completed so far; the next window to fetch
  pub current: u32,
  pub total: u32,
  pub timestamp: DateTime<Utc>,
  pub last_alter_id: Option<u64>,
  /// Range the windows were generated from
  pub from_date: NaiveDate,
  pub to_date: NaiveDate,
}

impl DownloadCheckpoint {
  pub fn range(&self) -> DateRange {
    DateRange::new(self.from_date, self.to_date)
  }

  /// A started download that has windows left.
  pub fn is_incomplete(&self) -> bool {
    self.total > 0 && self.current < self.total
  }
}

/// Watermark left by the last completed sync of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
  pub last_alter_id: Option<u64>,
  /// Last date covered by the synced data
  pub synced_to: NaiveDate,
  pub completed_at: DateTime<Utc>,
}
