//! Error types for the cache and sync engine.
//!
//! Messages are user-facing and end with a hint on how to recover.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the storage layer.
///
/// A cache miss is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum StorageError {
  /// The entry failed to decode or its digest did not match. It has already
  /// been deleted when this is returned.
  #[error("Cache entry '{key}' was corrupted and has been removed ({reason}). Sync the company again to re-download it.")]
  Corrupted { key: String, reason: String },

  #[error("Storage is full while writing '{key}'. Free disk space or run 'tallysync clear' to drop cached data.")]
  QuotaExceeded { key: String },

  #[error("Permission denied for '{path}'. Check that the cache directory is writable.")]
  PermissionDenied { path: String },

  #[error("Cache database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("Cache file operation failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("Failed to encode cache payload: {0}")]
  Encode(#[from] serde_json::Error),
}

impl StorageError {
  pub fn corrupted(key: impl Into<String>, reason: impl ToString) -> Self {
    Self::Corrupted {
      key: key.into(),
      reason: reason.to_string(),
    }
  }

  /// Classify an I/O error raised while touching `path` for `key`.
  pub fn from_io(err: std::io::Error, key: &str, path: &std::path::Path) -> Self {
    // ENOSPC / EDQUOT
    if matches!(err.raw_os_error(), Some(28) | Some(122)) {
      return Self::QuotaExceeded {
        key: key.to_string(),
      };
    }
    match err.kind() {
      std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
        path: path.display().to_string(),
      },
      _ => Self::Io(err),
    }
  }

  /// Classify a SQLite error raised while writing `key`.
  pub fn from_sqlite(err: rusqlite::Error, key: &str) -> Self {
    use rusqlite::ErrorCode;

    match err.sqlite_error_code() {
      Some(ErrorCode::DiskFull) => Self::QuotaExceeded {
        key: key.to_string(),
      },
      Some(ErrorCode::ReadOnly) | Some(ErrorCode::PermissionDenied) => Self::PermissionDenied {
        path: format!("cache database ({})", key),
      },
      _ => Self::Database(err),
    }
  }

  pub fn is_corrupted(&self) -> bool {
    matches!(self, Self::Corrupted { .. })
  }
}

/// Coarse class of a failed remote request, used for messaging only.
///
/// Every class shares the same resume mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
  Server,
  Connectivity,
  Blocked,
  AuthExpired,
  NotFound,
  Timeout,
  Rejected,
  Decode,
  Storage,
}

/// Errors raised by the remote data source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Server error (HTTP {status}). The server may be busy; resume the sync in a few minutes.")]
  Server { status: u16 },

  #[error("Network connection lost ({0}). Check your connection, then resume the sync.")]
  Connectivity(String),

  #[error("Request was blocked by the server (HTTP 403). Check that this client is allowed to reach the endpoint.")]
  Blocked,

  #[error("Session expired (HTTP 401). Sign in again, then resume the sync.")]
  AuthExpired,

  #[error("Endpoint not found: {0}. Check the server URL in the configuration.")]
  NotFound(String),

  #[error("Request timed out. Resume the sync to retry this window.")]
  Timeout,

  #[error("Request rejected (HTTP {status}): {message}")]
  Rejected { status: u16, message: String },

  #[error("Failed to decode server response: {0}")]
  Decode(String),
}

impl FetchError {
  /// Map a non-success HTTP status to an error.
  pub fn from_status(status: u16, url: &str, body: &str) -> Self {
    match status {
      401 => Self::AuthExpired,
      403 => Self::Blocked,
      404 => Self::NotFound(url.to_string()),
      408 => Self::Timeout,
      500..=599 => Self::Server { status },
      _ => Self::Rejected {
        status,
        message: body.chars().take(200).collect(),
      },
    }
  }

  pub fn class(&self) -> ErrorClass {
    match self {
      Self::Server { .. } => ErrorClass::Server,
      Self::Connectivity(_) => ErrorClass::Connectivity,
      Self::Blocked => ErrorClass::Blocked,
      Self::AuthExpired => ErrorClass::AuthExpired,
      Self::NotFound(_) => ErrorClass::NotFound,
      Self::Timeout => ErrorClass::Timeout,
      Self::Rejected { .. } => ErrorClass::Rejected,
      Self::Decode(_) => ErrorClass::Decode,
    }
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      return Self::Timeout;
    }
    if let Some(status) = err.status() {
      let url = err.url().map(|u| u.to_string()).unwrap_or_default();
      return Self::from_status(status.as_u16(), &url, "");
    }
    if err.is_decode() {
      return Self::Decode(err.to_string());
    }
    Self::Connectivity(err.to_string())
  }
}

/// Errors that end a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error("Failed to fetch {window}: {source}")]
  Fetch {
    window: String,
    #[source]
    source: FetchError,
  },

  #[error("A sync is running for {0}. Wait for it to finish or cancel it first.")]
  Busy(String),

  #[error("No completed sync found for {0}. Run a full sync before requesting an update.")]
  NoBaseline(String),
}

impl SyncError {
  pub fn class(&self) -> ErrorClass {
    match self {
      Self::Fetch { source, .. } => source.class(),
      _ => ErrorClass::Storage,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert_eq!(FetchError::from_status(401, "u", ""), FetchError::AuthExpired);
    assert_eq!(FetchError::from_status(403, "u", ""), FetchError::Blocked);
    assert_eq!(FetchError::from_status(503, "u", "").class(), ErrorClass::Server);
    assert_eq!(
      FetchError::from_status(404, "http://x/api", "").class(),
      ErrorClass::NotFound
    );
    assert_eq!(FetchError::from_status(422, "u", "bad").class(), ErrorClass::Rejected);
  }

  #[test]
  fn test_sync_error_class_follows_fetch_error() {
    let err = SyncError::Fetch {
      window: "01 Jan 2024".to_string(),
      source: FetchError::Timeout,
    };
    assert_eq!(err.class(), ErrorClass::Timeout);
    assert!(err.to_string().contains("01 Jan 2024"));
  }

  #[test]
  fn test_quota_from_io() {
    let err = std::io::Error::from_raw_os_error(28);
    let mapped = StorageError::from_io(err, "k", std::path::Path::new("/tmp/x"));
    assert!(matches!(mapped, StorageError::QuotaExceeded { .. }));
  }

  #[test]
  fn test_permission_denied_from_io() {
    let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
    let mapped = StorageError::from_io(err, "", std::path::Path::new("/tmp/entries"));
    assert!(matches!(mapped, StorageError::PermissionDenied { path } if path == "/tmp/entries"));
  }
}
