//! Identity and date types shared by the cache and the sync engine.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact date format used on the wire and in cache keys.
pub const YMD_FORMAT: &str = "%Y%m%d";

/// Format a date as `YYYYMMDD`.
pub fn ymd(date: NaiveDate) -> String {
  date.format(YMD_FORMAT).to_string()
}

/// Parse a `YYYYMMDD` date.
pub fn parse_ymd(s: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(s.trim(), YMD_FORMAT).ok()
}

/// A company ("tenant") on a remote location.
///
/// Every per-tenant store is keyed on this identity. Single-flight and
/// checkpoints only look at `(location_id, guid)`; the company name feeds the
/// cache key names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyIdentity {
  pub location_id: String,
  pub guid: String,
  pub company_name: String,
}

impl CompanyIdentity {
  pub fn new(
    location_id: impl Into<String>,
    guid: impl Into<String>,
    company_name: impl Into<String>,
  ) -> Self {
    Self {
      location_id: location_id.into(),
      guid: guid.into(),
      company_name: company_name.into(),
    }
  }

  pub fn tenant_key(&self) -> TenantKey {
    TenantKey {
      location_id: self.location_id.clone(),
      guid: self.guid.clone(),
    }
  }
}

impl fmt::Display for CompanyIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({}/{})", self.company_name, self.location_id, self.guid)
  }
}

/// The `(location_id, guid)` pair that single-flight is enforced on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey {
  pub location_id: String,
  pub guid: String,
}

impl fmt::Display for TenantKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}", self.location_id, self.guid)
  }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
  pub from: NaiveDate,
  pub to: NaiveDate,
}

impl DateRange {
  pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
    Self { from, to }
  }

  pub fn contains(&self, date: NaiveDate) -> bool {
    self.from <= date && date <= self.to
  }

  /// Number of days covered, zero when `to` precedes `from`.
  pub fn days(&self) -> i64 {
    if self.to < self.from {
      0
    } else {
      (self.to - self.from).num_days() + 1
    }
  }

  /// Day after the end of the range.
  pub fn next_day(&self) -> NaiveDate {
    self.to + Duration::days(1)
  }
}

impl fmt::Display for DateRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.from == self.to {
      write!(f, "{}", self.from.format("%d %b %Y"))
    } else {
      write!(
        f,
        "{} - {}",
        self.from.format("%d %b %Y"),
        self.to.format("%d %b %Y")
      )
    }
  }
}
