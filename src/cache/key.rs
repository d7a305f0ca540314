//! Cache key naming.
//!
//! Key names are stable: older releases and other clients read the same
//! names.

use super::traits::CacheType;
use crate::types::{ymd, CompanyIdentity, DateRange};

pub const SALES_PREFIX: &str = "sales";
pub const LEDGERS_PREFIX: &str = "ledgerlist-w-addrs";
pub const STOCK_ITEMS_PREFIX: &str = "stockitems";
pub const DASHBOARD_PREFIX: &str = "dashboard";
pub const SESSION_PREFIX: &str = "session";

/// Builders for the composite cache keys.
pub struct CacheKey;

impl CacheKey {
  /// `ledgerlist-w-addrs_{locationId}_{companyName}`
  pub fn ledgers(company: &CompanyIdentity) -> String {
    tenant_key(LEDGERS_PREFIX, company)
  }

  /// `stockitems_{locationId}_{companyName}`
  pub fn stock_items(company: &CompanyIdentity) -> String {
    tenant_key(STOCK_ITEMS_PREFIX, company)
  }

  /// `sales_{locationId}_{companyName}_{from}_{to}`
  pub fn sales(company: &CompanyIdentity, window: &DateRange) -> String {
    format!(
      "{}{}_{}",
      Self::sales_prefix(company),
      ymd(window.from),
      ymd(window.to)
    )
  }

  /// Common prefix of every sales window key of a company.
  pub fn sales_prefix(company: &CompanyIdentity) -> String {
    format!("{}_", tenant_key(SALES_PREFIX, company))
  }

  /// `dashboard_{locationId}_{companyName}[_{name}]`
  pub fn dashboard(company: &CompanyIdentity, name: Option<&str>) -> String {
    match name {
      Some(name) => format!("{}_{}", tenant_key(DASHBOARD_PREFIX, company), name),
      None => tenant_key(DASHBOARD_PREFIX, company),
    }
  }

  /// `session_{name}`
  pub fn session(name: &str) -> String {
    format!("{}_{}", SESSION_PREFIX, name)
  }

  /// Whether `key` holds data of `company`.
  pub fn belongs_to(key: &str, company: &CompanyIdentity) -> bool {
    if let Some(rest) = key.strip_prefix(&Self::sales_prefix(company)) {
      return is_window_suffix(rest);
    }

    [LEDGERS_PREFIX, STOCK_ITEMS_PREFIX, DASHBOARD_PREFIX]
      .iter()
      .any(|prefix| {
        let base = tenant_key(prefix, company);
        key == base || key.starts_with(&format!("{}_", base))
      })
  }
}

fn tenant_key(prefix: &str, company: &CompanyIdentity) -> String {
  format!("{}_{}_{}", prefix, company.location_id, company.company_name)
}

/// `YYYYMMDD_YYYYMMDD`
fn is_window_suffix(rest: &str) -> bool {
  match rest.split_once('_') {
    Some((from, to)) => is_ymd(from) && is_ymd(to),
    None => false,
  }
}

fn is_ymd(s: &str) -> bool {
  s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Infer the dataset type from the key prefix.
///
/// Keys with an unknown prefix are treated as dashboard data.
pub fn infer_type(key: &str) -> CacheType {
  let prefix = key.split('_').next().unwrap_or_default();
  match prefix {
    SALES_PREFIX => CacheType::Sales,
    LEDGERS_PREFIX => CacheType::Customers,
    STOCK_ITEMS_PREFIX => CacheType::Items,
    SESSION_PREFIX => CacheType::Session,
    _ => CacheType::Dashboard,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn company() -> CompanyIdentity {
    CompanyIdentity::new("loc7", "guid-1", "Acme Traders")
  }

  #[test]
  fn test_stable_key_names() {
    let c = company();
    assert_eq!(CacheKey::ledgers(&c), "ledgerlist-w-addrs_loc7_Acme Traders");
    assert_eq!(CacheKey::stock_items(&c), "stockitems_loc7_Acme Traders");

    let window = DateRange::new(
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
    );
    assert_eq!(
      CacheKey::sales(&c, &window),
      "sales_loc7_Acme Traders_20240101_20240102"
    );
  }

  #[test]
  fn test_infer_type() {
    let c = company();
    assert_eq!(infer_type(&CacheKey::ledgers(&c)), CacheType::Customers);
    assert_eq!(infer_type(&CacheKey::stock_items(&c)), CacheType::Items);
    assert_eq!(infer_type("sales_loc7_x_20240101_20240102"), CacheType::Sales);
    assert_eq!(infer_type(&CacheKey::session("user")), CacheType::Session);
    assert_eq!(infer_type("kpi-cards"), CacheType::Dashboard);
  }

  #[test]
  fn test_belongs_to() {
    let c = company();
    let other = CompanyIdentity::new("loc7", "guid-2", "Acme");

    assert!(CacheKey::belongs_to(&CacheKey::ledgers(&c), &c));
    assert!(CacheKey::belongs_to(&CacheKey::dashboard(&c, Some("kpis")), &c));
    assert!(CacheKey::belongs_to(
      "sales_loc7_Acme Traders_20240101_20240102",
      &c
    ));
    assert!(!CacheKey::belongs_to(&CacheKey::ledgers(&c), &other));
    // "Acme" must not claim the sales windows of "Acme Traders"
    assert!(!CacheKey::belongs_to(
      "sales_loc7_Acme Traders_20240101_20240102",
      &other
    ));
    assert!(!CacheKey::belongs_to(&CacheKey::session("loc7"), &c));
  }
}
