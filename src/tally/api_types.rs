//! Request bodies sent to the accounting data service.

use serde::Serialize;

use crate::types::{ymd, CompanyIdentity, DateRange};

/// Body of a voucher request for one date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherQuery {
  pub location_id: String,
  pub company_name: String,
  pub company_guid: String,
  /// `YYYYMMDD`
  pub from_date: String,
  /// `YYYYMMDD`
  pub to_date: String,
  pub slice_mode: String,
  pub voucher_type_filter: String,
  /// Restrict to vouchers altered after this id (incremental pass)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub alter_id_after: Option<u64>,
}

impl VoucherQuery {
  pub fn new(
    company: &CompanyIdentity,
    range: &DateRange,
    slice_mode: &str,
    voucher_type_filter: &str,
  ) -> Self {
    Self {
      location_id: company.location_id.clone(),
      company_name: company.company_name.clone(),
      company_guid: company.guid.clone(),
      from_date: ymd(range.from),
      to_date: ymd(range.to),
      slice_mode: slice_mode.to_string(),
      voucher_type_filter: voucher_type_filter.to_string(),
      alter_id_after: None,
    }
  }

  pub fn altered_after(mut self, alter_id: u64) -> Self {
    self.alter_id_after = Some(alter_id);
    self
  }
}

/// Body of the ledger and stock item requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyQuery {
  pub location_id: String,
  pub company_name: String,
  pub company_guid: String,
}

impl From<&CompanyIdentity> for CompanyQuery {
  fn from(company: &CompanyIdentity) -> Self {
    Self {
      location_id: company.location_id.clone(),
      company_name: company.company_name.clone(),
      company_guid: company.guid.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;
  use serde_json::json;

  #[test]
  fn test_voucher_query_wire_shape() {
    let company = CompanyIdentity::new("loc1", "guid-1", "Acme");
    let range = DateRange::new(
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
    );
    let query = VoucherQuery::new(&company, &range, "daily", "Sales");

    assert_eq!(
      serde_json::to_value(&query).unwrap(),
      json!({
        "locationId": "loc1",
        "companyName": "Acme",
        "companyGuid": "guid-1",
        "fromDate": "20240101",
        "toDate": "20240102",
        "sliceMode": "daily",
        "voucherTypeFilter": "Sales"
      })
    );

    let incremental = serde_json::to_value(query.altered_after(99)).unwrap();
    assert_eq!(incremental["alterIdAfter"], 99);
  }
}
