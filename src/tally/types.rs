use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::parse_ymd;

/// A sales voucher.
///
/// Only the fields the engine needs are typed; everything else is kept as
/// raw JSON and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
  #[serde(deserialize_with = "deserialize_id_string")]
  pub master_id: String,
  /// Change sequence number; grows every time the voucher is altered
  #[serde(deserialize_with = "deserialize_lenient_u64")]
  pub alter_id: u64,
  /// Voucher date, `YYYYMMDD`
  pub date: String,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl Voucher {
  pub fn voucher_date(&self) -> Option<NaiveDate> {
    parse_ymd(&self.date)
  }
}

/// Response of the voucher endpoint and payload of a sales window entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoucherBatch {
  #[serde(default)]
  pub vouchers: Vec<Voucher>,
}

impl VoucherBatch {
  pub fn max_alter_id(&self) -> Option<u64> {
    self.vouchers.iter().map(|v| v.alter_id).max()
  }

  /// Merge changed vouchers: replace by master id, append unknown ones.
  /// Returns the number of vouchers that were new.
  pub fn upsert(&mut self, changes: Vec<Voucher>) -> usize {
    let mut added = 0;
    for change in changes {
      match self
        .vouchers
        .iter_mut()
        .find(|v| v.master_id == change.master_id)
      {
        Some(existing) => *existing = change,
        None => {
          self.vouchers.push(change);
          added += 1;
        }
      }
    }
    added
  }
}

/// A customer ledger with its address block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
  pub name: String,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerList {
  #[serde(default)]
  pub ledgers: Vec<Ledger>,
}

/// A stock item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
  pub name: String,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItemList {
  #[serde(default)]
  pub stock_items: Vec<StockItem>,
}

/// Ids arrive as strings from some servers and as numbers from others.
fn deserialize_id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!(
      "expected string or number id, got {}",
      other
    ))),
  }
}

fn deserialize_lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Number(n) => n
      .as_u64()
      .ok_or_else(|| serde::de::Error::custom(format!("invalid alter id {}", n))),
    Value::String(s) => s
      .trim()
      .parse()
      .map_err(|_| serde::de::Error::custom(format!("invalid alter id '{}'", s))),
    other => Err(serde::de::Error::custom(format!(
      "expected numeric alter id, got {}",
      other
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn voucher(master_id: &str, alter_id: u64, amount: i64) -> Voucher {
    serde_json::from_value(json!({
      "masterId": master_id,
      "alterId": alter_id,
      "date": "20240101",
      "amount": amount,
    }))
    .unwrap()
  }

  #[test]
  fn test_voucher_accepts_string_ids_and_keeps_extra_fields() {
    let v: Voucher = serde_json::from_value(json!({
      "masterId": 42,
      "alterId": "1007",
      "date": "20240105",
      "voucherNumber": "S/12",
      "partyName": "Globex"
    }))
    .unwrap();

    assert_eq!(v.master_id, "42");
    assert_eq!(v.alter_id, 1007);
    assert_eq!(v.voucher_date(), NaiveDate::from_ymd_opt(2024, 1, 5));
    assert_eq!(v.fields["partyName"], "Globex");

    let back = serde_json::to_value(&v).unwrap();
    assert_eq!(back["voucherNumber"], "S/12");
    assert_eq!(back["masterId"], "42");
  }

  #[test]
  fn test_bad_alter_id_is_rejected() {
    let result: Result<Voucher, _> = serde_json::from_value(json!({
      "masterId": "1", "alterId": "abc", "date": "20240101"
    }));
    assert!(result.is_err());
  }

  #[test]
  fn test_upsert_replaces_and_appends() {
    let mut batch = VoucherBatch {
      vouchers: vec![voucher("1", 10, 100), voucher("2", 11, 200)],
    };
    let added = batch.upsert(vec![voucher("2", 15, 250), voucher("3", 16, 300)]);

    assert_eq!(added, 1);
    assert_eq!(batch.vouchers.len(), 3);
    assert_eq!(batch.vouchers[1].alter_id, 15);
    assert_eq!(batch.max_alter_id(), Some(16));
  }

  #[test]
  fn test_empty_batch_has_no_watermark() {
    let batch: VoucherBatch = serde_json::from_str("{}").unwrap();
    assert!(batch.vouchers.is_empty());
    assert_eq!(batch.max_alter_id(), None);
  }

  #[test]
  fn test_stock_item_list_field_name() {
    let list: StockItemList =
      serde_json::from_value(json!({"stockItems": [{"name": "Widget", "unit": "nos"}]})).unwrap();
    assert_eq!(list.stock_items[0].name, "Widget");
  }
}
