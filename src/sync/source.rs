use async_trait::async_trait;

use crate::error::FetchError;
use crate::tally::api_types::VoucherQuery;
use crate::tally::types::{LedgerList, StockItemList, VoucherBatch};
use crate::types::CompanyIdentity;

/// Remote source of a tenant's accounting datasets.
#[async_trait]
pub trait DataSource: Send + Sync {
  /// Vouchers of one date window.
  async fn fetch_vouchers(&self, query: &VoucherQuery) -> Result<VoucherBatch, FetchError>;

  /// Full customer ledger list with addresses.
  async fn fetch_ledgers(&self, company: &CompanyIdentity) -> Result<LedgerList, FetchError>;

  async fn fetch_stock_items(&self, company: &CompanyIdentity) -> Result<StockItemList, FetchError>;
}
