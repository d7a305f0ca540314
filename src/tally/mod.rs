//! HTTP client for the accounting data service.

pub mod api_types;
pub mod client;
pub mod types;

pub use api_types::VoucherQuery;
pub use client::TallyClient;
pub use types::{Ledger, LedgerList, StockItem, StockItemList, Voucher, VoucherBatch};
