//! Resumable sync and local cache engine for accounting datasets.
//!
//! The engine downloads bounded date ranges of sales vouchers (plus customer
//! ledgers and stock items) for a company, stores them in a local hybrid
//! cache and keeps durable checkpoints so an interrupted download resumes at
//! the first incomplete window.

pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
pub mod sync;
pub mod tally;
pub mod types;

pub use engine::Engine;
pub use types::{CompanyIdentity, DateRange, TenantKey};
