//! Drives chunked downloads and incremental updates for each tenant.

use chrono::{Duration, Local, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::progress::ProgressStore;
use super::registry::{ActiveSyncRegistry, Registration, SyncHandle, SyncTicket};
use super::source::DataSource;
use super::types::{SyncProgress, SyncState};
use super::window::{window_containing, window_count, windows};
use crate::cache::{CacheKey, HybridCache};
use crate::config::SyncConfig;
use crate::error::{StorageError, SyncError};
use crate::notify::{Hub, Subscription};
use crate::tally::{Voucher, VoucherBatch, VoucherQuery};
use crate::types::{CompanyIdentity, DateRange, TenantKey};

/// What to download and how.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// First date of the dataset
  pub origin_date: NaiveDate,
  /// Last date to download; today when unset
  pub to_date: Option<NaiveDate>,
  pub slice_mode: String,
  pub voucher_type_filter: String,
}

impl SyncSettings {
  pub fn end_date(&self) -> NaiveDate {
    self.to_date.unwrap_or_else(|| Local::now().date_naive())
  }

  fn full_range(&self) -> DateRange {
    DateRange::new(self.origin_date, self.end_date())
  }
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      origin_date: config.origin_date,
      to_date: None,
      slice_mode: config.slice_mode.clone(),
      voucher_type_filter: config.voucher_type_filter.clone(),
    }
  }
}

struct Inner {
  source: Arc<dyn DataSource>,
  cache: HybridCache,
  progress: ProgressStore,
  registry: Arc<ActiveSyncRegistry>,
  events: Hub<SyncProgress>,
  /// Terminal snapshot of the last run per tenant in this process
  finished: Mutex<HashMap<TenantKey, SyncProgress>>,
  settings: SyncSettings,
}

/// Single-flight sync engine over a data source, the cache and the
/// progress store.
#[derive(Clone)]
pub struct SyncOrchestrator {
  inner: Arc<Inner>,
}

impl SyncOrchestrator {
  pub fn new(
    source: Arc<dyn DataSource>,
    cache: HybridCache,
    progress: ProgressStore,
    settings: SyncSettings,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        source,
        cache,
        progress,
        registry: Arc::new(ActiveSyncRegistry::new()),
        events: Hub::new(),
        finished: Mutex::new(HashMap::new()),
        settings,
      }),
    }
  }

  /// Start a full sync for `company`, or resume its interrupted one.
  ///
  /// When a sync is already running for the tenant, a handle on that sync is
  /// returned and nothing new is started. With `start_fresh` any checkpoint
  /// is discarded and the windows are regenerated from the origin date.
  ///
  /// Must be called from within a tokio runtime.
  pub fn start_or_resume(&self, company: &CompanyIdentity, start_fresh: bool) -> SyncHandle {
    match self
      .inner
      .registry
      .try_register(company, SyncProgress::starting(company))
    {
      Registration::Existing(handle) => {
        info!(company = %company, "sync already running, joining it");
        handle
      }
      Registration::Started(ticket) => {
        let handle = ticket.handle();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
          let result = inner.run_download(&ticket, start_fresh).await;
          inner.finish(ticket, result);
        });
        handle
      }
    }
  }

  /// Start an incremental pass fetching only vouchers altered since the last
  /// completed sync. Joins a running sync of the tenant instead, if any.
  pub fn start_update(&self, company: &CompanyIdentity) -> Result<SyncHandle, SyncError> {
    if let Some(handle) = self.inner.registry.handle(&company.tenant_key()) {
      info!(company = %company, "sync already running, joining it");
      return Ok(handle);
    }

    let state = self
      .inner
      .progress
      .read_sync_state(company)?
      .ok_or_else(|| SyncError::NoBaseline(company.to_string()))?;

    match self
      .inner
      .registry
      .try_register(company, SyncProgress::starting(company))
    {
      Registration::Existing(handle) => Ok(handle),
      Registration::Started(ticket) => {
        let handle = ticket.handle();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
          let result = inner.run_update(&ticket, state).await;
          inner.finish(ticket, result);
        });
        Ok(handle)
      }
    }
  }

  /// Progress of the tenant: live while running, then the outcome of the
  /// last run in this process, then any interrupted checkpoint.
  pub fn get_progress(&self, company: &CompanyIdentity) -> Result<SyncProgress, StorageError> {
    let key = company.tenant_key();
    if let Some(live) = self.inner.registry.snapshot(&key) {
      return Ok(live);
    }
    if let Some(last) = self.inner.finished().get(&key) {
      return Ok(last.clone());
    }

    match self.inner.progress.read_checkpoint(company)? {
      Some(checkpoint) if checkpoint.is_incomplete() => {
        Ok(SyncProgress::from_checkpoint(company, &checkpoint))
      }
      _ => Ok(SyncProgress::idle(company)),
    }
  }

  /// Register a callback for progress updates of every tenant.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(SyncProgress) + Send + 'static,
  {
    self.inner.events.subscribe(callback)
  }

  pub fn is_sync_in_progress(&self) -> bool {
    self.inner.registry.any_active()
  }

  /// Whether a sync is running for this company.
  pub fn is_same_company(&self, company: &CompanyIdentity) -> bool {
    self.inner.registry.is_active(&company.tenant_key())
  }

  /// Stop the tenant's sync after its current window. The checkpoint is left
  /// as last written. Returns false when nothing is running.
  pub fn cancel(&self, company: &CompanyIdentity) -> bool {
    let cancelled = self.inner.registry.cancel(&company.tenant_key());
    if cancelled {
      info!(company = %company, "sync cancellation requested");
    }
    cancelled
  }

  /// The tenant's interrupted attempt, unless it is running again or the
  /// user dismissed it.
  pub fn detect_interrupted(
    &self,
    company: &CompanyIdentity,
  ) -> Result<Option<SyncProgress>, StorageError> {
    let running = self.inner.registry.is_active(&company.tenant_key());
    Ok(
      self
        .inner
        .progress
        .detect_interrupted(company, running)?
        .map(|checkpoint| SyncProgress::from_checkpoint(company, &checkpoint)),
    )
  }

  /// Stop reporting the tenant's current interruption. Returns false when
  /// there is none.
  pub fn dismiss_interruption(&self, company: &CompanyIdentity) -> Result<bool, StorageError> {
    match self.inner.progress.read_checkpoint(company)? {
      Some(checkpoint) if checkpoint.is_incomplete() => {
        self
          .inner
          .progress
          .dismiss(company, checkpoint.current, checkpoint.total)?;
        info!(
          company = %company,
          current = checkpoint.current,
          total = checkpoint.total,
          "interruption dismissed"
        );
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Remove every cached dataset, checkpoint and watermark of the tenant.
  /// Returns the number of cache entries removed.
  pub async fn clear_company(&self, company: &CompanyIdentity) -> Result<usize, SyncError> {
    let key = company.tenant_key();
    if self.inner.registry.is_active(&key) {
      return Err(SyncError::Busy(company.to_string()));
    }

    let removed = self.inner.cache.clear_by_company(company).await?;
    self.inner.progress.clear_tenant(company)?;
    self.inner.finished().remove(&key);
    Ok(removed)
  }
}

impl Inner {
  fn finished(&self) -> MutexGuard<'_, HashMap<TenantKey, SyncProgress>> {
    self.finished.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn publish(&self, ticket: &SyncTicket, progress: SyncProgress) {
    ticket.publish(progress.clone());
    self.events.publish(progress);
  }

  /// Release the tenant, then publish the terminal progress.
  fn finish(&self, ticket: SyncTicket, result: Result<SyncProgress, SyncError>) {
    let company = ticket.company().clone();
    let last = match result {
      Ok(progress) => progress,
      Err(e) => {
        error!(company = %company, class = ?e.class(), error = %e, "sync failed");
        ticket.current().failed(&e)
      }
    };

    self
      .finished()
      .insert(company.tenant_key(), last.clone());
    ticket.release(last.clone());
    self.events.publish(last);
  }

  async fn run_download(
    &self,
    ticket: &SyncTicket,
    start_fresh: bool,
  ) -> Result<SyncProgress, SyncError> {
    let company = ticket.company();

    let checkpoint = if start_fresh {
      self.progress.clear_checkpoint(company)?;
      None
    } else {
      self
        .progress
        .read_checkpoint(company)?
        .filter(|cp| cp.total > 0 && cp.current <= cp.total)
    };

    let (range, start_at, mut watermark) = match checkpoint {
      Some(cp) => {
        info!(
          company = %company,
          current = cp.current,
          total = cp.total,
          "resuming interrupted sync"
        );
        (cp.range(), cp.current, cp.last_alter_id)
      }
      None => (self.settings.full_range(), 0, None),
    };
    let total = window_count(range);

    self
      .progress
      .write_checkpoint(company, start_at, total, watermark, range)?;

    info!(company = %company, range = %range, windows = total, "sync started");
    let mut progress = ticket.current();
    progress.current_chunk = start_at;
    progress.total_chunks = total;
    progress = progress.running(format!(
      "Downloading {} windows",
      total.saturating_sub(start_at)
    ));
    self.publish(ticket, progress.clone());

    for window in windows(range).skip(start_at as usize) {
      if ticket.is_cancelled() {
        info!(company = %company, at = window.index, "sync cancelled");
        return Ok(progress.interrupted(format!(
          "Cancelled after {} of {} windows",
          window.index, total
        )));
      }

      let label = window.label();
      progress.window_label = Some(label.clone());
      progress = progress.running(format!(
        "Fetching {} ({} of {})",
        label,
        window.index + 1,
        total
      ));
      self.publish(ticket, progress.clone());

      let query = VoucherQuery::new(
        company,
        &window.range,
        &self.settings.slice_mode,
        &self.settings.voucher_type_filter,
      );
      let batch = self
        .source
        .fetch_vouchers(&query)
        .await
        .map_err(|source| SyncError::Fetch {
          window: label.clone(),
          source,
        })?;

      self
        .cache
        .set_json(&CacheKey::sales(company, &window.range), &batch, Some(window.range))
        .await?;

      watermark = watermark.max(batch.max_alter_id());
      progress.records_fetched += batch.vouchers.len() as u64;
      progress.current_chunk = window.index + 1;
      self
        .progress
        .write_checkpoint(company, window.index + 1, total, watermark, range)?;

      debug!(
        company = %company,
        window = %label,
        vouchers = batch.vouchers.len(),
        "window stored"
      );
      self.publish(ticket, progress.clone());
    }

    if ticket.is_cancelled() {
      return Ok(progress.interrupted("Cancelled before fetching customers and stock items"));
    }

    progress.window_label = None;
    progress = progress.running("Fetching customers and stock items");
    self.publish(ticket, progress.clone());
    self.fetch_master_data(company).await?;

    self.progress.write_sync_state(
      company,
      &SyncState {
        last_alter_id: watermark,
        synced_to: range.to,
        completed_at: Utc::now(),
      },
    )?;
    self.progress.clear_checkpoint(company)?;

    info!(
      company = %company,
      records = progress.records_fetched,
      watermark = ?watermark,
      "sync completed"
    );
    let message = format!("Downloaded {} vouchers", progress.records_fetched);
    Ok(progress.completed(message))
  }

  async fn fetch_master_data(&self, company: &CompanyIdentity) -> Result<(), SyncError> {
    let (ledgers, items) = futures::future::try_join(
      self.source.fetch_ledgers(company),
      self.source.fetch_stock_items(company),
    )
    .await
    .map_err(|source| SyncError::Fetch {
      window: "customers and stock items".to_string(),
      source,
    })?;

    self
      .cache
      .set_json(&CacheKey::ledgers(company), &ledgers, None)
      .await?;
    self
      .cache
      .set_json(&CacheKey::stock_items(company), &items, None)
      .await?;

    debug!(
      company = %company,
      ledgers = ledgers.ledgers.len(),
      stock_items = items.stock_items.len(),
      "master data stored"
    );
    Ok(())
  }

  async fn run_update(&self, ticket: &SyncTicket, state: SyncState) -> Result<SyncProgress, SyncError> {
    let company = ticket.company();
    let range = self.settings.full_range();
    let since = state.last_alter_id.unwrap_or(0);

    info!(company = %company, since, "update started");
    let mut progress = ticket.current();
    progress.total_chunks = 1;
    progress.window_label = Some(range.to_string());
    progress = progress.running(format!("Fetching changes since alter id {}", since));
    self.publish(ticket, progress.clone());

    let query = VoucherQuery::new(
      company,
      &range,
      &self.settings.slice_mode,
      &self.settings.voucher_type_filter,
    )
    .altered_after(since);
    let batch = self
      .source
      .fetch_vouchers(&query)
      .await
      .map_err(|source| SyncError::Fetch {
        window: range.to_string(),
        source,
      })?;

    let watermark = state.last_alter_id.max(batch.max_alter_id());
    let changed = batch.vouchers.len();
    self.merge_changes(company, range, batch.vouchers).await?;

    self.progress.write_sync_state(
      company,
      &SyncState {
        last_alter_id: watermark,
        synced_to: range.to,
        completed_at: Utc::now(),
      },
    )?;

    info!(company = %company, changed, watermark = ?watermark, "update completed");
    progress.current_chunk = 1;
    progress.records_fetched = changed as u64;
    Ok(progress.completed(format!("Merged {} changed vouchers", changed)))
  }

  /// Upsert changed vouchers into the sales window entry covering their date.
  /// Dates no entry covers get new windows tiled on from the last covered day.
  async fn merge_changes(
    &self,
    company: &CompanyIdentity,
    range: DateRange,
    changes: Vec<Voucher>,
  ) -> Result<(), SyncError> {
    let existing: Vec<(String, DateRange)> = self
      .cache
      .entries_with_prefix(&CacheKey::sales_prefix(company))
      .into_iter()
      .filter(|meta| CacheKey::belongs_to(&meta.key, company))
      .filter_map(|meta| meta.date_range.map(|r| (meta.key, r)))
      .collect();

    let anchor = existing
      .iter()
      .map(|(_, r)| r.to)
      .max()
      .map(|to| to + Duration::days(1))
      .unwrap_or(range.from);

    let mut groups: BTreeMap<String, (DateRange, Vec<Voucher>)> = BTreeMap::new();
    for voucher in changes {
      let Some(date) = voucher.voucher_date() else {
        warn!(master_id = %voucher.master_id, date = %voucher.date, "skipping voucher with unreadable date");
        continue;
      };

      let (key, window) = match existing.iter().find(|(_, r)| r.contains(date)) {
        Some((key, r)) => (key.clone(), *r),
        None => {
          let r = window_containing(anchor, date, range.to);
          (CacheKey::sales(company, &r), r)
        }
      };
      groups
        .entry(key)
        .or_insert_with(|| (window, Vec::new()))
        .1
        .push(voucher);
    }

    for (key, (window, vouchers)) in groups {
      let mut batch = match self.cache.get_as_json::<VoucherBatch>(&key).await {
        Ok(Some(batch)) => batch,
        Ok(None) => VoucherBatch::default(),
        Err(e) if e.is_corrupted() => {
          warn!(key = %key, "rebuilding corrupted window from changes only");
          VoucherBatch::default()
        }
        Err(e) => return Err(e.into()),
      };

      let count = vouchers.len();
      let added = batch.upsert(vouchers);
      self.cache.set_json(&key, &batch, Some(window)).await?;
      debug!(key = %key, changed = count, added, "window merged");
    }
    Ok(())
  }
}
