//! Process-local registry of running syncs, one per tenant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use super::types::SyncProgress;
use crate::types::{CompanyIdentity, TenantKey};

struct ActiveSync {
  company: CompanyIdentity,
  progress: Arc<watch::Sender<SyncProgress>>,
  cancel: Arc<AtomicBool>,
}

/// Tracks which tenants have a sync running in this process.
#[derive(Default)]
pub struct ActiveSyncRegistry {
  active: Mutex<HashMap<TenantKey, ActiveSync>>,
}

/// Outcome of [`ActiveSyncRegistry::try_register`].
pub enum Registration {
  /// The caller owns the new sync and must run it.
  Started(SyncTicket),
  /// A sync was already running for the tenant.
  Existing(SyncHandle),
}

impl ActiveSyncRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn active(&self) -> MutexGuard<'_, HashMap<TenantKey, ActiveSync>> {
    self.active.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a sync for `company` unless one is already running.
  ///
  /// The check and the insert happen under one lock, so concurrent callers
  /// for the same tenant get exactly one `Started`.
  pub fn try_register(self: &Arc<Self>, company: &CompanyIdentity, initial: SyncProgress) -> Registration {
    let key = company.tenant_key();
    let mut active = self.active();

    if let Some(existing) = active.get(&key) {
      return Registration::Existing(SyncHandle {
        company: existing.company.clone(),
        progress: existing.progress.subscribe(),
      });
    }

    let (tx, _rx) = watch::channel(initial);
    let progress = Arc::new(tx);
    let cancel = Arc::new(AtomicBool::new(false));
    active.insert(
      key.clone(),
      ActiveSync {
        company: company.clone(),
        progress: Arc::clone(&progress),
        cancel: Arc::clone(&cancel),
      },
    );

    Registration::Started(SyncTicket {
      registry: Arc::clone(self),
      key,
      company: company.clone(),
      progress,
      cancel,
    })
  }

  pub fn is_active(&self, key: &TenantKey) -> bool {
    self.active().contains_key(key)
  }

  pub fn any_active(&self) -> bool {
    !self.active().is_empty()
  }

  /// Latest progress of the tenant's running sync.
  pub fn snapshot(&self, key: &TenantKey) -> Option<SyncProgress> {
    self
      .active()
      .get(key)
      .map(|sync| sync.progress.borrow().clone())
  }

  /// Handle on the tenant's running sync.
  pub fn handle(&self, key: &TenantKey) -> Option<SyncHandle> {
    self.active().get(key).map(|sync| SyncHandle {
      company: sync.company.clone(),
      progress: sync.progress.subscribe(),
    })
  }

  /// Ask the tenant's running sync to stop after its current window.
  /// Returns false when nothing is running.
  pub fn cancel(&self, key: &TenantKey) -> bool {
    match self.active().get(key) {
      Some(sync) => {
        sync.cancel.store(true, Ordering::SeqCst);
        true
      }
      None => false,
    }
  }
}

/// Ownership of a registered sync. Dropping it releases the registration.
pub struct SyncTicket {
  registry: Arc<ActiveSyncRegistry>,
  key: TenantKey,
  company: CompanyIdentity,
  progress: Arc<watch::Sender<SyncProgress>>,
  cancel: Arc<AtomicBool>,
}

impl SyncTicket {
  pub fn company(&self) -> &CompanyIdentity {
    &self.company
  }

  pub fn publish(&self, progress: SyncProgress) {
    self.progress.send_replace(progress);
  }

  pub fn current(&self) -> SyncProgress {
    self.progress.borrow().clone()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.load(Ordering::SeqCst)
  }

  pub fn handle(&self) -> SyncHandle {
    SyncHandle {
      company: self.company.clone(),
      progress: self.progress.subscribe(),
    }
  }

  /// Deregister the tenant, then hand `last` to the waiters.
  ///
  /// A waiter that sees the terminal progress can start a new sync right
  /// away without joining this one.
  pub fn release(self, last: SyncProgress) {
    self.deregister();
    self.progress.send_replace(last);
  }

  fn deregister(&self) {
    let mut active = self.registry.active();
    let ours = active
      .get(&self.key)
      .is_some_and(|sync| Arc::ptr_eq(&sync.cancel, &self.cancel));
    if ours {
      active.remove(&self.key);
    }
  }
}

impl Drop for SyncTicket {
  fn drop(&mut self) {
    self.deregister();
  }
}

/// Observer of one running sync.
#[derive(Clone, Debug)]
pub struct SyncHandle {
  company: CompanyIdentity,
  progress: watch::Receiver<SyncProgress>,
}

impl SyncHandle {
  pub fn company(&self) -> &CompanyIdentity {
    &self.company
  }

  pub fn current(&self) -> SyncProgress {
    self.progress.borrow().clone()
  }

  /// Receiver of every progress update of this sync.
  pub fn receiver(&self) -> watch::Receiver<SyncProgress> {
    self.progress.clone()
  }

  /// Wait for the sync to finish and return its final progress.
  pub async fn wait(mut self) -> SyncProgress {
    loop {
      {
        let progress = self.progress.borrow_and_update();
        if progress.status.is_terminal() {
          return progress.clone();
        }
      }
      if self.progress.changed().await.is_err() {
        // Sender gone; the last value is final
        return self.progress.borrow().clone();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::types::SyncStatus;

  fn company() -> CompanyIdentity {
    CompanyIdentity::new("loc1", "guid-1", "Acme")
  }

  #[test]
  fn test_second_registration_joins_first() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let first = registry.try_register(&company(), SyncProgress::starting(&company()));
    let second = registry.try_register(&company(), SyncProgress::starting(&company()));

    assert!(matches!(first, Registration::Started(_)));
    assert!(matches!(second, Registration::Existing(_)));
    assert!(registry.is_active(&company().tenant_key()));
  }

  #[test]
  fn test_same_guid_other_location_is_independent() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let other = CompanyIdentity::new("loc2", "guid-1", "Acme");
    let _a = registry.try_register(&company(), SyncProgress::starting(&company()));
    let b = registry.try_register(&other, SyncProgress::starting(&other));
    assert!(matches!(b, Registration::Started(_)));
  }

  #[test]
  fn test_dropping_ticket_releases_tenant() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let ticket = registry.try_register(&company(), SyncProgress::starting(&company()));
    assert!(registry.any_active());

    drop(ticket);
    assert!(!registry.any_active());
    assert!(registry.snapshot(&company().tenant_key()).is_none());
  }

  #[test]
  fn test_cancel_sets_flag() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let Registration::Started(ticket) =
      registry.try_register(&company(), SyncProgress::starting(&company()))
    else {
      panic!("expected a new registration");
    };

    assert!(!ticket.is_cancelled());
    assert!(registry.cancel(&company().tenant_key()));
    assert!(ticket.is_cancelled());

    drop(ticket);
    assert!(!registry.cancel(&company().tenant_key()));
  }

  #[tokio::test]
  async fn test_handle_waits_for_terminal_progress() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let Registration::Started(ticket) =
      registry.try_register(&company(), SyncProgress::starting(&company()))
    else {
      panic!("expected a new registration");
    };
    let handle = ticket.handle();

    let waiter = tokio::spawn(handle.wait());
    ticket.publish(ticket.current().running("working"));
    ticket.publish(ticket.current().completed("done"));

    let last = waiter.await.unwrap();
    assert_eq!(last.status, SyncStatus::Completed);
    assert_eq!(last.message, "done");
  }

  #[tokio::test]
  async fn test_release_deregisters_before_waiters_wake() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let Registration::Started(ticket) =
      registry.try_register(&company(), SyncProgress::starting(&company()))
    else {
      panic!("expected a new registration");
    };
    let handle = ticket.handle();
    let observer = Arc::clone(&registry);

    let waiter = tokio::spawn(async move {
      let last = handle.wait().await;
      (last, observer.is_active(&company().tenant_key()))
    });
    let last = ticket.current().completed("done");
    ticket.release(last);

    let (last, still_active) = waiter.await.unwrap();
    assert_eq!(last.status, SyncStatus::Completed);
    assert!(!still_active);
    assert!(matches!(
      registry.try_register(&company(), SyncProgress::starting(&company())),
      Registration::Started(_)
    ));
  }

  #[tokio::test]
  async fn test_wait_returns_when_ticket_dropped() {
    let registry = Arc::new(ActiveSyncRegistry::new());
    let Registration::Started(ticket) =
      registry.try_register(&company(), SyncProgress::starting(&company()))
    else {
      panic!("expected a new registration");
    };
    let handle = registry.handle(&company().tenant_key()).unwrap();
    drop(ticket);

    let last = handle.wait().await;
    assert_eq!(last.status, SyncStatus::Running);
  }
}
