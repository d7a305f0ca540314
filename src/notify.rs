//! Typed observer registry.
//!
//! Every hub owns one unbounded queue drained by a single task, so
//! publishing never waits on a callback and each value reaches subscribers
//! in registration order. A slow callback delays the ones after it, never
//! the publisher. A callback that panics is dropped from the hub; the
//! others keep receiving.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::warn;

type Callback<T> = Box<dyn Fn(T) + Send>;

enum Message<T> {
  Subscribe(u64, Callback<T>),
  Unsubscribe(u64),
  Value(T),
}

struct HubInner<T> {
  next_id: u64,
  /// Live subscriber ids in registration order
  live: Vec<u64>,
  /// Queue of the drain task, started by the first subscriber
  queue: Option<mpsc::UnboundedSender<Message<T>>>,
}

/// Fan-out of values of type `T` to any number of callbacks.
pub struct Hub<T> {
  inner: Arc<Mutex<HubInner<T>>>,
}

impl<T> Clone for Hub<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Clone + Send + 'static> Default for Hub<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + 'static> Hub<T> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(HubInner {
        next_id: 0,
        live: Vec::new(),
        queue: None,
      })),
    }
  }

  /// Register a callback. Must be called from within a tokio runtime.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(T) + Send + 'static,
  {
    let id = {
      let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
      let id = inner.next_id;
      inner.next_id += 1;

      let queue = match &inner.queue {
        Some(queue) if !queue.is_closed() => queue.clone(),
        _ => {
          let (tx, rx) = mpsc::unbounded_channel();
          tokio::spawn(drain(rx, Arc::downgrade(&self.inner)));
          inner.queue = Some(tx.clone());
          tx
        }
      };
      inner.live.push(id);
      let _ = queue.send(Message::Subscribe(id, Box::new(callback)));
      id
    };

    let weak = Arc::downgrade(&self.inner);
    Subscription {
      remove: Some(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
          inner.live.retain(|sub_id| *sub_id != id);
          if let Some(queue) = &inner.queue {
            let _ = queue.send(Message::Unsubscribe(id));
          }
        }
      })),
    }
  }

  /// Queue `value` for every live subscriber.
  pub fn publish(&self, value: T) {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    if inner.live.is_empty() {
      return;
    }
    if let Some(queue) = &inner.queue {
      let _ = queue.send(Message::Value(value));
    }
  }

  pub fn subscriber_count(&self) -> usize {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.live.len()
  }
}

/// Run callbacks for queued values until the hub is dropped.
async fn drain<T: Clone>(mut rx: mpsc::UnboundedReceiver<Message<T>>, hub: Weak<Mutex<HubInner<T>>>) {
  let mut callbacks: Vec<(u64, Callback<T>)> = Vec::new();

  while let Some(message) = rx.recv().await {
    match message {
      Message::Subscribe(id, callback) => callbacks.push((id, callback)),
      Message::Unsubscribe(id) => callbacks.retain(|(sub_id, _)| *sub_id != id),
      Message::Value(value) => {
        let mut panicked = Vec::new();
        for (id, callback) in &callbacks {
          let value = value.clone();
          if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
            panicked.push(*id);
          }
        }
        if panicked.is_empty() {
          continue;
        }

        warn!(count = panicked.len(), "dropping panicking subscribers");
        callbacks.retain(|(id, _)| !panicked.contains(id));
        if let Some(inner) = hub.upgrade() {
          let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
          inner.live.retain(|id| !panicked.contains(id));
        }
      }
    }
  }
}

/// Handle returned by [`Hub::subscribe`].
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
  remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    if let Some(remove) = self.remove.take() {
      remove();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.remove.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_publish_reaches_subscribers_in_registration_order() {
    let hub: Hub<u32> = Hub::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let tx_a = tx.clone();
    let _a = hub.subscribe(move |v| {
      let _ = tx_a.send(("a", v));
    });
    let tx_b = tx.clone();
    let _b = hub.subscribe(move |v| {
      let _ = tx_b.send(("b", v));
    });

    hub.publish(7);
    hub.publish(8);

    let mut seen = Vec::new();
    for _ in 0..4 {
      seen.push(rx.recv().await.unwrap());
    }
    assert_eq!(seen, vec![("a", 7), ("b", 7), ("a", 8), ("b", 8)]);
  }

  #[tokio::test]
  async fn test_values_arrive_in_publish_order() {
    let hub: Hub<u32> = Hub::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = hub.subscribe(move |v| {
      let _ = tx.send(v);
    });

    for i in 0..5 {
      hub.publish(i);
    }

    for i in 0..5 {
      assert_eq!(rx.recv().await, Some(i));
    }
  }

  #[tokio::test]
  async fn test_unsubscribe_stops_delivery() {
    let hub: Hub<u32> = Hub::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub.subscribe(move |v| {
      let _ = tx.send(v);
    });
    assert_eq!(hub.subscriber_count(), 1);

    sub.unsubscribe();
    assert_eq!(hub.subscriber_count(), 0);

    hub.publish(1);
    // The sender was dropped with the subscription, so the channel closes
    assert_eq!(rx.recv().await, None);
  }

  #[tokio::test]
  async fn test_panicking_subscriber_does_not_affect_others() {
    let hub: Hub<u32> = Hub::new();
    let _bad = hub.subscribe(|_| panic!("subscriber failure"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _good = hub.subscribe(move |v| {
      let _ = tx.send(v);
    });

    hub.publish(1);
    assert_eq!(rx.recv().await, Some(1));

    hub.publish(2);
    assert_eq!(rx.recv().await, Some(2));
    assert_eq!(hub.subscriber_count(), 1);
  }
}
