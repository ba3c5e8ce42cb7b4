use super::subscription::Filter;
use super::Subscriber;
use crate::fiber::Fiber;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

struct KeyedShared<K, T> {
  pending: Mutex<Option<HashMap<K, T>>>,
  callback: Box<dyn Fn(HashMap<K, T>) + Send + Sync + 'static>,
}

impl<K, T> KeyedShared<K, T> {
  fn flush(&self) {
    let batch = self.pending.lock().take();
    if let Some(batch) = batch {
      (self.callback)(batch);
    }
  }
}

/// Like [`BatchSubscriber`](super::BatchSubscriber), but keeps only the
/// latest message per key within a window. The callback receives the whole
/// map.
pub struct KeyedBatchSubscriber<K, T> {
  fiber: Arc<dyn Fiber>,
  shared: Arc<KeyedShared<K, T>>,
  key_fn: Box<dyn Fn(&T) -> K + Send + Sync + 'static>,
  interval: Duration,
  filter: Option<Filter<T>>,
}

impl<K, T> fmt::Debug for KeyedBatchSubscriber<K, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyedBatchSubscriber")
      .field("fiber", &self.fiber.name())
      .field("interval", &self.interval)
      .field("flush_scheduled", &self.shared.pending.lock().is_some())
      .finish()
  }
}

impl<K, T> KeyedBatchSubscriber<K, T>
where
  K: Eq + Hash + Send + 'static,
  T: Clone + Send + 'static,
{
  pub fn new<C, F>(fiber: Arc<dyn Fiber>, callback: C, interval: Duration, key_fn: F) -> Self
  where
    C: Fn(HashMap<K, T>) + Send + Sync + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
  {
    Self {
      fiber,
      shared: Arc::new(KeyedShared {
        pending: Mutex::new(None),
        callback: Box::new(callback),
      }),
      key_fn: Box::new(key_fn),
      interval,
      filter: None,
    }
  }

  /// Only buffers messages for which `filter` returns `true`.
  pub fn with_filter<P>(mut self, filter: P) -> Self
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.filter = Some(Arc::new(filter));
    self
  }
}

impl<K, T> Subscriber<T> for KeyedBatchSubscriber<K, T>
where
  K: Eq + Hash + Send + 'static,
  T: Clone + Send + 'static,
{
  fn fiber(&self) -> &Arc<dyn Fiber> {
    &self.fiber
  }

  fn on_message(&self, message: &T) {
    if let Some(filter) = &self.filter {
      if !filter(message) {
        return;
      }
    }

    let key = (self.key_fn)(message);
    let opened_window = {
      let mut pending = self.shared.pending.lock();
      let first = pending.is_none();
      pending
        .get_or_insert_with(HashMap::new)
        .insert(key, message.clone());
      first
    };

    if opened_window {
      let shared = self.shared.clone();
      self.fiber.schedule(Box::new(move || shared.flush()), self.interval);
    }
  }
}
