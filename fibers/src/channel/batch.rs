// fibers/src/channel/batch.rs

use super::subscription::Filter;
use super::Subscriber;
use crate::fiber::Fiber;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

struct BatchShared<T> {
  /// `Some` exactly while a flush is scheduled.
  pending: Mutex<Option<Vec<T>>>,
  callback: Box<dyn Fn(Vec<T>) + Send + Sync + 'static>,
}

impl<T> BatchShared<T> {
  fn flush(&self) {
    let batch = self.pending.lock().take();
    if let Some(batch) = batch {
      tracing::trace!(messages = batch.len(), "batch flush");
      (self.callback)(batch);
    }
  }
}

/// Collects messages for `interval` after the first one arrives, then
/// delivers them all at once, in publish order, on the fiber.
///
/// One flush is scheduled per window, on the transition from an empty buffer
/// to a non-empty one. An interval of zero flushes the next time the fiber
/// runs, which still coalesces everything published before that.
pub struct BatchSubscriber<T> {
  fiber: Arc<dyn Fiber>,
  shared: Arc<BatchShared<T>>,
  interval: Duration,
  filter: Option<Filter<T>>,
}

impl<T> fmt::Debug for BatchSubscriber<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BatchSubscriber")
      .field("fiber", &self.fiber.name())
      .field("interval", &self.interval)
      .field("flush_scheduled", &self.shared.pending.lock().is_some())
      .finish()
  }
}

impl<T> BatchSubscriber<T>
where
  T: Clone + Send + 'static,
{
  pub fn new<C>(fiber: Arc<dyn Fiber>, callback: C, interval: Duration) -> Self
  where
    C: Fn(Vec<T>) + Send + Sync + 'static,
  {
    Self {
      fiber,
      shared: Arc::new(BatchShared {
        pending: Mutex::new(None),
        callback: Box::new(callback),
      }),
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

impl<T> Subscriber<T> for BatchSubscriber<T>
where
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

    let opened_window = {
      let mut pending = self.shared.pending.lock();
      match pending.as_mut() {
        Some(batch) => {
          batch.push(message.clone());
          false
        }
        None => {
          *pending = Some(vec![message.clone()]);
          true
        }
      }
    };

    // Scheduled outside the lock: an inline fiber runs the flush right here.
    if opened_window {
      let shared = self.shared.clone();
      self.fiber.schedule(Box::new(move || shared.flush()), self.interval);
    }
  }
}
