use super::subscription::Filter;
use super::Subscriber;
use crate::fiber::Fiber;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

struct LastShared<T> {
  slot: Mutex<Option<T>>,
  callback: Box<dyn Fn(T) + Send + Sync + 'static>,
}

impl<T> LastShared<T> {
  fn flush(&self) {
    let last = self.slot.lock().take();
    if let Some(last) = last {
      (self.callback)(last);
    }
  }
}

/// Delivers only the most recent message of each window; earlier ones are
/// overwritten.
pub struct LastSubscriber<T> {
  fiber: Arc<dyn Fiber>,
  shared: Arc<LastShared<T>>,
  interval: Duration,
  filter: Option<Filter<T>>,
}

impl<T> fmt::Debug for LastSubscriber<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LastSubscriber")
      .field("fiber", &self.fiber.name())
      .field("interval", &self.interval)
      .field("flush_scheduled", &self.shared.slot.lock().is_some())
      .finish()
  }
}

impl<T> LastSubscriber<T>
where
  T: Clone + Send + 'static,
{
  pub fn new<C>(fiber: Arc<dyn Fiber>, callback: C, interval: Duration) -> Self
  where
    C: Fn(T) + Send + Sync + 'static,
  {
    Self {
      fiber,
      shared: Arc::new(LastShared {
        slot: Mutex::new(None),
        callback: Box::new(callback),
      }),
      interval,
      filter: None,
    }
  }

  /// Ignores messages for which `filter` returns `false`.
  pub fn with_filter<P>(mut self, filter: P) -> Self
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.filter = Some(Arc::new(filter));
    self
  }
}

impl<T> Subscriber<T> for LastSubscriber<T>
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

    let opened_window = self.shared.slot.lock().replace(message.clone()).is_none();
    if opened_window {
      let shared = self.shared.clone();
      self.fiber.schedule(Box::new(move || shared.flush()), self.interval);
    }
  }
}
