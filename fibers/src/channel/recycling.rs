use super::subscription::Filter;
use super::Subscriber;
use crate::fiber::Fiber;

use std::fmt;
use std::mem;
use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A read-only view of one flushed batch, borrowed for the duration of the
/// callback. The buffer behind it is cleared and reused afterwards.
pub struct MessageReader<'a, T> {
  messages: &'a [T],
}

impl<T> fmt::Debug for MessageReader<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MessageReader")
      .field("len", &self.messages.len())
      .finish()
  }
}

impl<'a, T> MessageReader<'a, T> {
  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&'a T> {
    self.messages.get(index)
  }

  pub fn iter(&self) -> std::slice::Iter<'a, T> {
    self.messages.iter()
  }

  pub fn as_slice(&self) -> &'a [T] {
    self.messages
  }
}

impl<T> Index<usize> for MessageReader<'_, T> {
  type Output = T;

  fn index(&self, index: usize) -> &T {
    &self.messages[index]
  }
}

impl<'a, T> IntoIterator for &MessageReader<'a, T> {
  type Item = &'a T;
  type IntoIter = std::slice::Iter<'a, T>;

  fn into_iter(self) -> Self::IntoIter {
    self.messages.iter()
  }
}

struct RecyclingState<T> {
  buffer: Vec<T>,
  scheduled: bool,
}

struct RecyclingShared<T> {
  state: Mutex<RecyclingState<T>>,
  /// The buffer handed to the callback. Only the flush touches it, and at
  /// most one flush is outstanding. Emptied before every swap.
  spare: Mutex<Vec<T>>,
  callback: Box<dyn Fn(&MessageReader<'_, T>) + Send + Sync + 'static>,
}

impl<T> RecyclingShared<T> {
  fn flush(&self) {
    let mut flushing = self.spare.lock();
    // A callback that panicked last time left its batch behind.
    flushing.clear();
    {
      let mut state = self.state.lock();
      mem::swap(&mut state.buffer, &mut *flushing);
      state.scheduled = false;
    }
    if !flushing.is_empty() {
      (self.callback)(&MessageReader {
        messages: flushing.as_slice(),
      });
    }
    flushing.clear();
  }
}

/// A batching subscriber that reuses two buffers instead of allocating a new
/// vector per flush.
///
/// The callback receives a [`MessageReader`] borrowing the flushed buffer;
/// the borrow cannot outlive the callback, after which the buffer is cleared
/// and swapped back in for the next window.
pub struct RecyclingBatchSubscriber<T> {
  fiber: Arc<dyn Fiber>,
  shared: Arc<RecyclingShared<T>>,
  interval: Duration,
  filter: Option<Filter<T>>,
}

impl<T> fmt::Debug for RecyclingBatchSubscriber<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecyclingBatchSubscriber")
      .field("fiber", &self.fiber.name())
      .field("interval", &self.interval)
      .field("flush_scheduled", &self.shared.state.lock().scheduled)
      .finish()
  }
}

impl<T> RecyclingBatchSubscriber<T>
where
  T: Clone + Send + 'static,
{
  pub fn new<C>(fiber: Arc<dyn Fiber>, callback: C, interval: Duration) -> Self
  where
    C: Fn(&MessageReader<'_, T>) + Send + Sync + 'static,
  {
    Self {
      fiber,
      shared: Arc::new(RecyclingShared {
        state: Mutex::new(RecyclingState {
          buffer: Vec::new(),
          scheduled: false,
        }),
        spare: Mutex::new(Vec::new()),
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

impl<T> Subscriber<T> for RecyclingBatchSubscriber<T>
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
      let mut state = self.shared.state.lock();
      state.buffer.push(message.clone());
      !mem::replace(&mut state.scheduled, true)
    };
    if opened_window {
      let shared = self.shared.clone();
      self.fiber.schedule(Box::new(move || shared.flush()), self.interval);
    }
  }
}
