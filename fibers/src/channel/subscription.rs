use super::Subscriber;
use crate::command::CommandRunner;
use crate::fiber::Fiber;

use std::fmt;
use std::sync::Arc;

/// A predicate deciding whether a message is delivered.
pub type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

/// The direct delivery policy: each message (optionally filtered) becomes one
/// command on the subscriber's fiber that invokes the callback.
pub struct ChannelSubscription<T> {
  fiber: Arc<dyn Fiber>,
  callback: Arc<dyn Fn(T) + Send + Sync + 'static>,
  filter: Option<Filter<T>>,
  /// Isolates callbacks run on the producer thread.
  inline: CommandRunner,
}

impl<T> fmt::Debug for ChannelSubscription<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChannelSubscription")
      .field("fiber", &self.fiber.name())
      .field("filtered", &self.filter.is_some())
      .finish()
  }
}

impl<T> ChannelSubscription<T>
where
  T: Clone + Send + 'static,
{
  /// Delivers every message to `callback` on `fiber`.
  pub fn new<C>(fiber: Arc<dyn Fiber>, callback: C) -> Self
  where
    C: Fn(T) + Send + Sync + 'static,
  {
    Self {
      inline: CommandRunner::new(fiber.name()),
      fiber,
      callback: Arc::new(callback),
      filter: None,
    }
  }

  /// Only delivers messages for which `filter` returns `true`.
  pub fn with_filter<P>(mut self, filter: P) -> Self
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.filter = Some(Arc::new(filter));
    self
  }

  fn passes(&self, message: &T) -> bool {
    self.filter.as_ref().map_or(true, |filter| filter(message))
  }

  /// Runs the callback on the calling thread if the filter passes. A panic
  /// is caught and logged so the publisher and the other subscribers carry on.
  pub(crate) fn deliver_inline(&self, message: &T) {
    if self.passes(message) {
      let message = message.clone();
      self.inline.run_fn(|| (self.callback)(message));
    }
  }
}

impl<T> Subscriber<T> for ChannelSubscription<T>
where
  T: Clone + Send + 'static,
{
  fn fiber(&self) -> &Arc<dyn Fiber> {
    &self.fiber
  }

  fn on_message(&self, message: &T) {
    if !self.passes(message) {
      return;
    }
    let callback = self.callback.clone();
    let message = message.clone();
    self.fiber.execute(Box::new(move || callback(message)));
  }
}
