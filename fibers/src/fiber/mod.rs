//! Fibers: logical single-threaded execution contexts.
//!
//! Everything submitted to one fiber runs in submission order and never
//! overlaps, whether the fiber owns a dedicated thread ([`ThreadFiber`]) or
//! borrows workers from a shared pool ([`PoolFiber`]). [`SynchronousFiber`]
//! and [`StubFiber`] implement the same contract for inline use and for
//! deterministic tests.

mod pool;
mod stub;
mod sync;
mod thread;

use crate::command::{Command, Disposable, RepeatingCommand};
use crate::error::Result;
use crate::scheduler::{Scheduler, TimerHandle};

use std::sync::{Arc, Weak};
use std::time::Duration;

pub use pool::{Executor, PoolFiber, PoolFiberFactory, PoolFiberFactoryBuilder};
pub use stub::StubFiber;
pub use sync::SynchronousFiber;
pub use thread::{ThreadFiber, ThreadFiberBuilder};

/// The capability set shared by every fiber backend.
pub trait Fiber: Send + Sync {
  /// The fiber's name, used for its thread and in logs.
  fn name(&self) -> &str;

  /// Queues `command` to run on this fiber after everything already queued.
  fn execute(&self, command: Command);

  /// Queues `command` after `delay`. A zero delay queues it immediately.
  fn schedule(&self, command: Command, delay: Duration) -> TimerHandle;

  /// Queues `command` after `initial_delay` and then every `period`, until
  /// the returned handle or the fiber is disposed.
  fn schedule_at_fixed_rate(
    &self,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  ) -> TimerHandle;

  /// Ties `resource` to this fiber's lifetime: it is disposed when the fiber
  /// is. Registering on an already disposed fiber disposes it at once.
  fn register(&self, resource: Arc<dyn Disposable>);

  /// Removes one registration of `resource`. Returns whether it was present.
  fn unregister(&self, resource: &dyn Disposable) -> bool;

  /// Starts executing queued commands.
  fn start(&self) -> Result<()>;

  /// Stops the fiber. Commands not yet run are discarded and every
  /// registered resource is disposed.
  fn dispose(&self);
}

/// Closure-friendly helpers available on every [`Fiber`].
pub trait FiberExt: Fiber {
  /// Queues a closure, see [`Fiber::execute`].
  fn post<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.execute(Box::new(f));
  }

  /// Queues a closure after `delay`, see [`Fiber::schedule`].
  fn post_after<F>(&self, f: F, delay: Duration) -> TimerHandle
  where
    F: FnOnce() + Send + 'static,
  {
    self.schedule(Box::new(f), delay)
  }
}

impl<T: Fiber + ?Sized> FiberExt for T {}

/// The parts of a fiber backend that scheduled commands call back into.
pub(crate) trait CommandSink: Send + Sync + 'static {
  fn enqueue(&self, command: Command);
  fn register(&self, resource: Arc<dyn Disposable>);
  fn unregister(&self, resource: &dyn Disposable) -> bool;
}

/// Wraps `command` so it does nothing once `handle` is disposed.
fn guarded(handle: TimerHandle, command: Command) -> Command {
  Box::new(move || {
    if !handle.is_cancelled() {
      command();
    }
  })
}

/// Arms `command` on `scheduler` so that, when due, it is moved onto `sink`'s
/// queue. The timer is registered with the sink until it fires.
pub(crate) fn schedule_on<S: CommandSink>(
  sink: &Arc<S>,
  scheduler: &dyn Scheduler,
  command: Command,
  delay: Duration,
) -> TimerHandle {
  let handle = TimerHandle::new();
  if delay.is_zero() {
    sink.enqueue(guarded(handle.clone(), command));
    return handle;
  }

  let registration: Arc<dyn Disposable> = Arc::new(handle.clone());
  sink.register(registration.clone());
  let target: Weak<S> = Arc::downgrade(sink);
  let guard = handle.clone();
  scheduler.schedule_once_with(
    handle.clone(),
    Box::new(move || {
      if let Some(target) = target.upgrade() {
        target.unregister(registration.as_ref());
        target.enqueue(guarded(guard, command));
      }
    }),
    delay,
  );
  handle
}

/// Fixed-rate counterpart of [`schedule_on`]. The registration stays until
/// the handle or the sink is disposed.
pub(crate) fn schedule_at_fixed_rate_on<S: CommandSink>(
  sink: &Arc<S>,
  scheduler: &dyn Scheduler,
  command: RepeatingCommand,
  initial_delay: Duration,
  period: Duration,
) -> TimerHandle {
  let handle = TimerHandle::new();
  sink.register(Arc::new(handle.clone()));
  let target: Weak<S> = Arc::downgrade(sink);
  let guard = handle.clone();
  scheduler.schedule_at_fixed_rate_with(
    handle.clone(),
    Arc::new(move || match target.upgrade() {
      Some(target) => {
        let command = command.clone();
        target.enqueue(guarded(guard.clone(), Box::new(move || command())));
      }
      // The fiber is gone; stop the timer.
      None => guard.dispose(),
    }),
    initial_delay,
    period,
  );
  handle
}
