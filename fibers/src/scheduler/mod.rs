//! Delayed and periodic execution.
//!
//! Fibers never measure time themselves; they hand commands to a [`Scheduler`]
//! which calls back when a deadline passes. Batching subscribers reach the
//! scheduler only through their fiber, which is what lets tests substitute a
//! [`StubFiber`](crate::fiber::StubFiber) and fire flushes by hand.

mod timer;
#[cfg(feature = "tokio")]
mod tokio_impl;

use crate::command::{Command, Disposable, RepeatingCommand};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use timer::TimerScheduler;
#[cfg(feature = "tokio")]
pub use tokio_impl::TokioScheduler;

/// The shortest period a fixed-rate schedule will repeat at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Cancellation token for a scheduled command.
///
/// Clones share the same token. Disposing is idempotent, and a disposed
/// command never runs again, even if its deadline already passed and it is
/// waiting on a fiber's queue.
#[derive(Clone, Default)]
pub struct TimerHandle {
  cancelled: Arc<AtomicBool>,
}

impl fmt::Debug for TimerHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TimerHandle")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

impl TimerHandle {
  /// Creates a live (not cancelled) handle.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns `true` once the handle has been disposed.
  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }

  /// Returns `true` if both handles share the same token.
  pub fn same_as(&self, other: &TimerHandle) -> bool {
    Arc::ptr_eq(&self.cancelled, &other.cancelled)
  }
}

impl Disposable for TimerHandle {
  fn dispose(&self) {
    self.cancelled.store(true, Ordering::Release);
  }
}

/// Runs commands after a delay or at a fixed rate.
///
/// Implementors only provide the `*_with` methods, which arm a command under
/// a caller-supplied handle; the handle-returning variants are derived.
pub trait Scheduler: Send + Sync {
  /// Runs `command` once after `delay`, unless `handle` is disposed first.
  fn schedule_once_with(&self, handle: TimerHandle, command: Command, delay: Duration);

  /// Runs `command` after `initial_delay` and then every `period` until
  /// `handle` is disposed. Deadlines advance by `period` from the previous
  /// deadline, not from when the command finished.
  fn schedule_at_fixed_rate_with(
    &self,
    handle: TimerHandle,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  );

  /// Runs `command` once after `delay`.
  fn schedule_once(&self, command: Command, delay: Duration) -> TimerHandle {
    let handle = TimerHandle::new();
    self.schedule_once_with(handle.clone(), command, delay);
    handle
  }

  /// Runs `command` repeatedly, see
  /// [`schedule_at_fixed_rate_with`](Self::schedule_at_fixed_rate_with).
  fn schedule_at_fixed_rate(
    &self,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  ) -> TimerHandle {
    let handle = TimerHandle::new();
    self.schedule_at_fixed_rate_with(handle.clone(), command, initial_delay, period);
    handle
  }
}
