// fibers/src/scheduler/tokio_impl.rs

#![cfg(feature = "tokio")]

use super::{Scheduler, TimerHandle, MIN_PERIOD};
use crate::command::{Command, CommandRunner, RepeatingCommand};

use std::fmt;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A [`Scheduler`] that arms timers as tasks on an existing tokio runtime.
///
/// The runtime must have its time driver enabled.
#[derive(Clone)]
pub struct TokioScheduler {
  handle: Handle,
  runner: CommandRunner,
}

impl fmt::Debug for TokioScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokioScheduler")
      .field("runner", &self.runner)
      .finish_non_exhaustive()
  }
}

impl TokioScheduler {
  /// Wraps a runtime handle.
  pub fn new(handle: Handle) -> Self {
    Self {
      handle,
      runner: CommandRunner::new("tokio-scheduler"),
    }
  }

  /// Wraps the runtime of the calling context.
  ///
  /// # Panics
  ///
  /// Panics if called outside of a tokio runtime.
  pub fn current() -> Self {
    Self::new(Handle::current())
  }
}

impl Scheduler for TokioScheduler {
  fn schedule_once_with(&self, handle: TimerHandle, command: Command, delay: Duration) {
    let runner = self.runner.clone();
    self.handle.spawn(async move {
      time::sleep(delay).await;
      if !handle.is_cancelled() {
        runner.run(command);
      }
    });
  }

  fn schedule_at_fixed_rate_with(
    &self,
    handle: TimerHandle,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  ) {
    let runner = self.runner.clone();
    let period = period.max(MIN_PERIOD);
    self.handle.spawn(async move {
      let mut interval = time::interval_at(Instant::now() + initial_delay, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
      loop {
        interval.tick().await;
        if handle.is_cancelled() {
          break;
        }
        runner.run_fn(|| command());
      }
    });
  }
}
