// fibers/src/scheduler/timer.rs

use super::{Scheduler, TimerHandle, MIN_PERIOD};
use crate::command::{Command, CommandRunner, PanicHook, RepeatingCommand};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

enum TimerTask {
  Once(Command),
  Repeating {
    command: RepeatingCommand,
    period: Duration,
  },
}

struct TimerEntry {
  deadline: Instant,
  seq: u64,
  handle: TimerHandle,
  task: TimerTask,
}

// Ordered so that `BinaryHeap` pops the earliest deadline first; ties fall
// back to arming order.
impl Ord for TimerEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .deadline
      .cmp(&self.deadline)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for TimerEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for TimerEntry {
  fn eq(&self, other: &Self) -> bool {
    self.seq == other.seq
  }
}

impl Eq for TimerEntry {}

struct TimerState {
  entries: BinaryHeap<TimerEntry>,
  next_seq: u64,
  running: bool,
  thread_started: bool,
}

struct TimerShared {
  state: Mutex<TimerState>,
  wakeup: Condvar,
  runner: CommandRunner,
}

/// A [`Scheduler`] backed by one dedicated timer thread.
///
/// The thread is spawned lazily on the first schedule and exits on
/// [`shutdown`](Self::shutdown) (also called on drop). Commands run on the
/// timer thread itself; fibers only use it to move commands onto their own
/// queue, so timer callbacks stay short.
///
/// Commands armed after shutdown are ignored.
pub struct TimerScheduler {
  name: Arc<str>,
  shared: Arc<TimerShared>,
  thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TimerScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("TimerScheduler")
      .field("name", &self.name)
      .field("armed", &state.entries.len())
      .field("running", &state.running)
      .field("thread_started", &state.thread_started)
      .finish()
  }
}

impl TimerScheduler {
  /// Creates a scheduler whose thread will be named `name`.
  pub fn new(name: impl Into<Arc<str>>) -> Self {
    Self::with_panic_hook(name, None)
  }

  /// Creates a scheduler that reports panicking timer commands to `hook`.
  pub fn with_panic_hook(name: impl Into<Arc<str>>, hook: Option<PanicHook>) -> Self {
    let name = name.into();
    Self {
      shared: Arc::new(TimerShared {
        state: Mutex::new(TimerState {
          entries: BinaryHeap::new(),
          next_seq: 0,
          running: true,
          thread_started: false,
        }),
        wakeup: Condvar::new(),
        runner: CommandRunner::with_hook(name.clone(), hook),
      }),
      name,
      thread: Mutex::new(None),
    }
  }

  /// The timer thread's name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of armed, not yet fired, entries (cancelled ones included until
  /// their deadline passes).
  pub fn armed(&self) -> usize {
    self.shared.state.lock().entries.len()
  }

  /// Returns `true` until [`shutdown`](Self::shutdown) is called.
  pub fn is_running(&self) -> bool {
    self.shared.state.lock().running
  }

  /// Stops the timer thread and drops every armed command without running it.
  pub fn shutdown(&self) {
    let dropped = {
      let mut state = self.shared.state.lock();
      if !state.running {
        return;
      }
      state.running = false;
      self.shared.wakeup.notify_all();
      mem::take(&mut state.entries)
    };
    tracing::debug!(timer = %self.name, dropped = dropped.len(), "timer scheduler shut down");
    // Dropped outside the lock: a command's captures may own this scheduler.
    drop(dropped);
    // The thread exits on its own; it is not joined because shutdown may be
    // reached from the timer thread itself.
    self.thread.lock().take();
  }

  fn arm(&self, handle: TimerHandle, task: TimerTask, delay: Duration) {
    let mut state = self.shared.state.lock();
    if !state.running {
      drop(state);
      tracing::warn!(timer = %self.name, "schedule after shutdown ignored");
      return;
    }
    let seq = state.next_seq;
    state.next_seq += 1;
    state.entries.push(TimerEntry {
      deadline: Instant::now() + delay,
      seq,
      handle,
      task,
    });
    if !state.thread_started {
      self.spawn_thread(&mut state);
    }
    self.shared.wakeup.notify_one();
  }

  fn spawn_thread(&self, state: &mut MutexGuard<'_, TimerState>) {
    let shared = self.shared.clone();
    let spawned = thread::Builder::new()
      .name(self.name.to_string())
      .spawn(move || run_timer(shared));
    match spawned {
      Ok(handle) => {
        state.thread_started = true;
        *self.thread.lock() = Some(handle);
        tracing::debug!(timer = %self.name, "timer thread started");
      }
      Err(err) => {
        // Entries stay armed; the next schedule retries the spawn.
        tracing::warn!(timer = %self.name, error = %err, "failed to spawn timer thread");
      }
    }
  }
}

impl Drop for TimerScheduler {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl Scheduler for TimerScheduler {
  fn schedule_once_with(&self, handle: TimerHandle, command: Command, delay: Duration) {
    self.arm(handle, TimerTask::Once(command), delay);
  }

  fn schedule_at_fixed_rate_with(
    &self,
    handle: TimerHandle,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  ) {
    let period = period.max(MIN_PERIOD);
    self.arm(handle, TimerTask::Repeating { command, period }, initial_delay);
  }
}

fn run_timer(shared: Arc<TimerShared>) {
  let mut state = shared.state.lock();
  loop {
    if !state.running {
      break;
    }

    let now = Instant::now();
    let next_deadline = match state.entries.peek() {
      None => {
        shared.wakeup.wait(&mut state);
        continue;
      }
      Some(entry) => entry.deadline,
    };
    if next_deadline > now {
      shared.wakeup.wait_until(&mut state, next_deadline);
      continue;
    }

    let Some(entry) = state.entries.pop() else {
      continue;
    };
    if entry.handle.is_cancelled() {
      MutexGuard::unlocked(&mut state, || drop(entry));
      continue;
    }

    match entry.task {
      TimerTask::Once(command) => {
        MutexGuard::unlocked(&mut state, || {
          shared.runner.run(command);
        });
      }
      TimerTask::Repeating { command, period } => {
        let tick = command.clone();
        MutexGuard::unlocked(&mut state, || {
          shared.runner.run_fn(|| tick());
        });
        if state.running && !entry.handle.is_cancelled() {
          state.entries.push(TimerEntry {
            deadline: entry.deadline + period,
            seq: entry.seq,
            handle: entry.handle,
            task: TimerTask::Repeating { command, period },
          });
        }
      }
    }
  }
}
