use super::Command;
use crate::error::CommandPanic;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Receives the report of every command that panicked on a fiber.
pub type PanicHook = Arc<dyn Fn(&CommandPanic) + Send + Sync + 'static>;

/// Runs batches of commands, isolating each one so a panicking command
/// cannot take down the loop that drives it.
#[derive(Clone)]
pub struct CommandRunner {
  origin: Arc<str>,
  hook: Option<PanicHook>,
}

impl fmt::Debug for CommandRunner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandRunner")
      .field("origin", &self.origin)
      .field("has_panic_hook", &self.hook.is_some())
      .finish()
  }
}

impl CommandRunner {
  /// Creates a runner that reports panics through `tracing`.
  pub fn new(origin: impl Into<Arc<str>>) -> Self {
    Self {
      origin: origin.into(),
      hook: None,
    }
  }

  /// Creates a runner that reports panics to `hook`.
  pub fn with_hook(origin: impl Into<Arc<str>>, hook: Option<PanicHook>) -> Self {
    Self {
      origin: origin.into(),
      hook,
    }
  }

  /// The name panics are attributed to.
  pub fn origin(&self) -> &str {
    &self.origin
  }

  /// Runs a single command. Returns `false` if it panicked.
  pub fn run(&self, command: Command) -> bool {
    self.run_fn(command)
  }

  /// Runs any closure with the same isolation as [`run`](Self::run).
  pub fn run_fn<F: FnOnce()>(&self, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
      Ok(()) => true,
      Err(payload) => {
        self.report(CommandPanic::from_payload(&self.origin, payload));
        false
      }
    }
  }

  /// Runs every command in order. A panic in one does not skip the rest.
  pub fn run_all<I>(&self, commands: I)
  where
    I: IntoIterator<Item = Command>,
  {
    for command in commands {
      self.run(command);
    }
  }

  fn report(&self, report: CommandPanic) {
    match &self.hook {
      Some(hook) => {
        // A hook that panics itself is swallowed; there is nowhere left to report it.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| hook(&report)));
      }
      None => {
        tracing::error!(origin = %report.origin, message = %report.message, "command panicked");
      }
    }
  }
}
