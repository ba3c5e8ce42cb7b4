// fibers/src/error.rs

use std::any::Any;
use std::io;

use thiserror::Error;

/// The main error type for the `fibre_fibers` library.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Fiber '{0}' has already been started")]
  AlreadyStarted(String),

  #[error("Fiber '{0}' has been disposed")]
  Disposed(String),

  #[error("Failed to spawn thread '{name}': {source}")]
  Spawn {
    name: String,
    #[source]
    source: io::Error,
  },

  #[error("No executor configured for the pool fiber factory")]
  NoExecutor,

  #[cfg(feature = "rayon")]
  #[error("Failed to build worker pool: {0}")]
  PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

/// A specialized `Result` type for `fibre_fibers` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Report produced when a command panics while a fiber (or timer) runs it.
///
/// The panic is contained: the fiber keeps running the commands queued after
/// the one that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Command panicked on '{origin}': {message}")]
pub struct CommandPanic {
  /// Name of the fiber or timer that was running the command.
  pub origin: String,
  /// The panic payload, if it was a string.
  pub message: String,
}

impl CommandPanic {
  pub(crate) fn from_payload(origin: &str, payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
      (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
      msg.clone()
    } else {
      "unknown panic".to_string()
    };
    Self {
      origin: origin.to_string(),
      message,
    }
  }
}
