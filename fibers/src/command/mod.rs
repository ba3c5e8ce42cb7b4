//! Building blocks shared by every fiber backend: the command type, the
//! disposable contract, the blocking command queue and the panic-isolating
//! command runner.

mod queue;
mod registry;
mod runner;

use std::sync::Arc;

pub use queue::CommandQueue;
pub use runner::{CommandRunner, PanicHook};

pub(crate) use registry::DisposableRegistry;

/// A zero-argument unit of work, owned by whichever queue currently holds it.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work that can be run any number of times (fixed-rate schedules).
pub type RepeatingCommand = Arc<dyn Fn() + Send + Sync + 'static>;

/// Something that can be released. `dispose` must be idempotent.
pub trait Disposable: Send + Sync {
  /// Releases the resource. Calling it again is a no-op.
  fn dispose(&self);
}
