//! Fibers and typed publish/subscribe channels.
//!
//! A fiber is a logical single-threaded execution context: commands submitted
//! to it run one at a time, in submission order. Channels deliver messages to
//! subscribers on the subscriber's fiber, so a callback never has to guard the
//! state it owns.
//!
//! # Features
//! - **Thread fibers**: a dedicated OS thread draining a command queue in batches.
//! - **Pool fibers**: many fibers multiplexed over a shared [`Executor`], each
//!   still strictly sequential.
//! - **Subscriber policies**: direct, filtered, batched, keyed-batched,
//!   last-value and buffer-recycling delivery.
//! - **Scheduling**: delayed and fixed-rate commands, cancellable via
//!   [`TimerHandle`].
//! - **Test doubles**: [`StubFiber`] records work and runs it on demand.
//!
//! ```no_run
//! use fibre_fibers::{Channel, Fiber, ThreadFiber};
//! use std::sync::Arc;
//!
//! let fiber: Arc<dyn Fiber> = Arc::new(ThreadFiber::new());
//! fiber.start().unwrap();
//!
//! let prices: Channel<f64> = Channel::new();
//! prices.subscribe(fiber.clone(), |price| println!("tick {price}"));
//! prices.publish(101.25);
//! ```

pub mod channel;
pub mod command;
pub mod error;
pub mod fiber;
pub mod scheduler;

// Re-export the primary user-facing types for convenience
pub use channel::{
  BatchSubscriber, Channel, ChannelSubscription, KeyedBatchSubscriber, LastSubscriber, MessageReader,
  RecyclingBatchSubscriber, Subscriber, SubscriberList, Unsubscriber,
};
pub use command::{Command, CommandQueue, CommandRunner, Disposable, PanicHook, RepeatingCommand};
pub use error::{CommandPanic, Error, Result};
pub use fiber::{
  Executor, Fiber, FiberExt, PoolFiber, PoolFiberFactory, PoolFiberFactoryBuilder, StubFiber,
  SynchronousFiber, ThreadFiber, ThreadFiberBuilder,
};
pub use scheduler::{Scheduler, TimerHandle, TimerScheduler};

#[cfg(feature = "tokio")]
pub use scheduler::TokioScheduler;
