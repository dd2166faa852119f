//! A single-threaded promise: a value, or a failure, that will exist later.
//!
//! A [`Promise`] is settled once through its [`Resolver`], and derives new
//! promises with [`then`](Promise::then), [`catch`](Promise::catch) and
//! [`finally`](Promise::finally). Callbacks never run on the stack that
//! settled or observed the promise; they go through an injected
//! [`Scheduler`].
//!
//! # Examples
//!
//! Driving promises by hand with a [`TaskQueue`]:
//!
//! ```
//! use promise_then::{Promise, Resolution, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let (promise, resolver) = Promise::<String, String>::pending(&queue);
//! let greeting = promise
//!     .and_then(|name| Ok(Resolution::Value(format!("hello {}", name))))
//!     .catch(|_| Ok(Resolution::Value("hello nobody".to_string())));
//! resolver.resolve("world".into());
//! queue.run_until_stalled();
//! assert_eq!(greeting.value(), Some(Ok("hello world".to_string())));
//! ```
//!
//! Awaiting from a `LocalPool`, whose spawner doubles as the scheduler:
//!
//! ```
//! use futures::executor::LocalPool;
//! use promise_then::{Promise, Resolution};
//!
//! let mut pool = LocalPool::new();
//! let spawner = pool.spawner();
//! let answer = Promise::<i32, ()>::fulfilled(&spawner, 6)
//!     .and_then(|v| Ok(Resolution::Value(v * 7)));
//! assert_eq!(pool.run_until(answer.settled()), Ok(Ok(42)));
//! ```
use thiserror::Error;

mod combinators;
pub mod options;
mod promise;
pub mod scheduler;
mod thenable;

pub use options::Options;
pub use promise::{Promise, PromiseState, Resolver, Settled};
pub use scheduler::{Scheduler, Task, TaskQueue};
pub use thenable::{Reaction, Resolution, Thenable};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("expected a finite sequence of promises")]
    NotASequence,
    #[error("every resolver was dropped before the promise settled")]
    Abandoned,
}
