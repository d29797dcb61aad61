//! Lazy, thread-safe, exactly-once asynchronous bootstrapping.
//!
//! This crate sequences *when* an expensive resource (a container, a host, a test
//! harness...) gets built and torn down:
//!
//! - [`BootstrapperStateMachine<S>`]: accumulates configuration actions, builds the
//!   artifact exactly once on first demand through a pluggable
//!   [`BootstrappingStrategy`], shares it with every caller, and releases it exactly
//!   once on [`dispose`](BootstrapperStateMachine::dispose), even when disposal races
//!   an in-flight build.
//! - [`bridge`]: drives a future to completion from synchronous code on the calling
//!   thread, including nested (re-entrant) calls, without a background thread.
//!
//! The machine's state is a single slot changed only by compare-and-swap or swap;
//! blocking waits use `parking_lot`'s futex-based parking.
//!
//! # Features
//!
//! - **Deferred configuration**: any number of `configure` calls before the first access.
//! - **Single flight**: concurrent first accesses collapse into one `bootstrap` + `initialize`.
//! - **Unwind on failure**: an instance whose `initialize` fails is disposed before the
//!   original error reaches every waiter.
//! - **Deterministic teardown**: `dispose` is idempotent and always wins against publication.
//! - **Sync and async entry points**, with cancellable waits.
//!
//! # Examples
//!
//! ```rust
//! use std::io;
//!
//! use async_trait::async_trait;
//! use poly_boot::{BootstrapperStateMachine, BootstrappingStrategy, Disposable, DisposeError};
//!
//! struct Pool {
//!    size: usize,
//! }
//!
//! #[async_trait]
//! impl Disposable for Pool {
//!    async fn dispose(&self) -> Result<(), DisposeError> {
//!       Ok(())
//!    }
//! }
//!
//! struct PoolStrategy;
//!
//! #[async_trait]
//! impl BootstrappingStrategy for PoolStrategy {
//!    type Configuration = usize;
//!    type Instance = Pool;
//!    type Error = io::Error;
//!
//!    fn create_configuration(&self) -> usize {
//!       1
//!    }
//!
//!    async fn bootstrap(&self, size: usize) -> io::Result<Pool> {
//!       Ok(Pool { size })
//!    }
//!
//!    async fn initialize(&self, _pool: &Pool) -> io::Result<()> {
//!       Ok(())
//!    }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), poly_boot::BootstrapError<io::Error>> {
//! let machine = BootstrapperStateMachine::new(PoolStrategy);
//! machine.configure(|size| *size *= 4)?;
//!
//! let pool = machine.ensure_bootstrapped_async().await?;
//! assert_eq!(pool.size, 4);
//!
//! machine.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
mod dispose;
mod error;
mod machine;
mod slot;
mod strategy;
mod sync;

pub use dispose::{dispose_quietly, Disposable, DisposeError};
pub use error::{BootstrapError, InactiveBridge, WouldStall};
pub use machine::{BootstrapperStateMachine, Phase};
pub use strategy::BootstrappingStrategy;
