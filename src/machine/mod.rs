//! The bootstrapper state machine.
//!
//! A [`BootstrapperStateMachine`] starts out `Configuring`. Configuration actions
//! accumulate until the first forcing access (`ensure_bootstrapped*`) moves it to
//! `Bootstrapping`, where a single memoized build runs the strategy's
//! `bootstrap` then `initialize`. The first waiter to observe a successful build
//! publishes it as `Bootstrapped`. `dispose` moves it to `Disposed` from any
//! state and releases whatever had been produced, including the result of a
//! build that was still in flight.
//!
//! The current state lives in a single slot that is only ever changed by a
//! compare-and-swap against the exact snapshot a caller observed, or by the
//! unconditional swap performed by `dispose`.

use core::fmt;
use core::future::Future;
use core::pin::pin;
use std::sync::Arc;

use futures::future::{self, Either};

use crate::bridge;
use crate::error::BootstrapError;
use crate::slot::StateSlot;
use crate::strategy::BootstrappingStrategy;

mod states;

use states::{Action, Bootstrapping, State};

/// Observable lifecycle phase of a [`BootstrapperStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
   /// Accepting configuration; nothing has been built.
   Configuring,
   /// A build is in flight (or settled but not yet published).
   Bootstrapping,
   /// The artifact is built, initialized and published.
   Bootstrapped,
   /// Terminal.
   Disposed,
}

impl fmt::Display for Phase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         Self::Configuring => "configuring",
         Self::Bootstrapping => "bootstrapping",
         Self::Bootstrapped => "bootstrapped",
         Self::Disposed => "disposed",
      })
   }
}

/// Lazy, thread-safe, exactly-once bootstrapper for the artifact produced by `S`.
///
/// All operations take `&self` and may race freely from any number of threads.
///
/// # Examples
///
/// ```rust
/// use std::convert::Infallible;
///
/// use async_trait::async_trait;
/// use poly_boot::{BootstrapperStateMachine, BootstrappingStrategy, Disposable, DisposeError};
///
/// #[derive(Debug)]
/// struct Greeting(String);
///
/// #[async_trait]
/// impl Disposable for Greeting {
///    async fn dispose(&self) -> Result<(), DisposeError> {
///       Ok(())
///    }
/// }
///
/// struct GreetingStrategy;
///
/// #[async_trait]
/// impl BootstrappingStrategy for GreetingStrategy {
///    type Configuration = Vec<&'static str>;
///    type Instance = Greeting;
///    type Error = Infallible;
///
///    fn create_configuration(&self) -> Self::Configuration {
///       Vec::new()
///    }
///
///    async fn bootstrap(&self, words: Vec<&'static str>) -> Result<Greeting, Infallible> {
///       Ok(Greeting(words.join(" ")))
///    }
///
///    async fn initialize(&self, _greeting: &Greeting) -> Result<(), Infallible> {
///       Ok(())
///    }
/// }
///
/// let machine = BootstrapperStateMachine::new(GreetingStrategy);
/// machine
///    .configure(|words| words.push("hello"))?
///    .configure(|words| words.push("world"))?;
///
/// let greeting = machine.ensure_bootstrapped()?;
/// assert_eq!(greeting.0, "hello world");
///
/// machine.dispose_blocking()?;
/// assert!(machine.ensure_bootstrapped().unwrap_err().is_disposed());
/// # Ok::<(), poly_boot::BootstrapError<Infallible>>(())
/// ```
pub struct BootstrapperStateMachine<S: BootstrappingStrategy> {
   strategy: Arc<S>,
   state: StateSlot<State<S>>,
   label: &'static str,
}

impl<S: BootstrappingStrategy> BootstrapperStateMachine<S> {
   /// Creates a machine in the `Configuring` phase. Nothing is built yet.
   pub fn new(strategy: S) -> Self {
      Self::from_arc(Arc::new(strategy))
   }

   /// Like [`new`](Self::new), for a strategy that is shared with other machines.
   pub fn from_arc(strategy: Arc<S>) -> Self {
      Self {
         strategy,
         state: StateSlot::new(State::initial()),
         label: "bootstrapper",
      }
   }

   /// Sets the name this machine reports in its log events.
   #[must_use]
   pub fn with_label(mut self, label: &'static str) -> Self {
      self.label = label;
      self
   }

   /// Name reported in log events.
   #[inline]
   pub fn label(&self) -> &'static str {
      self.label
   }

   /// The strategy this machine bootstraps with.
   #[inline]
   pub fn strategy(&self) -> &Arc<S> {
      &self.strategy
   }

   /// Current phase. Only a snapshot; it may change immediately after returning.
   pub fn phase(&self) -> Phase {
      self.state.load().phase()
   }

   /// Shorthand for `phase() == Phase::Disposed`.
   #[inline]
   pub fn is_disposed(&self) -> bool {
      self.phase() == Phase::Disposed
   }

   /// Returns the instance if it has already been published. Never starts a build.
   pub fn try_bootstrapped(&self) -> Option<Arc<S::Instance>> {
      match &*self.state.load() {
         State::Bootstrapped(artifact) => Some(Arc::clone(artifact.instance())),
         _ => None,
      }
   }

   /// Queues a configuration action to run against the configuration right before
   /// the build starts. Actions run once each, in call order.
   ///
   /// Concurrent calls never lose actions: a caller whose snapshot went stale
   /// retries against the newer one.
   ///
   /// # Errors
   ///
   /// - [`BootstrapError::InvalidOperation`] once bootstrapping has started.
   /// - [`BootstrapError::Disposed`] after `dispose`.
   pub fn configure<F>(&self, action: F) -> Result<&Self, BootstrapError<S::Error>>
   where
      F: Fn(&mut S::Configuration) + Send + Sync + 'static,
   {
      let action: Action<S::Configuration> = Arc::new(action);
      let mut current = self.state.load();
      loop {
         let next = Arc::new(current.configured(&action)?);
         match self.state.compare_exchange(&current, next) {
            Ok(_) => {
               tracing::trace!(label = self.label, "configuration action queued");
               return Ok(self);
            }
            Err(actual) => current = actual,
         }
      }
   }

   /// Returns the bootstrapped instance, building it first if needed.
   ///
   /// Blocks the calling thread; the build is driven on this thread through
   /// [`bridge::try_block_on`], so no runtime is required. Returns without
   /// blocking when the instance is already published.
   ///
   /// # Errors
   ///
   /// See [`ensure_bootstrapped_async`](Self::ensure_bootstrapped_async). Also
   /// [`BootstrapError::InvalidOperation`] when it would have to block a thread
   /// driving a current-thread tokio runtime; nothing is started in that case.
   pub fn ensure_bootstrapped(&self) -> Result<Arc<S::Instance>, BootstrapError<S::Error>> {
      match &*self.state.load() {
         State::Bootstrapped(artifact) => return Ok(Arc::clone(artifact.instance())),
         State::Disposed => return Err(BootstrapError::Disposed),
         _ => {}
      }
      bridge::try_block_on(self.ensure_bootstrapped_async()).unwrap_or_else(|_| Err(would_stall()))
   }

   /// Blocking variant that gives up with [`BootstrapError::Canceled`] once `cancel`
   /// completes. Giving up does not affect the build itself.
   pub fn ensure_bootstrapped_until<C>(
      &self,
      cancel: C,
   ) -> Result<Arc<S::Instance>, BootstrapError<S::Error>>
   where
      C: Future<Output = ()>,
   {
      bridge::try_block_on(self.ensure_bootstrapped_async_until(cancel)).unwrap_or_else(|_| Err(would_stall()))
   }

   /// Returns the bootstrapped instance, building it first if needed.
   ///
   /// Every concurrent caller shares one build; all of them receive the same
   /// `Arc`. A failed build is final: the same error is returned to every
   /// current and future caller.
   ///
   /// # Errors
   ///
   /// - [`BootstrapError::Build`] / [`BootstrapError::Initialize`] with the
   ///   strategy's original error.
   /// - [`BootstrapError::Disposed`] if the machine was disposed before the
   ///   instance could be published.
   /// - [`BootstrapError::InvalidOperation`] when called from inside this
   ///   machine's own build.
   pub async fn ensure_bootstrapped_async(&self) -> Result<Arc<S::Instance>, BootstrapError<S::Error>> {
      let mut current = self.state.load();
      loop {
         let next = match &*current {
            State::Configuring(configuring) => Arc::new(State::Bootstrapping(Bootstrapping::start(
               Arc::clone(&self.strategy),
               configuring,
               self.label,
            ))),
            State::Bootstrapping(bootstrapping) => return self.publish(&current, bootstrapping).await,
            State::Bootstrapped(artifact) => return Ok(Arc::clone(artifact.instance())),
            State::Disposed => return Err(BootstrapError::Disposed),
         };
         // Losing this race means someone else moved on; follow whatever is current now.
         current = match self.state.compare_exchange(&current, Arc::clone(&next)) {
            Ok(_) => {
               tracing::debug!(label = self.label, "bootstrapping started");
               next
            }
            Err(actual) => actual,
         };
      }
   }

   /// Async variant that gives up with [`BootstrapError::Canceled`] once `cancel`
   /// completes. Giving up does not affect the build or its other waiters.
   pub async fn ensure_bootstrapped_async_until<C>(
      &self,
      cancel: C,
   ) -> Result<Arc<S::Instance>, BootstrapError<S::Error>>
   where
      C: Future<Output = ()>,
   {
      let work = pin!(self.ensure_bootstrapped_async());
      let cancel = pin!(cancel);
      match future::select(work, cancel).await {
         Either::Left((outcome, _)) => outcome,
         Either::Right(((), _)) => {
            tracing::debug!(label = self.label, "stopped waiting for bootstrapping");
            Err(BootstrapError::Canceled)
         }
      }
   }

   /// Awaits the in-flight build and publishes its result.
   async fn publish(
      &self,
      observed: &Arc<State<S>>,
      bootstrapping: &Bootstrapping<S>,
   ) -> Result<Arc<S::Instance>, BootstrapError<S::Error>> {
      if bootstrapping.is_driven_here() {
         return Err(BootstrapError::InvalidOperation(
            "bootstrapping is already running on this thread",
         ));
      }

      let artifact = bootstrapping.task().await?;
      let instance = Arc::clone(artifact.instance());
      let published = Arc::new(State::Bootstrapped(Arc::clone(&artifact)));

      match self.state.compare_exchange(observed, published) {
         Ok(_) => {
            tracing::debug!(label = self.label, "bootstrapped");
            Ok(instance)
         }
         Err(actual) => match &*actual {
            State::Bootstrapped(winner) if Arc::ptr_eq(winner, &artifact) => Ok(instance),
            _ => {
               tracing::debug!(
                  label = self.label,
                  "disposed before bootstrapping could be published; releasing instance"
               );
               artifact.release().await;
               Err(BootstrapError::Disposed)
            }
         },
      }
   }

   /// Moves the machine to `Disposed` and releases what the previous state held.
   ///
   /// The move happens immediately, inside this call; the returned future does the
   /// releasing (waiting for an in-flight build first). Idempotent: once disposed,
   /// further calls return a future that does nothing. Never fails; release errors
   /// are logged and swallowed.
   #[must_use = "the previous state is only released once the returned future is awaited"]
   pub fn dispose(&self) -> impl Future<Output = ()> + Send + 'static {
      let previous = self.state.swap(Arc::new(State::Disposed));
      if previous.phase() != Phase::Disposed {
         tracing::debug!(label = self.label, from = %previous.phase(), "disposing");
      }
      async move { previous.release().await }
   }

   /// Blocking variant of [`dispose`](Self::dispose), driven through [`bridge::try_block_on`].
   ///
   /// # Errors
   ///
   /// [`BootstrapError::InvalidOperation`] on a thread driving a current-thread
   /// tokio runtime. The machine is left untouched; await
   /// [`dispose`](Self::dispose) instead.
   pub fn dispose_blocking(&self) -> Result<(), BootstrapError<S::Error>> {
      // Checked up front: `dispose` swaps eagerly, and the release must not be lost.
      if bridge::would_stall() {
         return Err(would_stall());
      }
      bridge::try_block_on(self.dispose()).map_err(|_| would_stall())
   }
}

fn would_stall<E>() -> BootstrapError<E>
where
   E: std::error::Error + Send + Sync + 'static,
{
   BootstrapError::InvalidOperation("blocking inside a current-thread runtime; use the async API instead")
}

impl<S: BootstrappingStrategy> Drop for BootstrapperStateMachine<S> {
   fn drop(&mut self) {
      let label = self.label;
      match &**self.state.get_mut() {
         State::Bootstrapping(_) => {
            tracing::warn!(label, "dropped while bootstrapping; call dispose to release the instance");
         }
         State::Bootstrapped(artifact) if !artifact.is_released() => {
            tracing::warn!(label, "dropped without dispose; the instance was not released");
         }
         _ => {}
      }
   }
}

impl<S: BootstrappingStrategy> fmt::Debug for BootstrapperStateMachine<S> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("BootstrapperStateMachine")
         .field("label", &self.label)
         .field("state", &self.state.load())
         .finish()
   }
}
