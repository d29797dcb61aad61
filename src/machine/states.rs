//! The four state variants and the values they own.
//!
//! Every variant is immutable once constructed; the machine moves between them
//! by swapping whole `Arc<State<S>>` values in its slot, so ownership of the
//! accumulated configuration or of the artifact transfers with the swap.

use core::fmt;
use core::future::Future;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};

use super::Phase;
use crate::dispose::dispose_quietly;
use crate::error::BootstrapError;
use crate::strategy::BootstrappingStrategy;

/// A single configuration action. Shared so a lost CAS can retry without cloning the closure.
pub(crate) type Action<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

type Instance<S> = <S as BootstrappingStrategy>::Instance;
type StrategyError<S> = <S as BootstrappingStrategy>::Error;

/// What the memoized build resolves to, shared by every waiter.
pub(crate) type Outcome<S> = Result<Arc<Artifact<Instance<S>>>, BootstrapError<StrategyError<S>>>;

pub(crate) enum State<S: BootstrappingStrategy> {
   Configuring(Configuring<S::Configuration>),
   Bootstrapping(Bootstrapping<S>),
   Bootstrapped(Arc<Artifact<S::Instance>>),
   Disposed,
}

impl<S: BootstrappingStrategy> State<S> {
   pub(crate) fn initial() -> Self {
      Self::Configuring(Configuring::empty())
   }

   pub(crate) fn phase(&self) -> Phase {
      match self {
         Self::Configuring(_) => Phase::Configuring,
         Self::Bootstrapping(_) => Phase::Bootstrapping,
         Self::Bootstrapped(_) => Phase::Bootstrapped,
         Self::Disposed => Phase::Disposed,
      }
   }

   /// The state `configure(action)` would move to from this one.
   pub(crate) fn configured(
      &self,
      action: &Action<S::Configuration>,
   ) -> Result<Self, BootstrapError<S::Error>> {
      match self {
         Self::Configuring(configuring) => Ok(Self::Configuring(configuring.then(Arc::clone(action)))),
         Self::Bootstrapping(_) | Self::Bootstrapped(_) => Err(BootstrapError::InvalidOperation(
            "configuration is only possible before bootstrapping",
         )),
         Self::Disposed => Err(BootstrapError::Disposed),
      }
   }

   /// Releases whatever this state owned. Never fails.
   ///
   /// - `Configuring`, `Disposed`: nothing to do.
   /// - `Bootstrapping`: waits for the build to settle, releases its artifact if any,
   ///   and swallows a build failure.
   /// - `Bootstrapped`: releases the artifact.
   pub(crate) async fn release(&self) {
      match self {
         Self::Configuring(_) | Self::Disposed => {}
         Self::Bootstrapping(bootstrapping) => {
            if let Ok(artifact) = bootstrapping.task().await {
               artifact.release().await;
            }
         }
         Self::Bootstrapped(artifact) => artifact.release().await,
      }
   }
}

/// Accumulated configuration actions, newest last.
pub(crate) struct Configuring<C> {
   actions: Option<Arc<ActionChain<C>>>,
   len: usize,
}

/// Persistent list of actions; each snapshot shares its prefix with its predecessor.
struct ActionChain<C> {
   previous: Option<Arc<ActionChain<C>>>,
   action: Action<C>,
}

impl<C> Configuring<C> {
   fn empty() -> Self {
      Self { actions: None, len: 0 }
   }

   /// A new snapshot composing this one's actions with `action`.
   fn then(&self, action: Action<C>) -> Self {
      Self {
         actions: Some(Arc::new(ActionChain {
            previous: self.actions.clone(),
            action,
         })),
         len: self.len + 1,
      }
   }

   pub(crate) fn len(&self) -> usize {
      self.len
   }

   /// Applies every action to `configuration`, oldest first.
   fn apply(&self, configuration: &mut C) {
      let mut pending = Vec::with_capacity(self.len);
      let mut link = self.actions.as_ref();
      while let Some(node) = link {
         pending.push(&node.action);
         link = node.previous.as_ref();
      }
      for action in pending.into_iter().rev() {
         action(configuration);
      }
   }
}

impl<C> Drop for ActionChain<C> {
   fn drop(&mut self) {
      // Unlinks iteratively; long chains would otherwise recurse once per action.
      let mut link = self.previous.take();
      while let Some(node) = link {
         match Arc::try_unwrap(node) {
            Ok(mut node) => link = node.previous.take(),
            Err(_) => break,
         }
      }
   }
}

impl<C> Clone for Configuring<C> {
   fn clone(&self) -> Self {
      Self {
         actions: self.actions.clone(),
         len: self.len,
      }
   }
}

/// A bootstrapped instance plus its once-only release.
pub(crate) struct Artifact<I> {
   instance: Arc<I>,
   release: Shared<BoxFuture<'static, ()>>,
}

impl<I: crate::Disposable + 'static> Artifact<I> {
   fn new(instance: I) -> Self {
      let instance = Arc::new(instance);
      let release = {
         let instance = Arc::clone(&instance);
         async move { dispose_quietly(&*instance).await }.boxed().shared()
      };
      Self { instance, release }
   }
}

impl<I> Artifact<I> {
   pub(crate) fn instance(&self) -> &Arc<I> {
      &self.instance
   }

   /// Disposes the instance on the first call; every caller waits for that one disposal.
   pub(crate) fn release(&self) -> impl Future<Output = ()> {
      self.release.clone()
   }

   pub(crate) fn is_released(&self) -> bool {
      self.release.peek().is_some()
   }
}

/// An in-flight build+initialize, memoized and shared by every waiter.
///
/// The task is inert until first polled; whichever waiter polls it drives it, and
/// it keeps its progress if that waiter goes away.
pub(crate) struct Bootstrapping<S: BootstrappingStrategy> {
   task: Shared<BoxFuture<'static, Outcome<S>>>,
   /// Token of the thread currently polling the task, or 0.
   driver: Arc<AtomicU64>,
}

impl<S: BootstrappingStrategy> Bootstrapping<S> {
   pub(crate) fn start(
      strategy: Arc<S>,
      configuring: &Configuring<S::Configuration>,
      label: &'static str,
   ) -> Self {
      let driver = Arc::new(AtomicU64::new(0));
      let mut work = build(strategy, configuring.clone(), label).boxed();
      let task = {
         let driver = Arc::clone(&driver);
         future::poll_fn(move |cx| {
            let _polling = Polling::enter(&driver);
            work.as_mut().poll(cx)
         })
      };
      Self {
         task: task.boxed().shared(),
         driver,
      }
   }

   pub(crate) fn task(&self) -> Shared<BoxFuture<'static, Outcome<S>>> {
      self.task.clone()
   }

   /// `true` when called from inside this build's own poll (re-entrant force).
   pub(crate) fn is_driven_here(&self) -> bool {
      self.driver.load(Ordering::Acquire) == thread_token()
   }
}

/// Runs the whole build: configure, bootstrap, initialize (unwinding on failure).
async fn build<S: BootstrappingStrategy>(
   strategy: Arc<S>,
   configuring: Configuring<S::Configuration>,
   label: &'static str,
) -> Outcome<S> {
   let mut configuration = strategy.create_configuration();
   configuring.apply(&mut configuration);
   tracing::debug!(label, actions = configuring.len(), "bootstrapping");

   let instance = strategy
      .bootstrap(configuration)
      .await
      .map_err(|error| BootstrapError::Build(Arc::new(error)))?;

   if let Err(error) = strategy.initialize(&instance).await {
      tracing::debug!(label, error = %error, "initialization failed; releasing instance");
      dispose_quietly(&instance).await;
      return Err(BootstrapError::Initialize(Arc::new(error)));
   }
   Ok(Arc::new(Artifact::new(instance)))
}

/// Publishes the polling thread's token for the duration of one poll.
struct Polling<'a> {
   driver: &'a AtomicU64,
}

impl<'a> Polling<'a> {
   fn enter(driver: &'a AtomicU64) -> Self {
      driver.store(thread_token(), Ordering::Release);
      Self { driver }
   }
}

impl Drop for Polling<'_> {
   fn drop(&mut self) {
      self.driver.store(0, Ordering::Release);
   }
}

/// Small, non-zero, per-thread identifier.
fn thread_token() -> u64 {
   static NEXT: AtomicU64 = AtomicU64::new(1);
   thread_local! {
      static TOKEN: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
   }
   TOKEN.with(|token| *token)
}

impl<S: BootstrappingStrategy> fmt::Debug for State<S> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Configuring(configuring) => f
            .debug_struct("Configuring")
            .field("actions", &configuring.len())
            .finish(),
         Self::Bootstrapping(bootstrapping) => f
            .debug_struct("Bootstrapping")
            .field("settled", &bootstrapping.task.peek().is_some())
            .finish(),
         Self::Bootstrapped(artifact) => f
            .debug_struct("Bootstrapped")
            .field("released", &artifact.is_released())
            .finish(),
         Self::Disposed => f.write_str("Disposed"),
      }
   }
}
