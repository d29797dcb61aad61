//! Error taxonomy for the state machine and the synchronous bridge.

use std::sync::Arc;

/// Failure of a state machine operation.
///
/// `E` is the strategy's error type. Strategy failures are shared behind an `Arc`
/// so every caller that awaited the same bootstrap attempt observes the very same
/// error object; `Display` and `source()` forward to it unchanged.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError<E>
where
   E: std::error::Error + Send + Sync + 'static,
{
   /// The operation is not allowed in the machine's current phase.
   #[error("{0}")]
   InvalidOperation(&'static str),
   /// The machine was disposed before or while the operation ran.
   #[error("the bootstrapper has been disposed")]
   Disposed,
   /// The strategy's `bootstrap` failed. The machine does not retry.
   #[error(transparent)]
   Build(Arc<E>),
   /// The strategy's `initialize` failed. The built instance has been released.
   #[error(transparent)]
   Initialize(Arc<E>),
   /// The caller stopped waiting for an in-flight bootstrap.
   #[error("waiting for bootstrapping was canceled")]
   Canceled,
}

impl<E> BootstrapError<E>
where
   E: std::error::Error + Send + Sync + 'static,
{
   /// Returns `true` for [`BootstrapError::Disposed`].
   #[inline]
   pub fn is_disposed(&self) -> bool {
      matches!(self, Self::Disposed)
   }

   /// Returns `true` for [`BootstrapError::Canceled`].
   #[inline]
   pub fn is_canceled(&self) -> bool {
      matches!(self, Self::Canceled)
   }

   /// The strategy's original error, for build and initialization failures.
   pub fn strategy_error(&self) -> Option<&E> {
      match self {
         Self::Build(error) | Self::Initialize(error) => Some(error),
         _ => None,
      }
   }
}

impl<E> Clone for BootstrapError<E>
where
   E: std::error::Error + Send + Sync + 'static,
{
   fn clone(&self) -> Self {
      match self {
         Self::InvalidOperation(message) => Self::InvalidOperation(*message),
         Self::Disposed => Self::Disposed,
         Self::Build(error) => Self::Build(Arc::clone(error)),
         Self::Initialize(error) => Self::Initialize(Arc::clone(error)),
         Self::Canceled => Self::Canceled,
      }
   }
}

/// [`spawn_local`](crate::bridge::spawn_local) was called on a thread with no
/// active [`block_on`](crate::bridge::block_on) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no synchronous bridge is active on this thread")]
pub struct InactiveBridge;

/// A blocking call was made on a thread that drives a current-thread tokio
/// runtime; parking that thread would stop the runtime it is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot block a thread that is driving a current-thread runtime; use the async API instead")]
pub struct WouldStall;
