//! Uniform best-effort release of bootstrapped artifacts.
//!
//! Every artifact a [`BootstrappingStrategy`](crate::BootstrappingStrategy) can
//! produce implements [`Disposable`]. Artifacts whose teardown is synchronous
//! simply do their work inside `dispose` and return; artifacts with nothing to
//! release return `Ok(())`.

use std::sync::Arc;

use async_trait::async_trait;

/// Error reported by a failing [`Disposable::dispose`].
pub type DisposeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Capability to release a resource, possibly asynchronously.
///
/// `dispose` is called at most once per artifact by the state machine.
#[async_trait]
pub trait Disposable: Send + Sync {
   /// Releases the resource.
   async fn dispose(&self) -> Result<(), DisposeError>;
}

#[async_trait]
impl<T: Disposable + ?Sized> Disposable for Arc<T> {
   async fn dispose(&self) -> Result<(), DisposeError> {
      (**self).dispose().await
   }
}

#[async_trait]
impl<T: Disposable + ?Sized> Disposable for Box<T> {
   async fn dispose(&self) -> Result<(), DisposeError> {
      (**self).dispose().await
   }
}

/// Disposes `resource`, logging and discarding any failure.
///
/// Release failures must never mask the error that caused an unwind, nor block
/// shutdown, so this never reports back to the caller.
pub async fn dispose_quietly<T: Disposable + ?Sized>(resource: &T) {
   if let Err(error) = resource.dispose().await {
      tracing::warn!(error = %error, "release failed; ignoring");
   }
}
