//! Atomically swappable `Arc` slot.
//!
//! [`StateSlot<T>`] holds exactly one `Arc<T>` at any instant. It supports the
//! three moves a lock-free style state machine needs: `load` (snapshot the
//! current value), `compare_exchange` keyed on `Arc` identity, and an
//! unconditional `swap`. The underlying [`Guarded`] lock is held only for the
//! pointer operation itself; replaced or rejected values are always dropped
//! after it is released.

use core::mem;
use std::sync::Arc;

use crate::sync::Guarded;

pub(crate) struct StateSlot<T> {
   current: Guarded<Arc<T>>,
}

impl<T> StateSlot<T> {
   pub(crate) fn new(value: T) -> Self {
      Self {
         current: Guarded::new(Arc::new(value)),
      }
   }

   /// Returns a snapshot of the current value.
   #[inline]
   pub(crate) fn load(&self) -> Arc<T> {
      self.current.with(|current| Arc::clone(current))
   }

   /// Installs `new` if the slot still holds exactly `expected` (pointer identity).
   ///
   /// Returns the replaced value on success, or the value actually observed on failure.
   #[inline]
   pub(crate) fn compare_exchange(&self, expected: &Arc<T>, new: Arc<T>) -> Result<Arc<T>, Arc<T>> {
      let outcome = self.current.with(|current| {
         if Arc::ptr_eq(current, expected) {
            Ok(mem::replace(current, new))
         } else {
            Err((Arc::clone(current), new))
         }
      });
      // The rejected replacement is dropped here, outside the lock.
      outcome.map_err(|(actual, _rejected)| actual)
   }

   /// Unconditionally installs `new`, returning the previous value.
   #[inline]
   pub(crate) fn swap(&self, new: Arc<T>) -> Arc<T> {
      self.current.replace(new)
   }

   /// Current value, through exclusive access. Never takes the lock.
   #[inline]
   pub(crate) fn get_mut(&mut self) -> &mut Arc<T> {
      self.current.get_mut()
   }
}
