//! Internal futex-parked synchronization primitives.
//!
//! Two small building blocks live here, both packed into a single `AtomicU8`
//! and parked via `parking_lot_core`:
//!
//! - [`RawLock`] guards very short critical sections (a pointer swap or a queue
//!   push). It is never held across an `.await`, user callback, or strategy call.
//!   Layout: bit 0 `LOCKED`, bit 1 `WAITING`, bits 2-7 `EPOCH`.
//! - [`Signal`] is a manual-reset event used by the synchronous bridge to sleep
//!   until a continuation is queued. Layout: bit 0 `SET`, bit 1 `WAITING`.
//!
//! [`Guarded<T>`] pairs a `RawLock` with the data it protects.

use core::cell::UnsafeCell;
use core::mem;
use core::sync::atomic::{AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Parks the current thread while `cell` still holds `expected`.
#[inline]
fn park_while(cell: &AtomicU8, expected: u8) {
   // SAFETY: The address passed to park must match the address used for unpark.
   // We consistently use the address of the AtomicU8.
   unsafe {
      // park() checks the validation closure *before* sleeping, under the bucket lock,
      // so an unpark issued after our last state change cannot be lost.
      let _ = parking_lot_core::park(
         cell.as_ptr() as usize,
         || cell.load(Ordering::Acquire) == expected,
         || {},
         |_, _| {},
         DEFAULT_PARK_TOKEN,
         None,
      );
   }
}

/// Wakes every thread parked on `cell`.
#[inline]
fn unpark_all(cell: &AtomicU8) {
   // SAFETY: See `park_while`.
   unsafe {
      parking_lot_core::unpark_all(cell.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
   }
}

/// Atomic lock word.
#[repr(transparent)]
pub(crate) struct RawLock(AtomicU8);

impl RawLock {
   /// Bit flag: the lock is held.
   const LOCKED: u8 = 1;
   /// Bit flag: at least one thread is parked waiting for the lock.
   const WAITING: u8 = 2;
   /// Start of epoch bits.
   const EPOCH_1: u8 = 4;
   /// Mask for epoch bits.
   const EPOCH_MASK: u8 = !(Self::LOCKED | Self::WAITING);

   #[inline(always)]
   const fn next_epoch(current_state: u8) -> u8 {
      (current_state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   /// One acquisition attempt.
   ///
   /// Returns:
   ///   - `Ok(guard)`: lock acquired.
   ///   - `Err(state)`: lock held elsewhere; `state` is what a waiter should park on.
   ///     Unless `nowait` is set, the `WAITING` bit has been published in `state`.
   #[inline]
   fn lock_step(&self, nowait: bool) -> Result<RawLockGuard<'_>, u8> {
      loop {
         let current_state = self.0.load(Ordering::Relaxed);

         if current_state & Self::LOCKED == 0 {
            match self.0.compare_exchange_weak(
               current_state,
               current_state | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Ok(RawLockGuard { lock: self }),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         if !nowait && current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.0.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         return Err(current_state);
      }
   }

   /// Acquires the lock, parking if another thread holds it.
   #[inline]
   pub(crate) fn lock(&self) -> RawLockGuard<'_> {
      // Critical sections are a handful of instructions; spin briefly before parking.
      for _ in 0..32 {
         if let Ok(guard) = self.lock_step(true) {
            return guard;
         }
         std::hint::spin_loop();
      }
      loop {
         match self.lock_step(false) {
            Ok(guard) => return guard,
            Err(state) => park_while(&self.0, state),
         }
      }
   }

   /// Releases the lock, bumping the epoch and waking parked threads.
   #[inline]
   fn unlock(&self) {
      let current_state = self.0.load(Ordering::Relaxed);
      let prev_state = self.0.swap(Self::next_epoch(current_state), Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         unpark_all(&self.0);
      }
   }
}

/// RAII guard for [`RawLock`]. Dropping it releases the lock.
pub(crate) struct RawLockGuard<'a> {
   lock: &'a RawLock,
}

impl Drop for RawLockGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.lock.unlock();
   }
}

/// A value only reachable while holding its [`RawLock`].
pub(crate) struct Guarded<T> {
   lock: RawLock,
   value: UnsafeCell<T>,
}

impl<T> Guarded<T> {
   #[inline]
   pub(crate) const fn new(value: T) -> Self {
      Self {
         lock: RawLock::new(),
         value: UnsafeCell::new(value),
      }
   }

   /// Runs `f` with exclusive access to the value.
   ///
   /// `f` must not block, await, or call back into code that could take the same lock.
   #[inline]
   pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
      let _guard = self.lock.lock();
      // SAFETY: We hold the lock, so no other reference to the value exists.
      f(unsafe { &mut *self.value.get() })
   }

   /// Direct access through `&mut self`; no locking required.
   #[inline]
   pub(crate) fn get_mut(&mut self) -> &mut T {
      self.value.get_mut()
   }

   /// Replaces the value, returning the previous one.
   #[inline]
   pub(crate) fn replace(&self, value: T) -> T {
      self.with(|slot| mem::replace(slot, value))
   }
}

// SAFETY:
// The value is only touched under the lock, so sharing a `Guarded<T>` hands out at
// most one `&mut T` at a time. `T: Send` is required because that access (and the
// eventual drop) may happen on any thread.
unsafe impl<T: Send> Sync for Guarded<T> {}
// SAFETY: Moving the cell moves the value.
unsafe impl<T: Send> Send for Guarded<T> {}

/// Manual-reset event.
///
/// `set` latches until `reset`; `wait` returns immediately while set.
#[repr(transparent)]
pub(crate) struct Signal(AtomicU8);

impl Signal {
   /// Bit flag: the event is signaled.
   const SET: u8 = 1;
   /// Bit flag: a thread is (about to be) parked on the event.
   const WAITING: u8 = 2;

   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   #[cfg(test)]
   fn is_set(&self) -> bool {
      self.0.load(Ordering::Acquire) & Self::SET != 0
   }

   /// Signals the event and wakes any parked waiter.
   #[inline]
   pub(crate) fn set(&self) {
      let prev_state = self.0.fetch_or(Self::SET, Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         unpark_all(&self.0);
      }
   }

   /// Clears the signaled state.
   #[inline]
   pub(crate) fn reset(&self) {
      self.0.fetch_and(!Self::SET, Ordering::AcqRel);
   }

   /// Parks the calling thread until the event is signaled.
   pub(crate) fn wait(&self) {
      loop {
         let current_state = self.0.load(Ordering::Acquire);
         if current_state & Self::SET != 0 {
            // Leave WAITING clear so a later `set` skips the unpark syscall.
            self.0.fetch_and(!Self::WAITING, Ordering::Relaxed);
            return;
         }
         let waiting_state = current_state | Self::WAITING;
         if current_state != waiting_state
            && self
               .0
               .compare_exchange_weak(
                  current_state,
                  waiting_state,
                  Ordering::Relaxed,
                  Ordering::Relaxed,
               )
               .is_err()
         {
            std::hint::spin_loop();
            continue;
         }
         park_while(&self.0, waiting_state);
      }
   }
}

#[cfg(test)]
mod tests {
   use std::sync::atomic::AtomicUsize;
   use std::sync::Arc;
   use std::thread;
   use std::time::Duration;

   use super::*;

   #[test]
   fn test_guarded_counts_under_contention() {
      let guarded = Arc::new(Guarded::new(0usize));
      let threads: Vec<_> = (0..8)
         .map(|_| {
            let guarded = Arc::clone(&guarded);
            thread::spawn(move || {
               for _ in 0..1000 {
                  guarded.with(|v| *v += 1);
               }
            })
         })
         .collect();
      for handle in threads {
         handle.join().unwrap();
      }
      assert_eq!(guarded.with(|v| *v), 8000);
   }

   #[test]
   fn test_replace_returns_previous() {
      let guarded = Guarded::new(1);
      assert_eq!(guarded.replace(2), 1);
      assert_eq!(guarded.with(|v| *v), 2);
   }

   #[test]
   fn test_signal_wait_returns_when_already_set() {
      let signal = Signal::new();
      signal.set();
      assert!(signal.is_set());
      signal.wait();
      signal.reset();
      assert!(!signal.is_set());
   }

   #[test]
   fn test_signal_wakes_parked_thread() {
      let signal = Arc::new(Signal::new());
      let woken = Arc::new(AtomicUsize::new(0));
      let waiter = {
         let signal = Arc::clone(&signal);
         let woken = Arc::clone(&woken);
         thread::spawn(move || {
            signal.wait();
            woken.fetch_add(1, Ordering::SeqCst);
         })
      };
      thread::sleep(Duration::from_millis(20));
      assert_eq!(woken.load(Ordering::SeqCst), 0);
      signal.set();
      waiter.join().unwrap();
      assert_eq!(woken.load(Ordering::SeqCst), 1);
   }
}
