//! Synchronous execution bridge.
//!
//! [`block_on`] drives a future to completion on the calling thread. For the
//! duration of the call a thread-local cooperative context is installed:
//! wake-ups (from any thread) are queued on that context and the calling thread
//! alternates between running queued work and parking on a [`Signal`] until
//! something is queued again. No background thread is involved.
//!
//! Calls nest. When `block_on` runs on a thread whose context is already
//! installed (a future being driven synchronously itself blocks on another
//! future), the inner call loops on the *existing* context, so continuations
//! queued by outer frames (see [`spawn_local`]) keep being drained while the
//! inner frame waits. Wake-ups addressed to frames that are suspended further up
//! the stack are deferred and re-queued once the inner frame returns.
//!
//! With the `async-tokio-mt` feature, an outermost `block_on` issued from inside
//! a multi-threaded tokio runtime runs its loop under
//! [`tokio::task::block_in_place`], letting the worker hand off its other tasks
//! instead of stalling them. Inside a *current-thread* runtime the calling
//! thread is the only one driving that runtime's timers and I/O, so parking it
//! could never finish: [`try_block_on`] refuses with [`WouldStall`] and
//! [`block_on`] panics, the same way tokio rejects a nested `Runtime::block_on`.

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use futures::future::LocalBoxFuture;
use futures::task::{waker, ArcWake};
#[cfg(feature = "async-tokio-mt")]
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::{InactiveBridge, WouldStall};
use crate::sync::{Guarded, Signal};

type TaskId = u64;

thread_local! {
   static CONTEXT: RefCell<Option<Rc<LocalContext>>> = const { RefCell::new(None) };
}

/// Runs `future` to completion on the current thread, blocking until it finishes.
///
/// The output (including a panic raised while polling) is returned to the caller
/// as-is. Safe to call recursively from within a future that is itself being
/// driven by `block_on`.
///
/// # Panics
///
/// When called (outside any active bridge) from within a current-thread tokio
/// runtime; see [`try_block_on`].
///
/// # Examples
///
/// ```rust
/// let value = poly_boot::bridge::block_on(async {
///    let inner = poly_boot::bridge::block_on(async { 20 });
///    inner + 22
/// });
/// assert_eq!(value, 42);
/// ```
pub fn block_on<F: Future>(future: F) -> F::Output {
   match try_block_on(future) {
      Ok(output) => output,
      Err(error) => panic!("{error}"),
   }
}

/// Like [`block_on`], but returns [`WouldStall`] instead of blocking a thread
/// that is driving a current-thread tokio runtime. The future is dropped unpolled
/// in that case.
pub fn try_block_on<F: Future>(future: F) -> Result<F::Output, WouldStall> {
   if let Some(context) = current() {
      tracing::trace!("re-entering active bridge context");
      return Ok(context.drive(future));
   }

   #[cfg(feature = "async-tokio-mt")]
   {
      match runtime_flavor() {
         Some(RuntimeFlavor::MultiThread) => {
            return Ok(tokio::task::block_in_place(|| enter(future)));
         }
         Some(RuntimeFlavor::CurrentThread) => return Err(WouldStall),
         _ => {}
      }
   }

   Ok(enter(future))
}

/// `true` when [`try_block_on`] would refuse to block on this thread.
#[cfg(feature = "async-tokio-mt")]
pub(crate) fn would_stall() -> bool {
   !is_active() && matches!(runtime_flavor(), Some(RuntimeFlavor::CurrentThread))
}

#[cfg(not(feature = "async-tokio-mt"))]
pub(crate) fn would_stall() -> bool {
   false
}

#[cfg(feature = "async-tokio-mt")]
fn runtime_flavor() -> Option<RuntimeFlavor> {
   Handle::try_current().ok().map(|handle| handle.runtime_flavor())
}

/// Queues `future` on the bridge context active on this thread.
///
/// The task runs interleaved with the future passed to `block_on`, and with any
/// nested `block_on` frame, until it completes or the outermost `block_on` on
/// this thread returns (at which point unfinished tasks are dropped).
pub fn spawn_local<F>(future: F) -> Result<(), InactiveBridge>
where
   F: Future<Output = ()> + 'static,
{
   let context = current().ok_or(InactiveBridge)?;
   let id = context.allocate_id();
   context.tasks.borrow_mut().insert(id, Box::pin(future));
   context.inbox.push(id);
   Ok(())
}

/// Returns `true` while a [`block_on`] call is running on this thread.
pub fn is_active() -> bool {
   current().is_some()
}

fn current() -> Option<Rc<LocalContext>> {
   CONTEXT
      .try_with(|slot| slot.borrow().clone())
      .ok()
      .flatten()
}

/// Installs a fresh context for the outermost frame and drives `future` on it.
fn enter<F: Future>(future: F) -> F::Output {
   let context = Rc::new(LocalContext::new());
   let _installed = Installed::new(Rc::clone(&context));
   tracing::trace!("installed bridge context");
   context.drive(future)
}

/// Removes the thread's context on every exit path, unwinding included.
struct Installed;

impl Installed {
   fn new(context: Rc<LocalContext>) -> Self {
      CONTEXT.with(|slot| *slot.borrow_mut() = Some(context));
      Self
   }
}

impl Drop for Installed {
   fn drop(&mut self) {
      // Taken out first so leftover tasks are dropped without the slot borrowed.
      let previous = CONTEXT.try_with(|slot| slot.borrow_mut().take()).ok().flatten();
      drop(previous);
   }
}

/// The thread-safe half of a context: where wakers deliver task ids.
struct Inbox {
   ready: Guarded<VecDeque<TaskId>>,
   signal: Signal,
}

impl Inbox {
   fn push(&self, id: TaskId) {
      self.ready.with(|ready| ready.push_back(id));
      self.signal.set();
   }

   fn pop(&self) -> Option<TaskId> {
      self.ready.with(|ready| ready.pop_front())
   }

   fn is_empty(&self) -> bool {
      self.ready.with(|ready| ready.is_empty())
   }

   /// Parks until something is pushed. Returns immediately if a push raced us.
   fn park(&self) {
      self.signal.reset();
      if self.is_empty() {
         self.signal.wait();
      }
   }
}

struct TaskWaker {
   id: TaskId,
   inbox: Arc<Inbox>,
}

impl ArcWake for TaskWaker {
   fn wake_by_ref(arc_self: &Arc<Self>) {
      arc_self.inbox.push(arc_self.id);
   }
}

/// Thread-local cooperative executor state.
struct LocalContext {
   inbox: Arc<Inbox>,
   next_id: Cell<TaskId>,
   /// Spawned tasks that are not currently being polled.
   tasks: RefCell<HashMap<TaskId, LocalBoxFuture<'static, ()>>>,
   /// Frames and tasks currently on this thread's stack, outermost first.
   busy: RefCell<Vec<TaskId>>,
   /// Wake-ups for busy entries, held back until the innermost frame exits.
   deferred: RefCell<Vec<TaskId>>,
}

impl LocalContext {
   fn new() -> Self {
      Self {
         inbox: Arc::new(Inbox {
            ready: Guarded::new(VecDeque::new()),
            signal: Signal::new(),
         }),
         next_id: Cell::new(0),
         tasks: RefCell::new(HashMap::new()),
         busy: RefCell::new(Vec::new()),
         deferred: RefCell::new(Vec::new()),
      }
   }

   fn allocate_id(&self) -> TaskId {
      let id = self.next_id.get();
      self.next_id.set(id + 1);
      id
   }

   fn waker_for(&self, id: TaskId) -> core::task::Waker {
      waker(Arc::new(TaskWaker {
         id,
         inbox: Arc::clone(&self.inbox),
      }))
   }

   /// Polls `future` until it completes, running other queued work in between.
   fn drive<F: Future>(&self, future: F) -> F::Output {
      let id = self.allocate_id();
      let waker = self.waker_for(id);
      let mut cx = Context::from_waker(&waker);
      let mut future = pin!(future);
      let _frame = Busy::enter(self, id);

      let mut poll_root = true;
      loop {
         if poll_root {
            poll_root = false;
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
               return output;
            }
         }
         match self.inbox.pop() {
            Some(ready) if ready == id => poll_root = true,
            Some(ready) => self.run(ready),
            None => self.inbox.park(),
         }
      }
   }

   /// Polls one spawned task, or defers the wake-up if its owner is mid-poll.
   fn run(&self, id: TaskId) {
      if self.busy.borrow().contains(&id) {
         self.deferred.borrow_mut().push(id);
         return;
      }
      let task = self.tasks.borrow_mut().remove(&id);
      // Finished tasks can still receive stale wake-ups.
      let Some(mut task) = task else {
         return;
      };

      let waker = self.waker_for(id);
      let mut cx = Context::from_waker(&waker);
      let _running = Busy::enter(self, id);
      if task.as_mut().poll(&mut cx).is_pending() {
         self.tasks.borrow_mut().insert(id, task);
      }
   }
}

/// Marks `id` as on-stack; on exit re-queues whatever was deferred meanwhile.
struct Busy<'a> {
   context: &'a LocalContext,
}

impl<'a> Busy<'a> {
   fn enter(context: &'a LocalContext, id: TaskId) -> Self {
      context.busy.borrow_mut().push(id);
      Self { context }
   }
}

impl Drop for Busy<'_> {
   fn drop(&mut self) {
      self.context.busy.borrow_mut().pop();
      let deferred = core::mem::take(&mut *self.context.deferred.borrow_mut());
      for id in deferred {
         self.context.inbox.push(id);
      }
   }
}
