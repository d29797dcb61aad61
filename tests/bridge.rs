use std::cell::Cell;
use std::panic;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future;
use poly_boot::bridge::{block_on, is_active, spawn_local, try_block_on};
use poly_boot::InactiveBridge;

#[test]
fn test_block_on_ready_future() {
   assert_eq!(block_on(async { 7 }), 7);
   assert!(!is_active());
}

#[test]
fn test_block_on_waits_for_other_thread() {
   let (tx, rx) = oneshot::channel();
   let sender = thread::spawn(move || {
      thread::sleep(Duration::from_millis(10));
      tx.send(5).unwrap();
   });
   assert_eq!(block_on(rx), Ok(5));
   sender.join().unwrap();
}

#[test]
fn test_is_active_only_inside_block_on() {
   assert!(!is_active());
   assert!(block_on(async { is_active() }));
   assert!(!is_active());
}

#[test]
fn test_spawn_local_runs_alongside_root() {
   let hits = Rc::new(Cell::new(0));
   let (tx, rx) = oneshot::channel();

   let value = block_on({
      let hits = Rc::clone(&hits);
      async move {
         spawn_local(async move {
            hits.set(hits.get() + 1);
            let _ = tx.send(11);
         })
         .unwrap();
         rx.await.unwrap()
      }
   });

   assert_eq!(value, 11);
   assert_eq!(hits.get(), 1);
}

#[test]
fn test_nested_block_on_drains_outer_tasks() {
   // The inner frame can only finish if it runs the task queued by the outer frame.
   let value = block_on(async {
      let (tx, rx) = oneshot::channel();
      spawn_local(async move {
         let _ = tx.send(20);
      })
      .unwrap();
      let inner = block_on(rx).unwrap();
      inner + 22
   });
   assert_eq!(value, 42);
}

#[test]
fn test_outer_wakeup_delivered_after_nested_frame() {
   let (early_tx, early_rx) = oneshot::channel();
   let (late_tx, late_rx) = oneshot::channel();
   let sender = thread::spawn(move || {
      thread::sleep(Duration::from_millis(5));
      early_tx.send(1).unwrap();
      thread::sleep(Duration::from_millis(15));
      late_tx.send(2).unwrap();
   });

   // `early_rx` wakes the outer frame while the inner frame is still blocked.
   let (early, late) = block_on(future::join(early_rx, async { block_on(late_rx) }));

   assert_eq!(early, Ok(1));
   assert_eq!(late, Ok(2));
   sender.join().unwrap();
}

#[test]
fn test_context_removed_after_panic() {
   let outcome = panic::catch_unwind(|| block_on(async { panic!("boom") }));
   assert!(outcome.is_err());
   assert!(!is_active());
   assert_eq!(spawn_local(async {}), Err(InactiveBridge));

   // The thread is still usable afterwards.
   assert_eq!(block_on(async { 3 }), 3);
}

#[test]
fn test_spawn_local_without_bridge() {
   assert_eq!(spawn_local(async {}), Err(InactiveBridge));
   assert_eq!(
      InactiveBridge.to_string(),
      "no synchronous bridge is active on this thread"
   );
}

#[test]
fn test_unfinished_tasks_dropped_on_exit() {
   let dropped = Rc::new(Cell::new(false));

   struct Flag(Rc<Cell<bool>>);
   impl Drop for Flag {
      fn drop(&mut self) {
         self.0.set(true);
      }
   }

   block_on({
      let flag = Flag(Rc::clone(&dropped));
      async move {
         spawn_local(async move {
            let _flag = flag;
            future::pending::<()>().await;
         })
         .unwrap();
      }
   });

   assert!(dropped.get());
}

#[cfg(feature = "async-tokio-mt")]
#[tokio::test]
async fn test_refuses_to_block_current_thread_runtime() {
   assert_eq!(try_block_on(async { 1 }), Err(poly_boot::WouldStall));

   let outcome = panic::catch_unwind(|| block_on(async { 1 }));
   assert!(outcome.is_err());
   assert!(!is_active());
}

#[cfg(feature = "async-tokio-mt")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocks_in_place_on_multi_thread_runtime() {
   let (tx, rx) = oneshot::channel();
   tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(5)).await;
      let _ = tx.send(9);
   });
   assert_eq!(try_block_on(rx), Ok(Ok(9)));
}
