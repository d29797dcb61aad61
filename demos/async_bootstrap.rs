use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use poly_boot::{BootstrapperStateMachine, BootstrappingStrategy, Disposable, DisposeError, Phase};
use tokio::time::{sleep, Duration};

static BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Cluster {
   nodes: usize,
}

#[async_trait]
impl Disposable for Cluster {
   async fn dispose(&self) -> Result<(), DisposeError> {
      println!("Stopping {} nodes...", self.nodes);
      sleep(Duration::from_millis(20)).await;
      Ok(())
   }
}

struct ClusterStrategy;

#[async_trait]
impl BootstrappingStrategy for ClusterStrategy {
   type Configuration = usize;
   type Instance = Cluster;
   type Error = Infallible;

   fn create_configuration(&self) -> usize {
      1
   }

   async fn bootstrap(&self, nodes: usize) -> Result<Cluster, Infallible> {
      BUILDS.fetch_add(1, Ordering::Relaxed);
      println!("Starting {nodes} nodes...");
      sleep(Duration::from_millis(50)).await;
      Ok(Cluster { nodes })
   }

   async fn initialize(&self, cluster: &Cluster) -> Result<(), Infallible> {
      println!("Waiting for {} nodes to report healthy", cluster.nodes);
      Ok(())
   }
}

#[tokio::main]
async fn main() {
   let machine = Arc::new(BootstrapperStateMachine::new(ClusterStrategy).with_label("cluster"));
   machine.configure(|nodes| *nodes = 3).unwrap();

   let tasks: Vec<_> = (0..5)
      .map(|_| {
         let machine = Arc::clone(&machine);
         tokio::spawn(async move {
            let cluster = machine.ensure_bootstrapped_async().await.unwrap();
            println!("Task access: {} nodes", cluster.nodes);
         })
      })
      .collect();

   for t in tasks {
      t.await.unwrap();
   }

   assert_eq!(machine.phase(), Phase::Bootstrapped);
   assert_eq!(BUILDS.load(Ordering::Relaxed), 1); // Built only once

   machine.dispose().await;
   println!("Final phase: {}", machine.phase());
}
