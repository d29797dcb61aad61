use std::io;

use async_trait::async_trait;
use poly_boot::{BootstrapError, BootstrapperStateMachine, BootstrappingStrategy, Disposable, DisposeError};

struct Container {
   id: &'static str,
}

#[async_trait]
impl Disposable for Container {
   async fn dispose(&self) -> Result<(), DisposeError> {
      println!("Removing container {}", self.id);
      Ok(())
   }
}

struct ContainerStrategy;

#[async_trait]
impl BootstrappingStrategy for ContainerStrategy {
   type Configuration = Vec<&'static str>;
   type Instance = Container;
   type Error = io::Error;

   fn create_configuration(&self) -> Vec<&'static str> {
      Vec::new()
   }

   async fn bootstrap(&self, ports: Vec<&'static str>) -> io::Result<Container> {
      println!("Creating container exposing {ports:?}");
      Ok(Container { id: "c0ffee" })
   }

   async fn initialize(&self, container: &Container) -> io::Result<()> {
      println!("Probing container {}...", container.id);
      Err(io::Error::new(io::ErrorKind::TimedOut, "readiness probe timed out"))
   }
}

fn main() {
   let machine = BootstrapperStateMachine::new(ContainerStrategy);
   machine.configure(|ports| ports.push("5432/tcp")).unwrap();

   // The container is removed before the error comes back
   match machine.ensure_bootstrapped() {
      Ok(_) => panic!("Should have failed"),
      Err(e) => println!("Caught error: {e}"),
   }

   // Failure is final; nothing is rebuilt
   match machine.ensure_bootstrapped() {
      Err(BootstrapError::Initialize(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
      _ => panic!("Should have returned the same failure"),
   }

   machine.dispose_blocking().unwrap();
}
