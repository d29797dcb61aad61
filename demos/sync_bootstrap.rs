use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use poly_boot::{BootstrapperStateMachine, BootstrappingStrategy, Disposable, DisposeError};

static BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Database {
   url: String,
}

#[async_trait]
impl Disposable for Database {
   async fn dispose(&self) -> Result<(), DisposeError> {
      println!("Closing {}", self.url);
      Ok(())
   }
}

struct DatabaseStrategy;

#[async_trait]
impl BootstrappingStrategy for DatabaseStrategy {
   type Configuration = String;
   type Instance = Database;
   type Error = Infallible;

   fn create_configuration(&self) -> String {
      "postgres://localhost".to_string()
   }

   async fn bootstrap(&self, url: String) -> Result<Database, Infallible> {
      // This runs only once
      BUILDS.fetch_add(1, Ordering::Relaxed);
      println!("Connecting to {url}...");
      std::thread::sleep(std::time::Duration::from_millis(50));
      Ok(Database { url })
   }

   async fn initialize(&self, database: &Database) -> Result<(), Infallible> {
      println!("Migrating {}", database.url);
      Ok(())
   }
}

fn main() {
   let machine = Arc::new(BootstrapperStateMachine::new(DatabaseStrategy));
   machine
      .configure(|url| url.push_str("/orders"))
      .unwrap();

   let threads: Vec<_> = (0..5)
      .map(|_| {
         let machine = Arc::clone(&machine);
         std::thread::spawn(move || {
            println!("Thread access: {}", machine.ensure_bootstrapped().unwrap().url);
         })
      })
      .collect();

   for t in threads {
      t.join().unwrap();
   }

   assert_eq!(BUILDS.load(Ordering::Relaxed), 1); // Built only once
   machine.dispose_blocking().unwrap();
   assert!(machine.is_disposed());
}
