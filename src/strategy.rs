//! The pluggable bootstrapping policy.

use async_trait::async_trait;

use crate::dispose::Disposable;

/// Describes how a specific kind of artifact is configured, built and initialized.
///
/// The state machine guarantees, per machine lifetime:
///
/// - [`create_configuration`](Self::create_configuration) is called once, right before
///   every accumulated configuration action is applied to its result, in call order.
/// - [`bootstrap`](Self::bootstrap) is called at most once, with that configuration.
/// - [`initialize`](Self::initialize) is called at most once, after `bootstrap` succeeded.
///
/// If `initialize` fails, the machine disposes the instance `bootstrap` returned
/// before propagating the error; the strategy does not need to clean it up.
/// A failing `bootstrap` must release whatever it allocated itself before returning.
#[async_trait]
pub trait BootstrappingStrategy: Send + Sync + 'static {
   /// Mutable builder that configuration actions are applied to.
   type Configuration: Send + 'static;
   /// The finished artifact.
   type Instance: Disposable + 'static;
   /// Build or initialization failure.
   type Error: std::error::Error + Send + Sync + 'static;

   /// Produces a fresh configuration. Must not have side effects beyond allocation.
   fn create_configuration(&self) -> Self::Configuration;

   /// Turns a fully configured builder into the artifact.
   async fn bootstrap(&self, configuration: Self::Configuration) -> Result<Self::Instance, Self::Error>;

   /// Runs post-construction setup against the freshly built artifact.
   async fn initialize(&self, instance: &Self::Instance) -> Result<(), Self::Error>;
}
