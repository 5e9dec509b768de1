pub mod error;
pub mod orchestrator;
pub mod registry;

pub use error::RegistryError;
pub use orchestrator::SubscriptionOrchestrator;
pub use registry::{AddOutcome, RemoveOutcome, SubscriptionRegistry};
