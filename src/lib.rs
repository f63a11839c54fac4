pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mining;
pub mod node_api;
pub mod poller;

#[cfg(test)]
mod test_helpers;

pub use cache::{EntityCache, QueryState, QueryStatus, BLOCKCHAIN_KEY, TRANSACTIONS_KEY};
pub use config::Settings;
pub use error::NodeApiError;
pub use mining::{MiningHandle, MiningOrchestrator, MiningState, ViewReconciler};
pub use node_api::{NodeClient, RemoteDataClient};
pub use poller::{CheckOutcome, PollHandle, PollOutcome, Poller, PollerConfig};
