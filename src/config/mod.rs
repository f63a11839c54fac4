pub mod settings;
mod validation;

pub use settings::{MiningSettings, NodeSettings, Settings};
pub use validation::{validate_mining_settings, validate_node_settings, validate_settings};
