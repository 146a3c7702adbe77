pub mod cli;
pub mod clients;
#[allow(clippy::module_inception)]
pub mod config;
pub mod limits;
pub mod types;

pub use clients::ClientsConfig;
pub use config::{Config, ConfigHandle};
pub use limits::{ConfigError, Limits, MOCK_PIPELINE};
pub use types::LogLevel;
