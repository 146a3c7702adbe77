pub mod admin;
pub mod analytics;
pub mod auth;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod inference;
pub mod limiters;
pub mod quality;
pub mod tls;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use gateway::Gateway;
