//! Configuration for the proxy
//!
//! The core consumes a `ProxyConfig` as plain values. Where it comes from is
//! up to the caller; `file_loader` covers the JSON/TOML file case.

pub mod file_loader;
pub mod logging_config;
pub mod model;
pub mod timeouts;

pub use file_loader::{load_from_file, read_from_file, save_to_file};
pub use logging_config::LoggingConfig;
pub use model::{PortConfig, ProxyConfig, RelayConfig, TransportMode};
