//! # Node Container
//!
//! Configuration and assembly of the node's components.

pub mod config;

pub use config::{ConfigError, NetworkConfig, NodeConfig, RuntimeConfig, ServerAddr, StorageConfig};
