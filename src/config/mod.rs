//! Configuration system for lantern-chain.
//!
//! This module provides TOML configuration loading with hierarchy merging
//! and resolution into the settings a relay process runs with.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. User config: `~/.config/lantern-chain/config.toml`
//! 2. Additional config file (via `--config` flag)
//! 3. CLI flags (highest priority)
//!
//! No file is required; the listen address must come from some source.
//!
//! # Example
//!
//! ```toml
//! [relay]
//! listen_addr = "127.0.0.1:8080"
//! upstream_host = "relay.example.com"
//! masquerade_host = "cdn.example.net"
//!
//! [ca]
//! key_path = "proxypk.pem"
//! cert_path = "proxycert.pem"
//! ```

mod error;
mod loader;
mod relay;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use relay::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IO_TIMEOUT_SECS, DEFAULT_MITM_ADDR, IngressConfig,
    RelayConfig, RelayRole,
};
pub use schema::{CaSection, Config, LoggingSection, RelaySection};
